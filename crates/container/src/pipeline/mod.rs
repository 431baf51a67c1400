//! Стадии, цепочки стратегий и компиляция pipeline
//!
//! Стратегия вносит независимые pre/post шаги; pipeline вызывает pre-шаги по
//! порядку стадий и post-шаги в обратном порядке, без вложенных вызовов.

pub mod builder;
pub mod chain;
pub mod context;

pub use builder::{compile, execute, Pipeline};
pub use chain::{BuildStage, InvalidatedHandler, StagedStrategyChain, STAGE_COUNT};
pub use context::{BuilderContext, Existing, Fault, FaultMark, ResolutionFrame};

/// Шаг сборки, привязанный к стадии
pub trait BuilderStrategy: Send + Sync {
    fn pre_build_up(&self, _context: &mut BuilderContext<'_>) {}

    fn post_build_up(&self, _context: &mut BuilderContext<'_>) {}
}
