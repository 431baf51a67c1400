//! Иерархический DI-контейнер
//!
//! - **Scope**: таблица контрактов `(тип, имя?)`, цепочка родителей, lock-free чтение
//! - **Policies**: настройки с ключом `(target?, тип policy)` и подписчиками
//! - **Pipeline**: стадии стратегий, pre-шаги по порядку и post-шаги в обратном
//! - **Selection**: выбор конструктора/членов и значений для них
//! - **Algorithms**: зарегистрированные, незарегистрированные, массивы и отложенные `Lazy`/`Func`
//!
//! Описания типов приходят из `MemberProvider` (по умолчанию `TypeCatalog`).

pub mod config;
pub mod container;
pub mod contract;
pub mod deferred;
pub mod errors;
pub mod injection;
pub mod lifetime;
pub mod overrides;
pub mod pipeline;
pub mod policies;
pub mod reflection;
pub mod registration;
pub mod scope;
pub mod selection;
pub mod storage;
pub mod strategies;

mod algorithms;

pub use config::{ArrayFailurePolicy, ConfigLoader, ContainerConfig, DefaultValueRule};
pub use container::Container;
pub use contract::{Contract, Shape, TypeKey, Value};
pub use deferred::{Deferred, Func, Lazy};
pub use errors::{ContainerError, FaultKind, InvokeError, ResolutionFailed};
pub use injection::{InjectionMember, InjectionValue};
pub use lifetime::{LifetimeKind, LifetimeManager};
pub use overrides::{OverrideKind, ResolverOverride};
pub use pipeline::{BuildStage, BuilderContext, BuilderStrategy, Existing, StagedStrategyChain};
pub use policies::{PipelineKind, Policies};
pub use reflection::{deferred_param, param, Arguments, MemberProvider, ParameterInfo, TypeCatalog, TypeInfo};
pub use registration::{Category, RegistrationManager};
pub use scope::{RegistrationDescriptor, Scope};
pub use selection::MatchRank;
