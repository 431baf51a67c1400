use common::OperationTimer;
use tracing::debug;

use crate::pipeline::{BuilderContext, BuilderStrategy};

/// Логирует начало и завершение каждой сборки с длительностью
pub struct DiagnosticStrategy;

impl BuilderStrategy for DiagnosticStrategy {
    fn pre_build_up(&self, context: &mut BuilderContext<'_>) {
        let depth = context.depth();
        debug!(contract = %context.contract(), depth, "Build started");

        let mut timer = OperationTimer::new("container_build");
        timer.add_field("contract", context.contract().to_string());
        timer.add_field("target", context.target_type().name());
        timer.add_field("depth", depth);
        context.timer = Some(timer);
    }

    fn post_build_up(&self, context: &mut BuilderContext<'_>) {
        let Some(timer) = context.timer.take() else {
            return;
        };
        let outcome: Result<(), &str> = match context.fault() {
            Some(fault) => Err(fault.message.as_str()),
            None => Ok(()),
        };
        timer.finish_with_result(&outcome);
    }
}
