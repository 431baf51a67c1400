use std::sync::Arc;
use tracing::trace;

use crate::errors::FaultKind;
use crate::pipeline::{BuilderContext, BuilderStrategy, Existing};
use crate::registration::RegistrationData;

/// Вызывает делегат фабрики регистрации
///
/// Если фабрика вернула значение, сбои вложенных разрешений внутри нее
/// считаются обработанными и снимаются.
pub struct FactoryStrategy;

impl BuilderStrategy for FactoryStrategy {
    fn pre_build_up(&self, context: &mut BuilderContext<'_>) {
        if context.existing().is_some() {
            return;
        }

        let factory = match context.registration().map(|r| r.data()) {
            Some(RegistrationData::Factory(factory)) => Some(Arc::clone(factory)),
            _ => None,
        };
        let Some(factory) = factory else {
            context.fail(FaultKind::Configuration, "factory delegate is missing");
            return;
        };

        let mark = context.frame_mut().mark();
        match factory(context) {
            Ok(value) => {
                if let Some(fault) = context.frame_mut().restore(mark) {
                    trace!(contract = %context.contract(), reason = %fault.message, "Factory recovered from nested fault");
                }
                context.set_existing(Existing::Shared(value));
            }
            Err(error) => {
                let message = format!("factory for {} failed: {}", context.contract(), error);
                context.fail_with(FaultKind::User, message, Some(error));
            }
        }
    }
}
