use std::sync::Arc;

use crate::errors::FaultKind;
use crate::pipeline::{BuilderContext, BuilderStrategy, Existing};
use crate::registration::RegistrationData;

/// Публикует готовое значение instance-регистрации
pub struct InstanceStrategy;

impl BuilderStrategy for InstanceStrategy {
    fn pre_build_up(&self, context: &mut BuilderContext<'_>) {
        if context.existing().is_some() {
            return;
        }

        let value = match context.registration().map(|r| r.data()) {
            Some(RegistrationData::Instance(value)) => Some(Arc::clone(value)),
            _ => None,
        };

        match value {
            Some(value) => context.set_existing(Existing::Shared(value)),
            None => context.fail(FaultKind::Configuration, "registration holds no instance"),
        }
    }
}
