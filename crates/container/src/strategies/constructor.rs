use tracing::trace;

use super::type_info_or_fault;
use crate::errors::FaultKind;
use crate::pipeline::{BuilderContext, BuilderStrategy, Existing};
use crate::selection::{resolve_arguments, select_constructor};

/// Стадия Creation для Type: выбор конструктора, разрешение аргументов, вызов
///
/// Пропускается, если объект уже есть (build-up существующего экземпляра).
pub struct ConstructorStrategy;

impl BuilderStrategy for ConstructorStrategy {
    fn pre_build_up(&self, context: &mut BuilderContext<'_>) {
        if context.existing().is_some() {
            return;
        }

        let Some(info) = type_info_or_fault(context) else {
            return;
        };
        let registration = context.registration().cloned();
        let members = registration.as_deref().map_or(&[][..], |r| r.members());

        let (index, injected) = match select_constructor(context, &info, members) {
            Ok(selected) => selected,
            Err(message) => {
                context.fail(FaultKind::Configuration, message);
                return;
            }
        };
        let Some(constructor) = info.constructors.get(index) else {
            context.fail(
                FaultKind::Configuration,
                format!("constructor #{} of {} does not exist", index, info.ty),
            );
            return;
        };
        trace!(ty = %info.ty, index, arity = constructor.parameters.len(), "Constructor selected");

        let member = format!("constructor of {}", info.ty);
        let Some(arguments) =
            resolve_arguments(context, info.ty, &member, &constructor.parameters, injected)
        else {
            return;
        };

        match constructor.invoke(&arguments) {
            Ok(instance) => context.set_existing(Existing::Owned(instance)),
            Err(error) => context.fail_invoke(&member, error),
        }
    }
}
