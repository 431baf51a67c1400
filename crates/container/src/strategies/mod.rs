//! Стандартные стратегии сборки
//!
//! | Стадия     | Type                  | Instance           | Factory           | Mapping           |
//! |------------|-----------------------|--------------------|-------------------|-------------------|
//! | Setup      | `DiagnosticStrategy`* | *                  | *                 | *                 |
//! | Creation   | `ConstructorStrategy` | `InstanceStrategy` | `FactoryStrategy` | `MappingStrategy` |
//! | Fields     | `FieldStrategy`       |                    |                   |                   |
//! | Properties | `PropertyStrategy`    |                    |                   |                   |
//! | Methods    | `MethodStrategy`      |                    |                   |                   |
//!
//! \* только при `diagnostics = true`

mod constructor;
mod diagnostic;
mod factory;
mod instance;
mod mapping;
mod members;
mod methods;

pub use constructor::ConstructorStrategy;
pub use diagnostic::DiagnosticStrategy;
pub use factory::FactoryStrategy;
pub use instance::InstanceStrategy;
pub use mapping::MappingStrategy;
pub use members::{FieldStrategy, PropertyStrategy};
pub use methods::MethodStrategy;

use std::sync::Arc;

use crate::errors::{FaultKind, InvokeError};
use crate::pipeline::{BuilderContext, Existing};
use crate::reflection::TypeInfo;

/// Описание строящегося типа; отсутствие описания - сбой загрузки типа
fn type_info_or_fault(context: &mut BuilderContext<'_>) -> Option<Arc<TypeInfo>> {
    let ty = context.target_type();
    let info = context.type_info(ty);
    if info.is_none() {
        context.fail(
            FaultKind::TypeLoad,
            format!("type {} is not described by the member provider", ty),
        );
    }
    info
}

/// Изменяемый доступ к строящемуся объекту
fn with_target<R>(
    context: &mut BuilderContext<'_>,
    member: &str,
    f: impl FnOnce(&mut dyn std::any::Any) -> Result<R, InvokeError>,
) -> Result<R, InvokeError> {
    match context.existing_mut().and_then(|existing| existing.as_any_mut()) {
        Some(target) => f(target),
        None => Err(InvokeError::Inaccessible {
            member: member.to_string(),
            reason: "the instance is shared or missing and cannot be modified".to_string(),
        }),
    }
}
