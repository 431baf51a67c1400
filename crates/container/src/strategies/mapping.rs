use crate::contract::Contract;
use crate::pipeline::{BuilderContext, BuilderStrategy, Existing};

/// Контракт отображен на другой тип: значение - результат разрешения
/// типа реализации под тем же именем
pub struct MappingStrategy;

impl BuilderStrategy for MappingStrategy {
    fn pre_build_up(&self, context: &mut BuilderContext<'_>) {
        if context.existing().is_some() {
            return;
        }

        let contract = Contract::with_shared_name(
            context.target_type(),
            context.contract().shared_name().cloned(),
        );
        if let Some(value) = context.resolve_contract(contract) {
            context.set_existing(Existing::Shared(value));
        }
    }
}
