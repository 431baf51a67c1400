use std::sync::Arc;
use tracing::trace;

use super::{BuilderContext, BuilderStrategy};

/// Скомпилированная сборка: один вызов выполняет всю цепочку стратегий
pub type Pipeline = Arc<dyn Fn(&mut BuilderContext<'_>) + Send + Sync>;

/// Собрать pipeline из плотного массива стратегий
pub fn compile(strategies: &[Arc<dyn BuilderStrategy>]) -> Pipeline {
    let chain: Arc<[Arc<dyn BuilderStrategy>]> = strategies.to_vec().into();
    Arc::new(move |context: &mut BuilderContext<'_>| execute(&chain, context))
}

/// Pre-фазы по порядку до первого сбоя, затем post-фазы в обратном порядке
///
/// Post-фаза вызывается только для стратегий, чья pre-фаза завершилась без сбоя.
/// Раскрутка останавливается, если post-фаза добавила новый сбой.
pub fn execute(chain: &[Arc<dyn BuilderStrategy>], context: &mut BuilderContext<'_>) {
    let mut entered = 0;
    for strategy in chain {
        strategy.pre_build_up(context);
        if context.is_faulted() {
            trace!(contract = %context.contract(), entered, "Pre-build faulted");
            break;
        }
        entered += 1;
    }

    let faults = context.fault_count();
    for strategy in chain[..entered].iter().rev() {
        strategy.post_build_up(context);
        if context.fault_count() != faults {
            break;
        }
    }
}
