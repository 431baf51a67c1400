use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::BuilderStrategy;
use crate::errors::ContainerError;

/// Стадии сборки в фиксированном порядке выполнения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildStage {
    Setup,
    PreCreation,
    Creation,
    Initialization,
    Fields,
    Properties,
    Methods,
    PostInitialization,
}

pub const STAGE_COUNT: usize = 8;

impl BuildStage {
    pub const ALL: [BuildStage; STAGE_COUNT] = [
        BuildStage::Setup,
        BuildStage::PreCreation,
        BuildStage::Creation,
        BuildStage::Initialization,
        BuildStage::Fields,
        BuildStage::Properties,
        BuildStage::Methods,
        BuildStage::PostInitialization,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

pub type InvalidatedHandler = Arc<dyn Fn(&StagedStrategyChain) + Send + Sync>;

/// Цепочка стратегий: не больше одной стратегии на стадию
///
/// Любое изменение увеличивает `version` и вызывает подписчиков `on_invalidated`
/// (после освобождения внутреннего lock).
#[derive(Default)]
pub struct StagedStrategyChain {
    stages: RwLock<[Option<Arc<dyn BuilderStrategy>>; STAGE_COUNT]>,
    version: AtomicU64,
    handlers: Mutex<Vec<InvalidatedHandler>>,
}

impl StagedStrategyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Цепочка с заранее заполненными стадиями; повторная стадия заменяет предыдущую
    pub fn with_stages(strategies: Vec<(BuildStage, Arc<dyn BuilderStrategy>)>) -> Self {
        let chain = Self::default();
        {
            let mut stages = chain.stages.write();
            for (stage, strategy) in strategies {
                stages[stage.index()] = Some(strategy);
            }
        }
        chain
    }

    /// Добавить стратегию; занятая стадия - ошибка конфигурации
    pub fn add(
        &self,
        stage: BuildStage,
        strategy: Arc<dyn BuilderStrategy>,
    ) -> Result<(), ContainerError> {
        {
            let mut stages = self.stages.write();
            let slot = &mut stages[stage.index()];
            if slot.is_some() {
                return Err(ContainerError::StageOccupied { stage });
            }
            *slot = Some(strategy);
        }
        self.invalidate();
        Ok(())
    }

    /// Добавить несколько стратегий атомарно: либо все, либо ни одной
    pub fn add_many(
        &self,
        strategies: Vec<(BuildStage, Arc<dyn BuilderStrategy>)>,
    ) -> Result<(), ContainerError> {
        {
            let mut stages = self.stages.write();
            let mut seen = [false; STAGE_COUNT];
            for (stage, _) in &strategies {
                if stages[stage.index()].is_some() || seen[stage.index()] {
                    return Err(ContainerError::StageOccupied { stage: *stage });
                }
                seen[stage.index()] = true;
            }
            for (stage, strategy) in strategies {
                stages[stage.index()] = Some(strategy);
            }
        }
        self.invalidate();
        Ok(())
    }

    pub fn remove(&self, stage: BuildStage) -> Option<Arc<dyn BuilderStrategy>> {
        let removed = self.stages.write()[stage.index()].take();
        if removed.is_some() {
            self.invalidate();
        }
        removed
    }

    pub fn get(&self, stage: BuildStage) -> Option<Arc<dyn BuilderStrategy>> {
        self.stages.read()[stage.index()].clone()
    }

    pub fn len(&self) -> usize {
        self.stages.read().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Плотный массив непустых стадий в порядке стадий
    pub fn make_strategy_chain(&self) -> Vec<Arc<dyn BuilderStrategy>> {
        self.stages.read().iter().flatten().cloned().collect()
    }

    pub fn on_invalidated(&self, handler: InvalidatedHandler) {
        self.handlers.lock().push(handler);
    }

    fn invalidate(&self) {
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(version, "Strategy chain invalidated");

        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BuilderContext;
    use std::sync::atomic::AtomicUsize;

    struct Noop;

    impl BuilderStrategy for Noop {
        fn pre_build_up(&self, _context: &mut BuilderContext<'_>) {}
    }

    #[test]
    fn test_duplicate_stage_is_error() {
        let chain = StagedStrategyChain::new();
        chain.add(BuildStage::Creation, Arc::new(Noop)).expect("free stage");

        let err = chain
            .add(BuildStage::Creation, Arc::new(Noop))
            .expect_err("stage occupied");
        assert_eq!(
            err,
            ContainerError::StageOccupied {
                stage: BuildStage::Creation
            }
        );
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_add_many_is_atomic() {
        let chain = StagedStrategyChain::new();
        chain.add(BuildStage::Methods, Arc::new(Noop)).expect("free stage");

        let result = chain.add_many(vec![
            (BuildStage::Setup, Arc::new(Noop) as Arc<dyn BuilderStrategy>),
            (BuildStage::Methods, Arc::new(Noop)),
        ]);
        assert!(result.is_err());
        assert!(chain.get(BuildStage::Setup).is_none());

        let result = chain.add_many(vec![
            (BuildStage::Setup, Arc::new(Noop) as Arc<dyn BuilderStrategy>),
            (BuildStage::Setup, Arc::new(Noop)),
        ]);
        assert!(result.is_err());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_every_mutation_invalidates() {
        let chain = StagedStrategyChain::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        chain.on_invalidated(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        chain.add(BuildStage::Setup, Arc::new(Noop)).expect("add");
        chain.remove(BuildStage::Setup);
        chain.remove(BuildStage::Setup);
        chain
            .add_many(vec![(BuildStage::Fields, Arc::new(Noop) as Arc<dyn BuilderStrategy>)])
            .expect("add many");

        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(chain.version(), 3);
    }

    #[test]
    fn test_dense_chain_follows_stage_order() {
        let chain = StagedStrategyChain::new();
        let methods: Arc<dyn BuilderStrategy> = Arc::new(Noop);
        let setup: Arc<dyn BuilderStrategy> = Arc::new(Noop);
        chain.add(BuildStage::Methods, Arc::clone(&methods)).expect("add");
        chain.add(BuildStage::Setup, Arc::clone(&setup)).expect("add");

        let dense = chain.make_strategy_chain();
        assert_eq!(dense.len(), 2);
        assert!(Arc::ptr_eq(&dense[0], &setup));
        assert!(Arc::ptr_eq(&dense[1], &methods));
    }
}
