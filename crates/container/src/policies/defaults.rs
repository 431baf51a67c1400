//! Политики по умолчанию и стандартные цепочки стратегий
//!
//! Для каждой категории сборки хранится цепочка (`StagedStrategyChain`) и
//! скомпилированный из нее pipeline. Изменение цепочки пересобирает pipeline
//! через `PipelineFactory` категории и публикует его обратно в Policies.

use std::sync::Arc;
use tracing::debug;

use super::Policies;
use crate::config::ContainerConfig;
use crate::contract::TypeKey;
use crate::pipeline::{compile, BuildStage, BuilderContext, BuilderStrategy, Pipeline, StagedStrategyChain};
use crate::reflection::{MemberProvider, TypeInfo};
use crate::selection;
use crate::strategies::{
    ConstructorStrategy, DiagnosticStrategy, FactoryStrategy, FieldStrategy, InstanceStrategy,
    MappingStrategy, MethodStrategy, PropertyStrategy,
};

/// Маркеры target для политик категорий
pub struct TypeCategory;
pub struct InstanceCategory;
pub struct FactoryCategory;
pub struct MappingCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Type,
    Instance,
    Factory,
    /// Контракт отображается на другой тип реализации без собственной сборки
    Mapping,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 4] = [
        PipelineKind::Type,
        PipelineKind::Instance,
        PipelineKind::Factory,
        PipelineKind::Mapping,
    ];

    pub fn target(self) -> TypeKey {
        match self {
            PipelineKind::Type => TypeKey::of::<TypeCategory>(),
            PipelineKind::Instance => TypeKey::of::<InstanceCategory>(),
            PipelineKind::Factory => TypeKey::of::<FactoryCategory>(),
            PipelineKind::Mapping => TypeKey::of::<MappingCategory>(),
        }
    }
}

/// Опубликованный pipeline категории
#[derive(Clone)]
pub struct CompiledPipeline(pub Pipeline);

pub type PipelineBuilder = Arc<dyn Fn(&StagedStrategyChain) -> Pipeline + Send + Sync>;

/// Как цепочка превращается в pipeline
#[derive(Clone)]
pub struct PipelineFactory(pub PipelineBuilder);

impl PipelineFactory {
    pub fn new(f: impl Fn(&StagedStrategyChain) -> Pipeline + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn build(&self, chain: &StagedStrategyChain) -> Pipeline {
        (self.0)(chain)
    }
}

impl Default for PipelineFactory {
    fn default() -> Self {
        Self::new(|chain| compile(&chain.make_strategy_chain()))
    }
}

#[derive(Clone)]
pub struct MemberProviderPolicy(pub Arc<dyn MemberProvider>);

pub type SelectConstructor =
    Arc<dyn Fn(&mut BuilderContext<'_>, &TypeInfo) -> Option<usize> + Send + Sync>;

/// Алгоритмический выбор конструктора, когда регистрация и пометки ничего не решили
#[derive(Clone)]
pub struct ConstructorSelector(pub SelectConstructor);

impl Default for ConstructorSelector {
    fn default() -> Self {
        Self(Arc::new(selection::select_most_resolvable))
    }
}

pub(crate) fn install(policies: &Arc<Policies>, config: &ContainerConfig, provider: Arc<dyn MemberProvider>) {
    policies.set(MemberProviderPolicy(provider));
    policies.set(config.array_failure);
    policies.set(config.default_values);
    policies.set(ConstructorSelector::default());
    policies.set(PipelineFactory::default());

    for kind in PipelineKind::ALL {
        install_chain(policies, kind, default_chain(kind, config.diagnostics));
    }
    debug!(slots = policies.len(), diagnostics = config.diagnostics, "Default policies installed");
}

/// Опубликовать цепочку категории и пересобирать pipeline при каждом ее изменении
pub fn install_chain(
    policies: &Arc<Policies>,
    kind: PipelineKind,
    chain: StagedStrategyChain,
) -> Arc<StagedStrategyChain> {
    let chain = Arc::new(chain);
    let weak = Arc::downgrade(policies);
    chain.on_invalidated(Arc::new(move |chain| {
        if let Some(policies) = weak.upgrade() {
            recompile(&policies, kind, chain);
        }
    }));

    recompile(policies, kind, &chain);
    policies.set_shared_for(kind.target(), Arc::clone(&chain));
    chain
}

pub fn recompile(policies: &Policies, kind: PipelineKind, chain: &StagedStrategyChain) {
    let pipeline = match policies.get_for::<PipelineFactory>(kind.target()) {
        Some(factory) => factory.build(chain),
        None => PipelineFactory::default().build(chain),
    };
    policies.set_for(kind.target(), CompiledPipeline(pipeline));
    debug!(?kind, version = chain.version(), stages = chain.len(), "Pipeline recompiled");
}

fn default_chain(kind: PipelineKind, diagnostics: bool) -> StagedStrategyChain {
    let mut stages: Vec<(BuildStage, Arc<dyn BuilderStrategy>)> = Vec::new();
    if diagnostics {
        stages.push((BuildStage::Setup, Arc::new(DiagnosticStrategy)));
    }

    match kind {
        PipelineKind::Type => {
            stages.push((BuildStage::Creation, Arc::new(ConstructorStrategy)));
            stages.push((BuildStage::Fields, Arc::new(FieldStrategy)));
            stages.push((BuildStage::Properties, Arc::new(PropertyStrategy)));
            stages.push((BuildStage::Methods, Arc::new(MethodStrategy)));
        }
        PipelineKind::Instance => stages.push((BuildStage::Creation, Arc::new(InstanceStrategy))),
        PipelineKind::Factory => stages.push((BuildStage::Creation, Arc::new(FactoryStrategy))),
        PipelineKind::Mapping => stages.push((BuildStage::Creation, Arc::new(MappingStrategy))),
    }

    StagedStrategyChain::with_stages(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArrayFailurePolicy, DefaultValueRule};
    use crate::reflection::TypeCatalog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    impl BuilderStrategy for Noop {}

    fn policies(config: &ContainerConfig) -> Arc<Policies> {
        Policies::with_defaults(config, Arc::new(TypeCatalog::new()))
    }

    #[test]
    fn test_defaults_installed() {
        let policies = policies(&ContainerConfig::default());

        for kind in PipelineKind::ALL {
            assert!(policies.pipeline(kind).is_some(), "{:?} pipeline", kind);
            assert!(policies.chain(kind).is_some(), "{:?} chain", kind);
        }
        assert_eq!(policies.chain(PipelineKind::Type).map(|c| c.len()), Some(4));
        assert!(policies
            .chain(PipelineKind::Type)
            .and_then(|c| c.get(BuildStage::Setup))
            .is_none());
        assert_eq!(
            policies.get::<ArrayFailurePolicy>().as_deref(),
            Some(&ArrayFailurePolicy::SkipTypeLoadErrors)
        );
        assert_eq!(
            policies.get::<DefaultValueRule>().as_deref(),
            Some(&DefaultValueRule::OnFailure)
        );
    }

    #[test]
    fn test_diagnostics_occupy_setup_stage() {
        let policies = policies(&ContainerConfig::development());
        let chain = policies.chain(PipelineKind::Factory).expect("factory chain");
        assert!(chain.get(BuildStage::Setup).is_some());
        assert!(chain.add(BuildStage::Setup, Arc::new(Noop)).is_err());
    }

    #[test]
    fn test_chain_mutation_republishes_pipeline() {
        let policies = policies(&ContainerConfig::default());
        let before = policies.pipeline(PipelineKind::Type).expect("compiled");
        let chain = policies.chain(PipelineKind::Type).expect("chain");

        chain
            .add(BuildStage::PostInitialization, Arc::new(Noop))
            .expect("free stage");

        let after = policies.pipeline(PipelineKind::Type).expect("compiled");
        assert!(!Arc::ptr_eq(&before, &after));
        let instance = policies.pipeline(PipelineKind::Instance).expect("compiled");
        assert!(!Arc::ptr_eq(&after, &instance));
    }

    #[test]
    fn test_targeted_pipeline_factory_is_used() {
        let policies = policies(&ContainerConfig::default());
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        policies.set_for(
            PipelineKind::Instance.target(),
            PipelineFactory::new(move |chain| {
                counter.fetch_add(1, Ordering::SeqCst);
                compile(&chain.make_strategy_chain())
            }),
        );

        let chain = policies.chain(PipelineKind::Instance).expect("chain");
        chain.add(BuildStage::Setup, Arc::new(Noop)).expect("free stage");
        policies
            .chain(PipelineKind::Type)
            .expect("chain")
            .add(BuildStage::Setup, Arc::new(Noop))
            .expect("free stage");

        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
