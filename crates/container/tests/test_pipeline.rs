//! Pipeline: пользовательские стратегии, раскрутка сбоев, замена политик во время работы

mod common;

use container::policies::ConstructorSelector;
use container::{
    BuildStage, BuilderContext, BuilderStrategy, ContainerConfig, Contract, DefaultValueRule,
    FaultKind, LifetimeKind, PipelineKind, TypeKey,
};
use crate::common::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Считает завершенные сборки
struct Counting(Arc<AtomicUsize>);

impl BuilderStrategy for Counting {
    fn post_build_up(&self, context: &mut BuilderContext<'_>) {
        if context.existing().is_some() {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct Blocking;

impl BuilderStrategy for Blocking {
    fn pre_build_up(&self, context: &mut BuilderContext<'_>) {
        context.fail(FaultKind::Configuration, "builds are blocked");
    }
}

/// Записывает фазы, которые дошли до выполнения
struct Journal(Arc<Mutex<Vec<&'static str>>>);

impl BuilderStrategy for Journal {
    fn pre_build_up(&self, _context: &mut BuilderContext<'_>) {
        self.0.lock().push("pre");
    }

    fn post_build_up(&self, context: &mut BuilderContext<'_>) {
        self.0.lock().push(if context.is_faulted() { "post:faulted" } else { "post" });
    }
}

#[test]
fn test_custom_strategy_runs_for_every_build() {
    let container = container();
    let built = Arc::new(AtomicUsize::new(0));
    container
        .policies()
        .chain(PipelineKind::Type)
        .expect("type chain")
        .add(BuildStage::PostInitialization, Arc::new(Counting(Arc::clone(&built))))
        .expect("free stage");

    container.resolve::<Logger>().expect("logger");
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[test]
fn test_occupied_stage_is_rejected() {
    let container = container();
    let chain = container.policies().chain(PipelineKind::Type).expect("type chain");
    let err = chain
        .add(BuildStage::Creation, Arc::new(Blocking))
        .err()
        .expect("creation is taken");
    assert!(err.to_string().contains("Creation"), "{}", err);
}

#[test]
fn test_pre_fault_skips_later_stages_and_unwinds_entered_ones() {
    let container = container();
    let journal = Arc::new(Mutex::new(Vec::new()));
    let chain = container.policies().chain(PipelineKind::Type).expect("type chain");
    chain
        .add_many(vec![
            (BuildStage::Setup, Arc::new(Journal(Arc::clone(&journal)))),
            (BuildStage::PreCreation, Arc::new(Blocking)),
        ])
        .expect("free stages");

    let err = container.resolve::<Clock>().err().expect("blocked");
    assert_eq!(err.kind, FaultKind::Configuration);
    assert!(err.message.contains("builds are blocked"));
    assert_eq!(*journal.lock(), vec!["pre", "post:faulted"]);

    chain.remove(BuildStage::PreCreation).expect("removed");
    container.resolve::<Clock>().expect("unblocked");
}

#[test]
fn test_registered_pipeline_is_kept_until_invalidated() {
    let container = container();
    container
        .register_type::<Clock>(None, LifetimeKind::Transient, vec![])
        .expect("register");
    container.resolve::<Clock>().expect("clock");

    let built = Arc::new(AtomicUsize::new(0));
    container
        .policies()
        .chain(PipelineKind::Type)
        .expect("type chain")
        .add(BuildStage::PostInitialization, Arc::new(Counting(Arc::clone(&built))))
        .expect("free stage");

    container.resolve::<Clock>().expect("clock");
    assert_eq!(built.load(Ordering::SeqCst), 0);

    let manager = container.scope().get(&Contract::of::<Clock>()).expect("registered");
    assert_eq!(manager.pipeline_count(), 1);
    manager.invalidate_pipelines();

    container.resolve::<Clock>().expect("clock");
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn test_diagnostics_do_not_change_results() {
    let container = container_with(ContainerConfig {
        diagnostics: true,
        ..ContainerConfig::default()
    });
    let chain = container.policies().chain(PipelineKind::Type).expect("type chain");
    assert!(chain.get(BuildStage::Setup).is_some());

    let repository = container.resolve::<Repository>().expect("repository");
    assert_eq!(repository.table.as_str(), "records");
    assert!(container.resolve::<Undescribed>().is_err());
}

#[test]
fn test_targeted_constructor_selector() {
    let container = container();
    container.policies().set_for(
        TypeKey::of::<Cache>(),
        ConstructorSelector(Arc::new(|_: &mut BuilderContext<'_>, _: &container::TypeInfo| Some(0))),
    );

    assert!(container.resolve::<Cache>().expect("cache").logger.is_none());
    assert!(container.resolve::<Logger>().is_ok());
}

#[test]
fn test_default_value_rule_can_be_replaced() {
    let container = container();
    container.register_instance(None, "audit".to_string()).expect("register");

    container.policies().set(DefaultValueRule::Always);
    let repository = container.resolve::<Repository>().expect("repository");
    assert_eq!(repository.table.as_str(), "records");

    container.policies().set(DefaultValueRule::OnFailure);
    let repository = container.resolve::<Repository>().expect("repository");
    assert_eq!(repository.table.as_str(), "audit");
}

#[test]
fn test_never_default_requires_resolvable_parameter() {
    let container = container();
    container.policies().set(DefaultValueRule::Never);

    let err = container.resolve::<Repository>().err().expect("String is not described");
    assert_eq!(err.kind, FaultKind::TypeLoad);
}
