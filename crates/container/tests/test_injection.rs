//! Поля, свойства и методы: build-up готовых объектов и конфигурация регистраций

mod common;

use container::{FaultKind, InjectionMember, InjectionValue, LifetimeKind, ResolverOverride};
use crate::common::*;
use std::sync::Arc;

fn fixed_repository(table: &str) -> Repository {
    Repository {
        logger: Arc::new(Logger {
            clock: Arc::new(Clock),
        }),
        table: Arc::new(table.to_string()),
    }
}

#[test]
fn test_build_up_injects_imports_into_existing_object() {
    let container = container();

    let controller = container.build_up(Controller::default(), None).expect("built up");
    assert_eq!(controller.repository.as_ref().map(|r| r.table.as_str()), Some("records"));
    assert!(controller.title.is_none());
    assert_eq!(controller.started, 1);
}

#[test]
fn test_build_up_keeps_values_set_by_caller() {
    let container = container();
    let controller = Controller {
        started: 10,
        ..Controller::default()
    };

    let controller = container.build_up(controller, None).expect("built up");
    assert_eq!(controller.started, 11);
}

#[test]
fn test_configured_property_value() {
    let container = container();
    container
        .register_type::<Controller>(
            None,
            LifetimeKind::Transient,
            vec![InjectionMember::property_with(
                "title",
                InjectionValue::value("Dashboard".to_string()),
            )],
        )
        .expect("register");

    let controller = container.resolve::<Controller>().expect("controller");
    assert_eq!(controller.title.as_deref().map(String::as_str), Some("Dashboard"));
    assert!(controller.repository.is_some());
}

#[test]
fn test_configured_property_is_resolved_from_container() {
    let container = container();
    container.register_instance(None, "Home".to_string()).expect("register");
    container
        .register_type::<Controller>(None, LifetimeKind::Transient, vec![InjectionMember::property("title")])
        .expect("register");

    let controller = container.resolve::<Controller>().expect("controller");
    assert_eq!(controller.title.as_deref().map(String::as_str), Some("Home"));
}

#[test]
fn test_unknown_member_is_configuration_failure() {
    let container = container();
    container
        .register_type::<Controller>(None, LifetimeKind::Transient, vec![InjectionMember::property("subtitle")])
        .expect("register");

    let err = container.resolve::<Controller>().err().expect("no such property");
    assert_eq!(err.kind, FaultKind::Configuration);
    assert!(err.message.contains("subtitle"), "{}", err.message);
}

#[test]
fn test_configured_import_method_runs_once() {
    let container = container();
    container
        .register_type::<Controller>(None, LifetimeKind::Transient, vec![InjectionMember::method("start", vec![])])
        .expect("register");

    let controller = container.resolve::<Controller>().expect("controller");
    assert_eq!(controller.started, 1);
}

#[test]
fn test_field_override_replaces_import() {
    let container = container();
    let overrides = vec![ResolverOverride::field("repository", fixed_repository("override")).on_type::<Controller>()];

    let controller = container
        .resolve_with::<Controller>(None, overrides)
        .expect("controller");
    assert_eq!(controller.repository.as_ref().map(|r| r.table.as_str()), Some("override"));
}

#[test]
fn test_property_override_beats_configuration() {
    let container = container();
    container
        .register_type::<Controller>(
            None,
            LifetimeKind::Transient,
            vec![InjectionMember::property_with(
                "title",
                InjectionValue::value("Dashboard".to_string()),
            )],
        )
        .expect("register");

    let overrides = vec![ResolverOverride::property("title", "Report".to_string())];
    let controller = container.resolve_with::<Controller>(None, overrides).expect("controller");
    assert_eq!(controller.title.as_deref().map(String::as_str), Some("Report"));
}

#[test]
fn test_instance_registration_skips_member_injection() {
    let container = container();
    container.register_instance(None, Controller::default()).expect("register");
    let shared = container.resolve::<Controller>().expect("instance");
    assert!(shared.repository.is_none());
    assert_eq!(shared.started, 0);
}
