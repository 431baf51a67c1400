//! Общие fixtures для integration tests
//!
//! - небольшой граф сервисов, описанный через `TypeCatalog`
//! - trait-контракт `Greeter` с несколькими реализациями
//! - disposable-ресурс со счетчиком освобождений

#![allow(dead_code)]

use container::{param, Container, ContainerConfig, InvokeError, TypeCatalog};
use container::reflection::Disposable;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct Clock;

pub struct Logger {
    pub clock: Arc<Clock>,
}

pub struct Repository {
    pub logger: Arc<Logger>,
    pub table: Arc<String>,
}

/// Два конструктора: без зависимостей и с логгером
pub struct Cache {
    pub logger: Option<Arc<Logger>>,
}

/// Поля и методы для build-up
#[derive(Default)]
pub struct Controller {
    pub repository: Option<Arc<Repository>>,
    pub title: Option<Arc<String>>,
    pub started: usize,
}

pub trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

pub struct English;
pub struct Spanish;

impl Greeter for English {
    fn greet(&self) -> String {
        "hello".to_string()
    }
}

impl Greeter for Spanish {
    fn greet(&self) -> String {
        "hola".to_string()
    }
}

/// Ресурс, который scope освобождает при dispose
pub struct Connection {
    pub closed: Arc<AtomicUsize>,
}

impl Disposable for Connection {
    fn dispose(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Тип без описания в каталоге
pub struct Undescribed;

/// Каталог с описаниями всех fixture-типов
pub fn catalog_with(closed: Arc<AtomicUsize>) -> Arc<TypeCatalog> {
    let catalog = TypeCatalog::new();

    catalog.describe::<Clock>().constructor(vec![], |_| Ok(Clock)).build();
    catalog
        .describe::<Logger>()
        .constructor(vec![param::<Clock>("clock")], |args| {
            Ok(Logger {
                clock: args.get::<Clock>(0)?,
            })
        })
        .build();
    catalog
        .describe::<Repository>()
        .constructor(
            vec![
                param::<Logger>("logger"),
                param::<String>("table").with_default("records".to_string()),
            ],
            |args| {
                Ok(Repository {
                    logger: args.get::<Logger>(0)?,
                    table: args.get::<String>(1)?,
                })
            },
        )
        .build();
    catalog
        .describe::<Cache>()
        .constructor(vec![], |_| Ok(Cache { logger: None }))
        .constructor(vec![param::<Logger>("logger")], |args| {
            Ok(Cache {
                logger: Some(args.get::<Logger>(0)?),
            })
        })
        .build();
    catalog
        .describe::<Controller>()
        .constructor(vec![], |_| Ok(Controller::default()))
        .import_field("repository", None, |c: &mut Controller, r: Arc<Repository>| {
            c.repository = Some(r)
        })
        .property("title", |c: &mut Controller, t: Arc<String>| c.title = Some(t))
        .import_method("start", vec![], |c: &mut Controller, _| {
            c.started += 1;
            Ok(())
        })
        .build();
    catalog.describe::<English>().constructor(vec![], |_| Ok(English)).build();
    catalog.describe::<Spanish>().constructor(vec![], |_| Ok(Spanish)).build();

    let counter = Arc::clone(&closed);
    catalog
        .describe::<Connection>()
        .constructor(vec![], move |_| {
            Ok(Connection {
                closed: Arc::clone(&counter),
            })
        })
        .disposable()
        .build();

    Arc::new(catalog)
}

pub fn catalog() -> Arc<TypeCatalog> {
    catalog_with(Arc::new(AtomicUsize::new(0)))
}

pub fn container() -> Container {
    container_with(ContainerConfig::default())
}

pub fn container_with(config: ContainerConfig) -> Container {
    ::common::init_test_logging();
    Container::with_provider(config, catalog()).expect("valid configuration")
}

/// Фабрика, которая всегда падает с пользовательской ошибкой
pub fn failing(_: &container::Arguments) -> Result<Clock, InvokeError> {
    Err(InvokeError::User(anyhow::anyhow!("clock is broken")))
}
