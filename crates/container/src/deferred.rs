//! Отложенное разрешение: `Lazy<T>` и `Func<T>`
//!
//! Запрос формы `Deferred` ничего не строит. Контейнер отдает `Deferred`,
//! который помнит scope запроса и контракт цели; цель разрешается при первом
//! обращении (`Lazy`) или при каждом вызове (`Func`).
//!
//! Scope удерживается слабой ссылкой: отложенное значение внутри singleton не
//! продлевает жизнь контейнера.

use once_cell::sync::OnceCell;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::algorithms;
use crate::container::{downcast, failure};
use crate::contract::{Contract, Value};
use crate::errors::{FaultKind, ResolutionFailed};
use crate::pipeline::ResolutionFrame;
use crate::policies::Policies;
use crate::scope::Scope;

/// Type-erased отложенный запрос
pub struct Deferred {
    scope: Weak<Scope>,
    policies: Arc<Policies>,
    contract: Contract,
    detect_cycles: bool,
}

impl Deferred {
    pub(crate) fn new(
        scope: &Arc<Scope>,
        policies: &Arc<Policies>,
        contract: Contract,
        detect_cycles: bool,
    ) -> Self {
        Self {
            scope: Arc::downgrade(scope),
            policies: Arc::clone(policies),
            contract,
            detect_cycles,
        }
    }

    /// Контракт цели
    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub(crate) fn targets<T: Any>(&self) -> bool {
        self.contract.ty().type_id() == TypeId::of::<T>()
    }

    /// Разрешить цель в scope, из которого пришел запрос
    pub fn resolve_value(&self) -> Result<Value, ResolutionFailed> {
        let scope = match self.scope.upgrade() {
            Some(scope) if !scope.is_disposed() => scope,
            _ => {
                let message = format!("scope of deferred {} is disposed", self.contract);
                return Err(failure(&self.contract, FaultKind::Configuration, message));
            }
        };

        let mut frame = ResolutionFrame::new(Vec::new()).with_cycle_detection(self.detect_cycles);
        let resolved = algorithms::resolve_in(
            &scope,
            &self.policies,
            &mut frame,
            None,
            self.contract.clone(),
            None,
        );
        trace!(contract = %self.contract, scope = scope.id(), ok = resolved.is_some(), "Deferred contract resolved");
        resolved.ok_or_else(|| frame.into_failure(&self.contract))
    }

    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ResolutionFailed> {
        let value = self.resolve_value()?;
        downcast::<T>(&self.contract, value)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("contract", &self.contract)
            .field("alive", &(self.scope.strong_count() > 0))
            .finish()
    }
}

/// Значение, которое строится при первом `get` и дальше переиспользуется
///
/// Сбой не запоминается: следующий `get` повторит разрешение.
pub struct Lazy<T> {
    deferred: Arc<Deferred>,
    value: OnceCell<Arc<T>>,
}

impl<T: Any + Send + Sync> Lazy<T> {
    pub fn new(deferred: Arc<Deferred>) -> Self {
        Self {
            deferred,
            value: OnceCell::new(),
        }
    }

    pub fn get(&self) -> Result<Arc<T>, ResolutionFailed> {
        self.value
            .get_or_try_init(|| self.deferred.resolve::<T>())
            .map(Arc::clone)
    }

    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn contract(&self) -> &Contract {
        self.deferred.contract()
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("contract", self.deferred.contract())
            .field("resolved", &self.value.get().is_some())
            .finish()
    }
}

/// Фабрика: каждый `call` заново разрешает цель (lifetime цели соблюдается)
pub struct Func<T> {
    deferred: Arc<Deferred>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Func<T> {
    pub fn new(deferred: Arc<Deferred>) -> Self {
        Self {
            deferred,
            _marker: PhantomData,
        }
    }

    pub fn call(&self) -> Result<Arc<T>, ResolutionFailed> {
        self.deferred.resolve::<T>()
    }

    pub fn contract(&self) -> &Contract {
        self.deferred.contract()
    }
}

impl<T> Clone for Func<T> {
    fn clone(&self) -> Self {
        Self {
            deferred: Arc::clone(&self.deferred),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Func<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Func").field(self.deferred.contract()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::lifetime::LifetimeKind;
    use crate::Container;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Engine(usize);

    fn counting(container: &Container, lifetime: LifetimeKind) -> Arc<AtomicUsize> {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        container
            .register_factory::<Engine, _>(None, lifetime, move |_| {
                Ok(Engine(counter.fetch_add(1, Ordering::SeqCst) + 1))
            })
            .expect("register");
        built
    }

    #[test]
    fn test_lazy_builds_on_first_get_only() {
        let container = Container::new();
        let built = counting(&container, LifetimeKind::Transient);

        let lazy = container.resolve_lazy::<Engine>(None).expect("lazy");
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert!(!lazy.is_resolved());

        let first = lazy.get().expect("engine");
        let second = lazy.get().expect("engine");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.0, 1);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(lazy.is_resolved());
    }

    #[test]
    fn test_func_resolves_on_every_call() {
        let container = Container::new();
        let built = counting(&container, LifetimeKind::Transient);

        let func = container.resolve_func::<Engine>(None).expect("func");
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let a = func.call().expect("engine");
        let b = func.clone().call().expect("engine");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!((a.0, b.0), (1, 2));
    }

    #[test]
    fn test_func_respects_target_lifetime() {
        let container = Container::new();
        let built = counting(&container, LifetimeKind::Singleton);

        let func = container.resolve_func::<Engine>(None).expect("func");
        let a = func.call().expect("engine");
        let b = func.call().expect("engine");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_lazy_is_retried() {
        let container = Container::with_config(ContainerConfig::default()).expect("valid");
        let lazy = container.resolve_lazy::<Engine>(Some("later")).expect("lazy");
        assert!(lazy.get().is_err());
        assert!(!lazy.is_resolved());

        container
            .register_instance(Some("later"), Engine(9))
            .expect("register");
        assert_eq!(lazy.get().expect("registered now").0, 9);
    }

    #[test]
    fn test_deferred_outliving_container_fails() {
        let container = Container::new();
        counting(&container, LifetimeKind::Transient);
        let func = container.resolve_func::<Engine>(None).expect("func");
        drop(container);

        let err = func.call().err().expect("container is gone");
        assert_eq!(err.kind, FaultKind::Configuration);
        assert!(err.message.contains("disposed"));
    }
}
