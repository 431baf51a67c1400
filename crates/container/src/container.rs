//! Контейнер: корневой scope, общие Policies и конфигурация
//!
//! Все состояние передается явно: нет глобальных реестров. Дочерний контейнер
//! получает свой scope поверх родительского и разделяет с ним Policies.

use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info};

use common::OperationTimer;

use crate::algorithms;
use crate::config::ContainerConfig;
use crate::contract::{Contract, TypeKey, Value};
use crate::deferred::{Deferred, Func, Lazy};
use crate::errors::{ContainerError, FaultKind, ResolutionFailed};
use crate::injection::InjectionMember;
use crate::lifetime::LifetimeKind;
use crate::overrides::ResolverOverride;
use crate::pipeline::{BuilderContext, Existing, ResolutionFrame};
use crate::policies::Policies;
use crate::reflection::{MemberProvider, TypeCatalog};
use crate::registration::{FactoryDelegate, RegistrationManager};
use crate::scope::{Registrations, RegistrationDescriptor, Scope};

pub struct Container {
    scope: Arc<Scope>,
    policies: Arc<Policies>,
    config: Arc<ContainerConfig>,
}

impl Container {
    /// Контейнер с конфигурацией по умолчанию и пустым каталогом типов
    pub fn new() -> Self {
        Self::build(ContainerConfig::default(), Arc::new(TypeCatalog::new()))
    }

    pub fn with_config(config: ContainerConfig) -> Result<Self, ContainerError> {
        Self::with_provider(config, Arc::new(TypeCatalog::new()))
    }

    /// Контейнер поверх собственного источника описаний типов
    pub fn with_provider(
        config: ContainerConfig,
        provider: Arc<dyn MemberProvider>,
    ) -> Result<Self, ContainerError> {
        config.validate()?;
        Ok(Self::build(config, provider))
    }

    fn build(config: ContainerConfig, provider: Arc<dyn MemberProvider>) -> Self {
        let policies = Policies::with_defaults(&config, provider);
        let scope = Arc::new(Scope::new(config.scope_capacity));

        let internal = RegistrationManager::internal(Arc::new(config.clone()));
        scope.add(Arc::new(internal), &[Some(TypeKey::of::<ContainerConfig>())]);

        info!(
            scope = scope.id(),
            capacity = config.scope_capacity,
            diagnostics = config.diagnostics,
            "Container created"
        );

        Self {
            scope,
            policies,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// Политики, общие для всей иерархии контейнеров
    pub fn policies(&self) -> &Arc<Policies> {
        &self.policies
    }

    /// Пакетная регистрация дескрипторов
    pub fn add(&self, descriptors: Vec<RegistrationDescriptor>) -> Result<(), ContainerError> {
        if self.scope.is_disposed() {
            return Err(ContainerError::Disposed {
                scope_id: self.scope.id(),
            });
        }

        for descriptor in &descriptors {
            let category = descriptor.manager.category();
            if !category.is_enumerable() {
                return Err(ContainerError::UnsupportedCategory { category });
            }
            if descriptor.register_as.is_empty() {
                let implementation = descriptor
                    .manager
                    .implementation()
                    .map_or_else(|| format!("{:?}", category), |ty| ty.name().to_string());
                return Err(ContainerError::EmptyDescriptor { implementation });
            }
        }

        self.scope.add_descriptors(&descriptors);
        debug!(scope = self.scope.id(), count = descriptors.len(), "Registrations added");
        Ok(())
    }

    fn register(
        &self,
        manager: RegistrationManager,
        ty: TypeKey,
        name: Option<&str>,
    ) -> Result<(), ContainerError> {
        let descriptor = RegistrationDescriptor::new(manager, vec![ty]);
        let descriptor = match name {
            Some(name) => descriptor.named(name),
            None => descriptor,
        };
        self.add(vec![descriptor])
    }

    /// Тип под самим собой
    pub fn register_type<T: Any + Send + Sync>(
        &self,
        name: Option<&str>,
        lifetime: LifetimeKind,
        members: Vec<InjectionMember>,
    ) -> Result<(), ContainerError> {
        let ty = TypeKey::of::<T>();
        self.register(RegistrationManager::for_type(ty, lifetime, members)?, ty, name)
    }

    /// Контракт `C` реализуется типом `I`
    pub fn register_mapping<C: ?Sized + 'static, I: Any + Send + Sync>(
        &self,
        name: Option<&str>,
        lifetime: LifetimeKind,
        members: Vec<InjectionMember>,
    ) -> Result<(), ContainerError> {
        let manager = RegistrationManager::for_type(TypeKey::of::<I>(), lifetime, members)?;
        self.register(manager, TypeKey::of::<C>(), name)
    }

    pub fn register_instance<T: Any + Send + Sync>(
        &self,
        name: Option<&str>,
        value: T,
    ) -> Result<(), ContainerError> {
        let manager = RegistrationManager::for_instance(Arc::new(value), LifetimeKind::Singleton)?;
        self.register(manager, TypeKey::of::<T>(), name)
    }

    /// Фабрика значения `T`; для trait-контрактов `T = Arc<dyn Trait>`
    pub fn register_factory<T, F>(
        &self,
        name: Option<&str>,
        lifetime: LifetimeKind,
        factory: F,
    ) -> Result<(), ContainerError>
    where
        T: Any + Send + Sync,
        F: Fn(&mut BuilderContext<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let delegate: FactoryDelegate =
            Arc::new(move |context| factory(context).map(|value| Arc::new(value) as Value));
        let manager = RegistrationManager::for_factory(delegate, lifetime)?;
        self.register(manager, TypeKey::of::<T>(), name)
    }

    /// Открытая регистрация: закрытые типы с `generic_definition == D` строятся по ней
    pub fn register_generic<D: ?Sized + 'static>(
        &self,
        name: Option<&str>,
        lifetime: LifetimeKind,
        members: Vec<InjectionMember>,
    ) -> Result<(), ContainerError> {
        let ty = TypeKey::of::<D>();
        self.register(RegistrationManager::for_type(ty, lifetime, members)?, ty, name)
    }

    pub fn is_registered<T: ?Sized + 'static>(&self, name: Option<&str>) -> bool {
        self.is_registered_contract(&Contract::new(TypeKey::of::<T>(), name))
    }

    pub fn is_registered_contract(&self, contract: &Contract) -> bool {
        self.scope
            .get(contract)
            .is_some_and(|manager| manager.category().is_enumerable())
    }

    /// Видимые регистрации; ребенок перекрывает родителя
    pub fn registrations(&self) -> Registrations {
        self.scope.registrations()
    }

    /// Разрешить контракт с overrides на время одного вызова
    pub fn resolve_contract(
        &self,
        contract: &Contract,
        overrides: Vec<ResolverOverride>,
    ) -> Result<Value, ResolutionFailed> {
        self.run(contract, overrides, |scope, policies, frame| {
            algorithms::resolve_in(scope, policies, frame, None, contract.clone(), None)
        })
    }

    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ResolutionFailed> {
        self.resolve_with::<T>(None, Vec::new())
    }

    pub fn resolve_named<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ResolutionFailed> {
        self.resolve_with::<T>(Some(name), Vec::new())
    }

    pub fn resolve_with<T: Any + Send + Sync>(
        &self,
        name: Option<&str>,
        overrides: Vec<ResolverOverride>,
    ) -> Result<Arc<T>, ResolutionFailed> {
        let contract = Contract::new(TypeKey::of::<T>(), name);
        let value = self.resolve_contract(&contract, overrides)?;
        downcast::<T>(&contract, value)
    }

    /// Все регистрации типа, именованные и анонимная, в порядке регистрации
    pub fn resolve_all<T: Any + Send + Sync>(&self) -> Result<Vec<Arc<T>>, ResolutionFailed> {
        let contract = Contract::anonymous(TypeKey::of::<T>().array());
        let value = self.resolve_contract(&contract, Vec::new())?;
        let values = downcast::<Vec<Value>>(&contract, value)?;

        values
            .iter()
            .map(|value| downcast::<T>(&Contract::of::<T>(), Arc::clone(value)))
            .collect()
    }

    /// `T` разрешится при первом `get`, в scope этого контейнера
    pub fn resolve_lazy<T: Any + Send + Sync>(&self, name: Option<&str>) -> Result<Lazy<T>, ResolutionFailed> {
        self.resolve_deferred::<T>(name).map(Lazy::new)
    }

    /// Каждый `call` разрешает `T` заново
    pub fn resolve_func<T: Any + Send + Sync>(&self, name: Option<&str>) -> Result<Func<T>, ResolutionFailed> {
        self.resolve_deferred::<T>(name).map(Func::new)
    }

    fn resolve_deferred<T: Any + Send + Sync>(&self, name: Option<&str>) -> Result<Arc<Deferred>, ResolutionFailed> {
        let contract = Contract::new(TypeKey::of::<T>().deferred(), name);
        let value = self.resolve_contract(&contract, Vec::new())?;
        downcast::<Deferred>(&contract, value)
    }

    /// Внедрить зависимости в уже созданный объект; конструктор не вызывается
    pub fn build_up<T: Any + Send + Sync>(
        &self,
        instance: T,
        name: Option<&str>,
    ) -> Result<Arc<T>, ResolutionFailed> {
        let contract = Contract::new(TypeKey::of::<T>(), name);
        let existing = Existing::Owned(Box::new(instance));
        let value = self.run(&contract, Vec::new(), |scope, policies, frame| {
            algorithms::build_up(scope, policies, frame, contract.clone(), existing)
        })?;
        downcast::<T>(&contract, value)
    }

    fn run(
        &self,
        contract: &Contract,
        overrides: Vec<ResolverOverride>,
        resolve: impl FnOnce(&Arc<Scope>, &Arc<Policies>, &mut ResolutionFrame) -> Option<Value>,
    ) -> Result<Value, ResolutionFailed> {
        if self.scope.is_disposed() {
            let message = format!("container scope {} is disposed", self.scope.id());
            return Err(failure(contract, FaultKind::Configuration, message));
        }

        let mut timer = OperationTimer::new("container_resolve");
        timer.add_field("contract", contract.to_string());
        timer.add_field("scope", self.scope.id());

        let mut frame =
            ResolutionFrame::new(overrides).with_cycle_detection(self.config.detect_cycles);
        let resolved = resolve(&self.scope, &self.policies, &mut frame);
        // без единого запроса значение пришло из lifetime fast path
        timer.record_resolution(frame.max_depth() as u64, frame.request_count() == 0);
        let result = match resolved {
            Some(value) => Ok(value),
            None => Err(frame.into_failure(contract)),
        };

        timer.finish_with_result(&result);
        result
    }

    /// Дочерний контейнер: свой scope, общие Policies и конфигурация
    pub fn create_child(&self) -> Container {
        let scope = self.scope.create_child_scope(self.config.child_scope_capacity);
        debug!(parent = self.scope.id(), child = scope.id(), level = scope.level(), "Child container created");
        Container {
            scope,
            policies: Arc::clone(&self.policies),
            config: Arc::clone(&self.config),
        }
    }

    /// Освободить значения, которыми владеет scope контейнера; повторный вызов ничего не делает
    pub fn dispose(&self) {
        self.scope.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("scope", &self.scope)
            .field("policies", &self.policies.len())
            .finish()
    }
}

pub(crate) fn failure(contract: &Contract, kind: FaultKind, message: String) -> ResolutionFailed {
    ResolutionFailed {
        type_name: contract.ty().name().to_string(),
        name: contract.name().map(str::to_string),
        kind,
        message,
        path: Vec::new(),
        source: None,
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(contract: &Contract, value: Value) -> Result<Arc<T>, ResolutionFailed> {
    value.downcast::<T>().map_err(|_| {
        let message = format!("resolved value is not {}", std::any::type_name::<T>());
        failure(contract, FaultKind::Reflection, message)
    })
}
