//! Registration manager: категория, данные регистрации, lifetime и
//! скомпилированные pipeline по scope

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::sync::Arc;
use tracing::debug;

use crate::contract::{Contract, TypeKey, Value};
use crate::errors::ContainerError;
use crate::injection::InjectionMember;
use crate::lifetime::{LifetimeKind, LifetimeManager};
use crate::pipeline::{BuilderContext, Pipeline};
use crate::scope::ScopeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Тип зарегистрирован сам под собой
    Uninitialized,
    Type,
    Instance,
    Factory,
    /// Служебная регистрация контейнера, скрыта из перечисления
    Internal,
    /// Синтезированный менеджер (например, кэш перечисления массива)
    Cache,
}

impl Category {
    pub fn is_enumerable(self) -> bool {
        !matches!(self, Category::Internal | Category::Cache)
    }
}

pub type FactoryDelegate =
    Arc<dyn Fn(&mut BuilderContext<'_>) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Clone)]
pub enum RegistrationData {
    None,
    /// Тип реализации
    Type(TypeKey),
    Instance(Value),
    Factory(FactoryDelegate),
}

/// Версионированный список элементов массива
pub struct EnumerationSnapshot {
    pub version: u64,
    /// Контракт элемента и расстояние до scope, где он зарегистрирован
    pub elements: Vec<(Contract, usize)>,
}

pub struct RegistrationManager {
    category: Category,
    data: RegistrationData,
    lifetime: LifetimeManager,
    members: Arc<[InjectionMember]>,
    require_build: bool,
    pipelines: ArcSwap<Vec<(ScopeId, Pipeline)>>,
    /// Компиляция pipeline и построение synchronized-значений
    sync: ReentrantMutex<()>,
    snapshot: ArcSwapOption<EnumerationSnapshot>,
}

impl RegistrationManager {
    fn build(
        category: Category,
        data: RegistrationData,
        lifetime: LifetimeKind,
        members: Vec<InjectionMember>,
    ) -> Result<Self, ContainerError> {
        if !lifetime.supports(category) {
            return Err(ContainerError::InvalidLifetime { lifetime, category });
        }
        let require_build = !members.is_empty();
        Ok(Self {
            category,
            data,
            lifetime: LifetimeManager::new(lifetime),
            members: members.into(),
            require_build,
            pipelines: ArcSwap::from_pointee(Vec::new()),
            sync: ReentrantMutex::new(()),
            snapshot: ArcSwapOption::empty(),
        })
    }

    /// Регистрация типа под самим собой
    pub fn uninitialized(lifetime: LifetimeKind) -> Self {
        Self {
            category: Category::Uninitialized,
            data: RegistrationData::None,
            lifetime: LifetimeManager::new(lifetime),
            members: Arc::from(Vec::new()),
            require_build: false,
            pipelines: ArcSwap::from_pointee(Vec::new()),
            sync: ReentrantMutex::new(()),
            snapshot: ArcSwapOption::empty(),
        }
    }

    pub fn for_type(
        implementation: TypeKey,
        lifetime: LifetimeKind,
        members: Vec<InjectionMember>,
    ) -> Result<Self, ContainerError> {
        Self::build(
            Category::Type,
            RegistrationData::Type(implementation),
            lifetime,
            members,
        )
    }

    pub fn for_instance(value: Value, lifetime: LifetimeKind) -> Result<Self, ContainerError> {
        Self::build(
            Category::Instance,
            RegistrationData::Instance(value),
            lifetime,
            Vec::new(),
        )
    }

    pub fn for_factory(
        factory: FactoryDelegate,
        lifetime: LifetimeKind,
    ) -> Result<Self, ContainerError> {
        Self::build(
            Category::Factory,
            RegistrationData::Factory(factory),
            lifetime,
            Vec::new(),
        )
    }

    /// Служебное значение контейнера
    pub(crate) fn internal(value: Value) -> Self {
        Self {
            category: Category::Internal,
            ..Self::uninitialized(LifetimeKind::Singleton)
        }
        .with_data(RegistrationData::Instance(value))
    }

    pub(crate) fn cache() -> Self {
        Self {
            category: Category::Cache,
            ..Self::uninitialized(LifetimeKind::Transient)
        }
    }

    fn with_data(mut self, data: RegistrationData) -> Self {
        self.data = data;
        self
    }

    /// Явно задать, нужен ли полный build вместо mapping
    pub fn with_require_build(mut self, require_build: bool) -> Self {
        self.require_build = require_build;
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn data(&self) -> &RegistrationData {
        &self.data
    }

    pub fn implementation(&self) -> Option<TypeKey> {
        match self.data {
            RegistrationData::Type(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn lifetime(&self) -> &LifetimeManager {
        &self.lifetime
    }

    pub fn members(&self) -> &[InjectionMember] {
        &self.members
    }

    pub fn require_build(&self) -> bool {
        self.require_build
    }

    /// Копия конфигурации со свежими слотами и без скомпилированных pipeline
    pub fn clone_for_instantiation(&self) -> Self {
        Self {
            category: self.category,
            data: self.data.clone(),
            lifetime: self.lifetime.fresh(),
            members: Arc::clone(&self.members),
            require_build: self.require_build,
            pipelines: ArcSwap::from_pointee(Vec::new()),
            sync: ReentrantMutex::new(()),
            snapshot: ArcSwapOption::empty(),
        }
    }

    /// Клон для закрытого generic-типа: открытая реализация заменяется закрытой
    pub(crate) fn instantiate(&self, generic: TypeKey, closed: TypeKey) -> Self {
        let mut clone = self.clone_for_instantiation();
        match clone.data {
            RegistrationData::Type(implementation) if implementation == generic => {
                clone.data = RegistrationData::Type(closed);
            }
            RegistrationData::None => {
                clone.category = Category::Type;
                clone.data = RegistrationData::Type(closed);
            }
            _ => {}
        }
        clone
    }

    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.sync.lock()
    }

    /// Скомпилированный pipeline для scope, если уже есть
    pub fn pipeline(&self, scope: ScopeId) -> Option<Pipeline> {
        self.pipelines
            .load()
            .iter()
            .find(|(id, _)| *id == scope)
            .map(|(_, pipeline)| Arc::clone(pipeline))
    }

    /// Double-checked: lock-free поиск, затем повторная проверка под lock менеджера
    pub(crate) fn pipeline_or_insert(
        &self,
        scope: ScopeId,
        compile: impl FnOnce() -> Option<Pipeline>,
    ) -> Option<Pipeline> {
        if let Some(pipeline) = self.pipeline(scope) {
            return Some(pipeline);
        }

        let _guard = self.sync.lock();
        if let Some(pipeline) = self.pipeline(scope) {
            return Some(pipeline);
        }

        let pipeline = compile()?;
        let mut pipelines = (**self.pipelines.load()).clone();
        pipelines.push((scope, Arc::clone(&pipeline)));
        self.pipelines.store(Arc::new(pipelines));
        debug!(scope, category = ?self.category, "Pipeline compiled for registration");
        Some(pipeline)
    }

    /// Сбросить скомпилированные pipeline (после изменения цепочек или регистрации)
    pub fn invalidate_pipelines(&self) {
        let _guard = self.sync.lock();
        self.pipelines.store(Arc::new(Vec::new()));
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.load().len()
    }

    pub(crate) fn snapshot(&self) -> Option<Arc<EnumerationSnapshot>> {
        self.snapshot.load_full()
    }

    pub(crate) fn set_snapshot(&self, snapshot: EnumerationSnapshot) -> Arc<EnumerationSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshot.store(Some(Arc::clone(&snapshot)));
        snapshot
    }
}

impl std::fmt::Debug for RegistrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationManager")
            .field("category", &self.category)
            .field("implementation", &self.implementation())
            .field("lifetime", &self.lifetime.kind())
            .field("require_build", &self.require_build)
            .field("pipelines", &self.pipeline_count())
            .finish()
    }
}
