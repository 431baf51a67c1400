//! Policies: хранилище настроек контейнера с ключом `(target?, тип policy)`
//!
//! Одно хранилище на дерево контейнеров. Чтение lock-free через снимок,
//! любые изменения идут под одним lock. Подписчики слота вызываются
//! синхронно после освобождения lock, до возврата из `set`.

pub mod defaults;

pub use defaults::{
    CompiledPipeline, ConstructorSelector, FactoryCategory, InstanceCategory, MappingCategory,
    MemberProviderPolicy, PipelineFactory, PipelineKind, TypeCategory,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tracing::trace;

use crate::config::ContainerConfig;
use crate::contract::{combine, TypeKey, Value};
use crate::pipeline::{Pipeline, StagedStrategyChain};
use crate::reflection::{MemberProvider, TypeCatalog};
use crate::storage::{Hashed, Table};

/// Подписчик слота: `(target, policy, новое значение)`; `None` после `clear`
pub type PolicyHandler = Arc<dyn Fn(Option<TypeKey>, TypeKey, Option<&Value>) + Send + Sync>;

#[derive(Clone)]
struct PolicyEntry {
    target: Option<TypeKey>,
    policy: TypeKey,
    hash: u32,
    value: Option<Value>,
    handlers: Vec<PolicyHandler>,
}

impl Hashed for PolicyEntry {
    fn hash_code(&self) -> u32 {
        self.hash
    }
}

fn key_hash(target: Option<TypeKey>, policy: TypeKey) -> u32 {
    combine(target.map_or(0, |t| t.hash_code()), policy.hash_code())
}

pub struct Policies {
    data: ArcSwap<Table<PolicyEntry>>,
    sync: Mutex<()>,
}

impl Policies {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: ArcSwap::from_pointee(Table::with_capacity(capacity)),
            sync: Mutex::new(()),
        }
    }

    /// Хранилище со всеми политиками по умолчанию и цепочками стратегий
    pub fn with_defaults(config: &ContainerConfig, provider: Arc<dyn MemberProvider>) -> Arc<Self> {
        let policies = Arc::new(Self::new(config.policy_capacity));
        defaults::install(&policies, config, provider);
        policies
    }

    fn find(data: &Table<PolicyEntry>, target: Option<TypeKey>, policy: TypeKey) -> Option<usize> {
        data.find(key_hash(target, policy), |entry| {
            entry.target == target && entry.policy == policy
        })
    }

    /// Изменить слот под lock (отсутствующий слот создается пустым);
    /// возвращает результат `f` и подписчиков слота
    fn update<R>(
        &self,
        target: Option<TypeKey>,
        policy: TypeKey,
        f: impl FnOnce(&mut PolicyEntry) -> R,
    ) -> (R, Vec<PolicyHandler>) {
        let _guard = self.sync.lock();
        let mut data = (**self.data.load()).clone();

        let hash = key_hash(target, policy);
        let (_, entry) = data.find_or_push(
            hash,
            |entry| entry.target == target && entry.policy == policy,
            || PolicyEntry {
                target,
                policy,
                hash,
                value: None,
                handlers: Vec::new(),
            },
        );
        let result = f(entry);
        let handlers = entry.handlers.clone();

        self.data.store(Arc::new(data));
        (result, handlers)
    }

    pub fn get_raw(&self, target: Option<TypeKey>, policy: TypeKey) -> Option<Value> {
        let data = self.data.load();
        Self::find(&data, target, policy)
            .and_then(|index| data.get(index))
            .and_then(|entry| entry.value.clone())
    }

    pub fn set_raw(&self, target: Option<TypeKey>, policy: TypeKey, value: Value) {
        let (_, handlers) = self.update(target, policy, |entry| {
            entry.value = Some(Arc::clone(&value));
        });
        trace!(?target, %policy, subscribers = handlers.len(), "Policy set");

        for handler in handlers {
            handler(target, policy, Some(&value));
        }
    }

    pub fn clear_raw(&self, target: Option<TypeKey>, policy: TypeKey) {
        if self.get_raw(target, policy).is_none() {
            return;
        }
        let (_, handlers) = self.update(target, policy, |entry| {
            entry.value = None;
        });

        for handler in handlers {
            handler(target, policy, None);
        }
    }

    /// Подписаться на слот (слот создается, если его нет); текущее значение, если есть
    pub fn subscribe_raw(
        &self,
        target: Option<TypeKey>,
        policy: TypeKey,
        on_change: PolicyHandler,
    ) -> Option<Value> {
        self.update(target, policy, |entry| {
            entry.handlers.push(on_change);
            entry.value.clone()
        })
        .0
    }

    /// Существующее значение или `initial`; подписчик добавляется в обоих случаях
    ///
    /// `initial` вызывается под lock хранилища и не должна обращаться к Policies.
    pub fn get_or_add_raw(
        &self,
        target: Option<TypeKey>,
        policy: TypeKey,
        initial: impl FnOnce() -> Value,
        on_change: Option<PolicyHandler>,
    ) -> Value {
        self.update(target, policy, |entry| {
            if let Some(handler) = on_change {
                entry.handlers.push(handler);
            }
            Arc::clone(entry.value.get_or_insert_with(initial))
        })
        .0
    }

    pub fn get<P: Any + Send + Sync>(&self) -> Option<Arc<P>> {
        self.get_raw(None, TypeKey::of::<P>())
            .and_then(|value| value.downcast::<P>().ok())
    }

    /// Значение для `target`, иначе значение без target
    pub fn get_for<P: Any + Send + Sync>(&self, target: TypeKey) -> Option<Arc<P>> {
        let policy = TypeKey::of::<P>();
        self.get_raw(Some(target), policy)
            .or_else(|| self.get_raw(None, policy))
            .and_then(|value| value.downcast::<P>().ok())
    }

    pub fn set<P: Any + Send + Sync>(&self, value: P) {
        self.set_raw(None, TypeKey::of::<P>(), Arc::new(value));
    }

    pub fn set_for<P: Any + Send + Sync>(&self, target: TypeKey, value: P) {
        self.set_raw(Some(target), TypeKey::of::<P>(), Arc::new(value));
    }

    pub fn set_shared_for<P: Any + Send + Sync>(&self, target: TypeKey, value: Arc<P>) {
        self.set_raw(Some(target), TypeKey::of::<P>(), value);
    }

    pub fn clear<P: Any + Send + Sync>(&self) {
        self.clear_raw(None, TypeKey::of::<P>());
    }

    pub fn clear_for<P: Any + Send + Sync>(&self, target: TypeKey) {
        self.clear_raw(Some(target), TypeKey::of::<P>());
    }

    pub fn get_or_add<P: Any + Send + Sync>(
        &self,
        initial: impl FnOnce() -> P,
        on_change: Option<PolicyHandler>,
    ) -> Option<Arc<P>> {
        self.get_or_add_raw(
            None,
            TypeKey::of::<P>(),
            || Arc::new(initial()) as Value,
            on_change,
        )
        .downcast::<P>()
        .ok()
    }

    pub fn subscribe<P: Any + Send + Sync>(&self, on_change: PolicyHandler) -> Option<Arc<P>> {
        self.subscribe_raw(None, TypeKey::of::<P>(), on_change)
            .and_then(|value| value.downcast::<P>().ok())
    }

    pub fn subscribe_for<P: Any + Send + Sync>(
        &self,
        target: TypeKey,
        on_change: PolicyHandler,
    ) -> Option<Arc<P>> {
        self.subscribe_raw(Some(target), TypeKey::of::<P>(), on_change)
            .and_then(|value| value.downcast::<P>().ok())
    }

    /// Количество слотов, включая пустые
    pub fn len(&self) -> usize {
        self.data.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn member_provider(&self) -> Arc<dyn MemberProvider> {
        match self.get::<MemberProviderPolicy>() {
            Some(policy) => Arc::clone(&policy.0),
            None => Arc::new(TypeCatalog::new()),
        }
    }

    /// Текущий скомпилированный pipeline категории
    pub fn pipeline(&self, kind: PipelineKind) -> Option<Pipeline> {
        self.get_for::<CompiledPipeline>(kind.target())
            .map(|compiled| Arc::clone(&compiled.0))
    }

    pub fn chain(&self, kind: PipelineKind) -> Option<Arc<StagedStrategyChain>> {
        self.get_raw(Some(kind.target()), TypeKey::of::<StagedStrategyChain>())
            .and_then(|value| value.downcast::<StagedStrategyChain>().ok())
    }
}

impl std::fmt::Debug for Policies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policies").field("slots", &self.len()).finish()
    }
}
