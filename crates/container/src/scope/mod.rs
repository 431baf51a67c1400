//! Scope: иерархическое хранилище contract -> registration manager
//!
//! Каждый scope владеет своей таблицей и ссылается на родителя (`next`).
//! Родитель никогда не изменяется через ребенка. Запись идет под одним lock
//! на scope, чтение - lock-free через copy-on-write снимок (`ArcSwap`).

mod enumerator;

pub use enumerator::Registrations;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::contract::{name_hash, Contract, TypeKey};
use crate::registration::RegistrationManager;
use crate::storage::{Hashed, Table};

pub type ScopeId = u64;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Запись таблицы контрактов
#[derive(Clone)]
pub struct ScopeEntry {
    pub contract: Contract,
    pub manager: Arc<RegistrationManager>,
}

impl Hashed for ScopeEntry {
    fn hash_code(&self) -> u32 {
        self.contract.hash_code()
    }
}

/// Индекс имени: интернированная строка + записи, зарегистрированные под ним
#[derive(Clone)]
pub(crate) struct NameInfo {
    name: Arc<str>,
    hash: u32,
    entries: Vec<usize>,
}

impl Hashed for NameInfo {
    fn hash_code(&self) -> u32 {
        self.hash
    }
}

#[derive(Clone)]
pub(crate) struct ScopeData {
    pub(crate) contracts: Table<ScopeEntry>,
    names: Table<NameInfo>,
}

/// Пакетная регистрация: менеджер под набором типов с общим именем
#[derive(Clone)]
pub struct RegistrationDescriptor {
    pub name: Option<Arc<str>>,
    pub manager: Arc<RegistrationManager>,
    pub register_as: Vec<TypeKey>,
}

impl RegistrationDescriptor {
    pub fn new(manager: RegistrationManager, register_as: Vec<TypeKey>) -> Self {
        Self {
            name: None,
            manager: Arc::new(manager),
            register_as,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(Arc::from(name));
        self
    }
}

type DisposeAction = Box<dyn FnOnce() + Send>;

pub struct Scope {
    id: ScopeId,
    level: usize,
    next: Option<Arc<Scope>>,
    data: ArcSwap<ScopeData>,
    version: AtomicU64,
    sync: Mutex<()>,
    enumeration: Mutex<Option<enumerator::Snapshot>>,
    disposables: Mutex<Vec<DisposeAction>>,
    disposed: AtomicBool,
}

impl Scope {
    /// Корневой scope
    pub fn new(capacity: usize) -> Self {
        Self::create(None, capacity)
    }

    fn create(next: Option<Arc<Scope>>, capacity: usize) -> Self {
        let level = next.as_ref().map_or(0, |parent| parent.level + 1);
        Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            level,
            next,
            data: ArcSwap::from_pointee(ScopeData {
                contracts: Table::with_capacity(capacity),
                names: Table::with_capacity(0),
            }),
            version: AtomicU64::new(0),
            sync: Mutex::new(()),
            enumeration: Mutex::new(None),
            disposables: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Дочерний scope; записи родителя не копируются
    pub fn create_child_scope(self: &Arc<Self>, capacity: usize) -> Arc<Scope> {
        Arc::new(Self::create(Some(Arc::clone(self)), capacity))
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.next.as_ref()
    }

    /// Версия увеличивается при каждом изменении регистраций
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Сумма версий по всей цепочке предков: меняется при любом изменении в любом из них
    pub fn ancestry_version(&self) -> u64 {
        self.ancestry().map(Scope::version).sum()
    }

    /// Этот scope и все предки, от листа к корню
    pub fn ancestry(&self) -> impl Iterator<Item = &Scope> + '_ {
        std::iter::successors(Some(self), |scope| scope.next.as_deref())
    }

    /// Количество записей только в этом scope
    pub fn len(&self) -> usize {
        self.data.load().contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Зарегистрировать менеджер под анонимными контрактами каждого типа
    pub fn add(&self, manager: Arc<RegistrationManager>, types: &[Option<TypeKey>]) {
        let _guard = self.sync.lock();
        let mut data = (**self.data.load()).clone();

        for ty in types.iter().flatten() {
            Self::insert(&mut data, Contract::anonymous(*ty), Arc::clone(&manager));
            self.version.fetch_add(1, Ordering::AcqRel);
        }

        self.data.store(Arc::new(data));
    }

    /// Пакетная регистрация; место резервируется один раз
    pub fn add_descriptors(&self, descriptors: &[RegistrationDescriptor]) {
        let required: usize = descriptors.iter().map(|d| d.register_as.len()).sum();

        let _guard = self.sync.lock();
        let mut data = (**self.data.load()).clone();
        data.contracts.expand(data.contracts.len() + required);

        for descriptor in descriptors {
            let name = descriptor
                .name
                .as_ref()
                .map(|name| Self::intern(&mut data, name));

            for ty in &descriptor.register_as {
                let contract = Contract::with_shared_name(*ty, name.clone());
                let index = Self::insert(&mut data, contract, Arc::clone(&descriptor.manager));
                if let Some(name) = &name {
                    Self::index_name(&mut data, name, index);
                }
                self.version.fetch_add(1, Ordering::AcqRel);
            }
        }

        debug!(
            scope = self.id,
            added = required,
            total = data.contracts.len(),
            "Registrations added"
        );
        self.data.store(Arc::new(data));
    }

    fn insert(data: &mut ScopeData, contract: Contract, manager: Arc<RegistrationManager>) -> usize {
        let hash = contract.hash_code();
        match data.contracts.find(hash, |entry| entry.contract == contract) {
            Some(index) => {
                data.contracts.replace(index, ScopeEntry { contract, manager });
                index
            }
            None => data.contracts.push(ScopeEntry { contract, manager }),
        }
    }

    fn intern(data: &mut ScopeData, name: &Arc<str>) -> Arc<str> {
        let hash = name_hash(Some(&**name));
        let (_, info) = data.names.find_or_push(
            hash,
            |info| *info.name == **name,
            || NameInfo {
                name: Arc::clone(name),
                hash,
                entries: Vec::new(),
            },
        );
        Arc::clone(&info.name)
    }

    fn index_name(data: &mut ScopeData, name: &Arc<str>, entry: usize) {
        let hash = name_hash(Some(&**name));
        if let Some(index) = data.names.find(hash, |info| *info.name == **name) {
            if let Some(info) = data.names.get_mut(index) {
                if !info.entries.contains(&entry) {
                    info.entries.push(entry);
                }
            }
        }
    }

    fn find_local(&self, contract: &Contract) -> Option<Arc<RegistrationManager>> {
        let data = self.data.load();
        data.contracts
            .find(contract.hash_code(), |entry| entry.contract == *contract)
            .and_then(|index| data.contracts.get(index))
            .map(|entry| Arc::clone(&entry.manager))
    }

    pub fn contains(&self, contract: &Contract) -> bool {
        self.ancestry().any(|scope| scope.find_local(contract).is_some())
    }

    /// Менеджер ближайшего scope, где зарегистрирован контракт
    pub fn get(&self, contract: &Contract) -> Option<Arc<RegistrationManager>> {
        self.locate(contract).map(|(_, manager)| manager)
    }

    /// Только этот scope, без предков
    pub fn get_local(&self, contract: &Contract) -> Option<Arc<RegistrationManager>> {
        self.find_local(contract)
    }

    /// Предок на расстоянии `depth`; 0 - сам scope
    pub fn ancestor(self: &Arc<Self>, depth: usize) -> Option<&Arc<Scope>> {
        let mut current = self;
        for _ in 0..depth {
            current = current.next.as_ref()?;
        }
        Some(current)
    }

    /// Расстояние до ближайшего scope, где зарегистрирован контракт
    pub fn owner_depth(&self, contract: &Contract) -> Option<usize> {
        self.ancestry().position(|scope| scope.find_local(contract).is_some())
    }

    /// Менеджер вместе со scope, которому принадлежит регистрация
    pub fn locate(&self, contract: &Contract) -> Option<(&Scope, Arc<RegistrationManager>)> {
        self.ancestry()
            .find_map(|scope| scope.find_local(contract).map(|manager| (scope, manager)))
    }

    /// Закрытый generic-контракт через открытую фабрику `generic`
    ///
    /// Клон менеджера фабрики вставляется в этот scope; повторная проверка под lock
    /// гарантирует не больше одного менеджера на контракт при конкурентном доступе.
    pub fn get_generic(
        &self,
        contract: &Contract,
        generic: &Contract,
    ) -> Option<Arc<RegistrationManager>> {
        if let Some(manager) = self.find_local(contract) {
            return Some(manager);
        }

        let factory = self.get(generic)?;

        let _guard = self.sync.lock();
        if let Some(manager) = self.find_local(contract) {
            return Some(manager);
        }

        let manager = Arc::new(factory.instantiate(generic.ty(), contract.ty()));
        let mut data = (**self.data.load()).clone();
        Self::insert(&mut data, contract.clone(), Arc::clone(&manager));
        self.data.store(Arc::new(data));
        self.version.fetch_add(1, Ordering::AcqRel);

        debug!(scope = self.id, %contract, %generic, "Generic registration instantiated");
        Some(manager)
    }

    /// Служебный менеджер категории Cache; вставка не меняет версию scope
    pub(crate) fn get_cache(
        &self,
        contract: &Contract,
        create: impl FnOnce() -> RegistrationManager,
    ) -> Arc<RegistrationManager> {
        if let Some(manager) = self.find_local(contract) {
            return manager;
        }

        let _guard = self.sync.lock();
        if let Some(manager) = self.find_local(contract) {
            return manager;
        }

        let manager = Arc::new(create());
        let mut data = (**self.data.load()).clone();
        Self::insert(&mut data, contract.clone(), Arc::clone(&manager));
        self.data.store(Arc::new(data));

        trace!(scope = self.id, %contract, "Cache registration created");
        manager
    }

    /// Все регистрации цепочки без дубликатов; ребенок перекрывает родителя
    pub fn registrations(&self) -> Registrations {
        enumerator::registrations(self)
    }

    /// Контракты, зарегистрированные под именем, по всей цепочке предков
    pub fn named(&self, name: &str) -> Vec<Contract> {
        let hash = name_hash(Some(name));
        let mut contracts: Vec<Contract> = Vec::new();

        for scope in self.ancestry() {
            let data = scope.data.load();
            let Some(index) = data.names.find(hash, |info| &*info.name == name) else {
                continue;
            };
            let Some(info) = data.names.get(index) else {
                continue;
            };
            for entry in &info.entries {
                if let Some(entry) = data.contracts.get(*entry) {
                    if !contracts.contains(&entry.contract) {
                        contracts.push(entry.contract.clone());
                    }
                }
            }
        }

        contracts
    }

    pub(crate) fn snapshot(&self) -> Arc<ScopeData> {
        self.data.load_full()
    }

    /// Передать scope владение освобождением значения
    pub fn register_disposable(&self, action: impl FnOnce() + Send + 'static) {
        if self.is_disposed() {
            action();
            return;
        }
        self.disposables.lock().push(Box::new(action));
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Освободить все принадлежащие scope значения ровно один раз
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let actions = std::mem::take(&mut *self.disposables.lock());
        debug!(scope = self.id, count = actions.len(), "Disposing scope");
        for action in actions.into_iter().rev() {
            action();
        }

        for (_, entry) in self.data.load().contracts.iter() {
            entry.manager.invalidate_pipelines();
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("level", &self.level)
            .field("len", &self.len())
            .field("version", &self.version())
            .finish()
    }
}
