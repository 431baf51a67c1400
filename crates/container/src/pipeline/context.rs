//! Контекст сборки
//!
//! `ResolutionFrame` создается один раз на верхнеуровневый `resolve` и хранит
//! overrides, сбой, per-resolve значения и арену запросов (родитель по индексу).
//! `BuilderContext` - вид на фрейм для одного запроса; вложенные запросы
//! получают собственный `BuilderContext`, заимствующий тот же фрейм.

use common::OperationTimer;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::algorithms;
use crate::contract::{Contract, TypeKey, Value};
use crate::deferred::{Deferred, Func, Lazy};
use crate::errors::{FaultKind, InvokeError, ResolutionFailed};
use crate::overrides::ResolverOverride;
use crate::policies::Policies;
use crate::reflection::{Instance, TypeInfo};
use crate::registration::RegistrationManager;
use crate::scope::Scope;

/// Сбой, записанный во фрейм
#[derive(Debug)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub contract: Contract,
    pub source: Option<anyhow::Error>,
    /// Запросы от корня до места сбоя
    pub path: Vec<String>,
}

/// Снимок состояния сбоя для отката (используется при пропуске элементов массива)
#[derive(Debug, Clone, Copy)]
pub struct FaultMark {
    faults: u32,
    faulted: bool,
}

struct Request {
    contract: Contract,
    parent: Option<usize>,
    manager: usize,
    depth: usize,
}

pub struct ResolutionFrame {
    overrides: Arc<[ResolverOverride]>,
    requests: Vec<Request>,
    fault: Option<Fault>,
    faults: u32,
    per_resolve: HashMap<usize, Value>,
    detect_cycles: bool,
}

impl ResolutionFrame {
    pub fn new(overrides: Vec<ResolverOverride>) -> Self {
        Self {
            overrides: overrides.into(),
            requests: Vec::new(),
            fault: None,
            faults: 0,
            per_resolve: HashMap::new(),
            detect_cycles: true,
        }
    }

    pub fn with_cycle_detection(mut self, enabled: bool) -> Self {
        self.detect_cycles = enabled;
        self
    }

    pub fn overrides(&self) -> &[ResolverOverride] {
        &self.overrides
    }

    pub fn detects_cycles(&self) -> bool {
        self.detect_cycles
    }

    pub(crate) fn shared_overrides(&self) -> Arc<[ResolverOverride]> {
        Arc::clone(&self.overrides)
    }

    pub(crate) fn push_request(
        &mut self,
        contract: Contract,
        parent: Option<usize>,
        manager: usize,
    ) -> usize {
        let depth = parent
            .and_then(|position| self.requests.get(position))
            .map_or(0, |request| request.depth + 1);
        self.requests.push(Request {
            contract,
            parent,
            manager,
            depth,
        });
        self.requests.len() - 1
    }

    /// Повторный вход в тот же контракт выше по цепочке запросов
    pub(crate) fn find_cycle(&self, index: usize) -> bool {
        if !self.detect_cycles {
            return false;
        }
        let Some(request) = self.requests.get(index) else {
            return false;
        };

        let mut parent = request.parent;
        while let Some(position) = parent {
            let ancestor = &self.requests[position];
            if ancestor.manager == request.manager && ancestor.contract == request.contract {
                return true;
            }
            parent = ancestor.parent;
        }
        false
    }

    /// Цепочка контрактов от корня до запроса
    pub fn path(&self, index: usize) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = Some(index);
        while let Some(position) = current {
            match self.requests.get(position) {
                Some(request) => {
                    path.push(request.contract.to_string());
                    current = request.parent;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Число предков запроса; корневой запрос имеет глубину 0
    pub fn depth(&self, index: usize) -> usize {
        self.requests.get(index).map_or(0, |request| request.depth)
    }

    /// Наибольшая глубина среди всех запросов фрейма
    pub fn max_depth(&self) -> usize {
        self.requests.iter().map(|request| request.depth).max().unwrap_or(0)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn fault_count(&self) -> u32 {
        self.faults
    }

    /// Первый (самый глубокий) сбой сохраняется, остальные только считаются
    pub(crate) fn record_fault(&mut self, fault: Fault) {
        self.faults += 1;
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    pub(crate) fn mark(&self) -> FaultMark {
        FaultMark {
            faults: self.faults,
            faulted: self.fault.is_some(),
        }
    }

    /// Вернуть состояние сбоя к отметке; возвращает снятый сбой
    pub(crate) fn restore(&mut self, mark: FaultMark) -> Option<Fault> {
        self.faults = mark.faults;
        if mark.faulted {
            None
        } else {
            self.fault.take()
        }
    }

    pub(crate) fn per_resolve(&self, key: usize) -> Option<Value> {
        self.per_resolve.get(&key).cloned()
    }

    pub(crate) fn set_per_resolve(&mut self, key: usize, value: Value) {
        self.per_resolve.insert(key, value);
    }

    /// Превратить сбой фрейма в итоговую ошибку для запрошенного контракта
    pub fn into_failure(self, contract: &Contract) -> ResolutionFailed {
        let (kind, message, path, source) = match self.fault {
            Some(fault) => (fault.kind, fault.message, fault.path, fault.source),
            None => (
                FaultKind::Configuration,
                "the build produced no value".to_string(),
                Vec::new(),
                None,
            ),
        };

        ResolutionFailed {
            type_name: contract.ty().name().to_string(),
            name: contract.name().map(str::to_string),
            kind,
            message,
            path,
            source,
        }
    }
}

/// Объект, над которым работает pipeline
pub enum Existing {
    /// Только что созданный объект, стратегии могут его изменять
    Owned(Instance),
    /// Уже опубликованное значение (instance-регистрации, фабрики)
    Shared(Value),
}

impl Existing {
    pub fn as_any(&self) -> &dyn Any {
        match self {
            Existing::Owned(instance) => &**instance,
            Existing::Shared(value) => &**value,
        }
    }

    /// Изменяемый доступ; для разделяемого значения только если ссылка единственная
    pub fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        match self {
            Existing::Owned(instance) => Some(&mut **instance as &mut dyn Any),
            Existing::Shared(value) => Arc::get_mut(value).map(|v| v as &mut dyn Any),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Existing::Owned(instance) => Arc::from(instance),
            Existing::Shared(value) => value,
        }
    }
}

/// Контекст одного запроса внутри фрейма
pub struct BuilderContext<'a> {
    scope: &'a Arc<Scope>,
    policies: &'a Arc<Policies>,
    frame: &'a mut ResolutionFrame,
    index: usize,
    contract: Contract,
    registration: Option<Arc<RegistrationManager>>,
    target: TypeKey,
    existing: Option<Existing>,
    pub(crate) timer: Option<OperationTimer>,
}

impl<'a> BuilderContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scope: &'a Arc<Scope>,
        policies: &'a Arc<Policies>,
        frame: &'a mut ResolutionFrame,
        index: usize,
        contract: Contract,
        registration: Option<Arc<RegistrationManager>>,
        target: TypeKey,
        existing: Option<Existing>,
    ) -> Self {
        Self {
            scope,
            policies,
            frame,
            index,
            contract,
            registration,
            target,
            existing,
            timer: None,
        }
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// Тип, который реально строится (для mapping-регистраций это реализация)
    pub fn target_type(&self) -> TypeKey {
        self.target
    }

    pub fn registration(&self) -> Option<&Arc<RegistrationManager>> {
        self.registration.as_ref()
    }

    pub fn scope(&self) -> &'a Arc<Scope> {
        self.scope
    }

    pub fn policies(&self) -> &'a Arc<Policies> {
        self.policies
    }

    pub fn overrides(&self) -> &[ResolverOverride] {
        self.frame.overrides()
    }

    pub fn depth(&self) -> usize {
        self.frame.depth(self.index)
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn frame_mut(&mut self) -> &mut ResolutionFrame {
        &mut *self.frame
    }

    pub fn existing(&self) -> Option<&Existing> {
        self.existing.as_ref()
    }

    pub fn existing_mut(&mut self) -> Option<&mut Existing> {
        self.existing.as_mut()
    }

    pub fn set_existing(&mut self, existing: Existing) {
        self.existing = Some(existing);
    }

    pub fn take_existing(&mut self) -> Option<Existing> {
        self.existing.take()
    }

    pub fn is_faulted(&self) -> bool {
        self.frame.is_faulted()
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.frame.fault()
    }

    pub fn fault_count(&self) -> u32 {
        self.frame.fault_count()
    }

    /// Записать сбой для текущего контракта
    pub fn fail(&mut self, kind: FaultKind, message: impl Into<String>) {
        self.fail_with(kind, message, None);
    }

    pub fn fail_with(
        &mut self,
        kind: FaultKind,
        message: impl Into<String>,
        source: Option<anyhow::Error>,
    ) {
        let fault = Fault {
            kind,
            message: message.into(),
            contract: self.contract.clone(),
            source,
            path: self.frame.path(self.index),
        };
        self.frame.record_fault(fault);
    }

    /// Ошибка вызова члена: reflection-ошибки несут сообщение, пользовательские - причину
    pub fn fail_invoke(&mut self, member: &str, error: InvokeError) {
        let kind = error.kind();
        match error {
            InvokeError::User(source) => {
                let message = format!("{} failed: {}", member, source);
                self.fail_with(kind, message, Some(source));
            }
            other => self.fail(kind, format!("{}: {}", member, other)),
        }
    }

    pub fn type_info(&self, ty: TypeKey) -> Option<Arc<TypeInfo>> {
        self.policies.member_provider().type_info(ty)
    }

    /// Вложенное разрешение зависимости (dependency overrides учитываются)
    pub fn resolve_contract(&mut self, contract: Contract) -> Option<Value> {
        algorithms::resolve_dependency(self, contract)
    }

    /// Типизированное вложенное разрешение для фабрик
    pub fn resolve<T: Any + Send + Sync>(&mut self) -> anyhow::Result<Arc<T>> {
        self.resolve_typed(Contract::of::<T>())
    }

    pub fn resolve_named<T: Any + Send + Sync>(&mut self, name: &str) -> anyhow::Result<Arc<T>> {
        self.resolve_typed(Contract::named::<T>(name))
    }

    /// Отложенная зависимость: цель строится при первом `get`
    pub fn lazy<T: Any + Send + Sync>(&mut self, name: Option<&str>) -> anyhow::Result<Lazy<T>> {
        self.resolve_deferred::<T>(name).map(Lazy::new)
    }

    pub fn func<T: Any + Send + Sync>(&mut self, name: Option<&str>) -> anyhow::Result<Func<T>> {
        self.resolve_deferred::<T>(name).map(Func::new)
    }

    fn resolve_deferred<T: Any + Send + Sync>(&mut self, name: Option<&str>) -> anyhow::Result<Arc<Deferred>> {
        self.resolve_typed(Contract::new(TypeKey::of::<T>().deferred(), name))
    }

    fn resolve_typed<T: Any + Send + Sync>(&mut self, contract: Contract) -> anyhow::Result<Arc<T>> {
        let value = self
            .resolve_contract(contract.clone())
            .ok_or_else(|| anyhow::anyhow!("dependency {} could not be resolved", contract))?;
        value
            .downcast::<T>()
            .map_err(|_| anyhow::anyhow!("dependency {} is not {}", contract, std::any::type_name::<T>()))
    }
}
