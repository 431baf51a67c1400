//! Алгоритмы разрешения верхнего уровня
//!
//! - зарегистрированный контракт: lifetime fast path, pipeline менеджера для
//!   scope, сохранение результата в lifetime
//! - незарегистрированный тип: generic-фабрика или Type pipeline напрямую
//! - массив: все живые регистрации типа элемента по цепочке scope, каждая
//!   строится в scope своей регистрации
//! - отложенный запрос: цель не строится, возвращается `Deferred`

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::ArrayFailurePolicy;
use crate::contract::{Contract, TypeKey, Value};
use crate::deferred::Deferred;
use crate::errors::FaultKind;
use crate::injection::InjectionValue;
use crate::lifetime::LifetimeKind;
use crate::overrides::find_last;
use crate::pipeline::{BuilderContext, Existing, ResolutionFrame};
use crate::policies::{PipelineKind, Policies};
use crate::registration::{Category, EnumerationSnapshot, RegistrationManager};
use crate::scope::Scope;
use crate::selection;

/// Ключ менеджера в арене запросов; 0 - незарегистрированный тип
fn manager_key(manager: &Arc<RegistrationManager>) -> usize {
    Arc::as_ptr(manager) as usize
}

/// Записать сбой для запроса без pipeline
fn fault(
    scope: &Arc<Scope>,
    policies: &Arc<Policies>,
    frame: &mut ResolutionFrame,
    index: usize,
    contract: Contract,
    kind: FaultKind,
    message: String,
) {
    let ty = contract.ty();
    let mut context = BuilderContext::new(scope, policies, frame, index, contract, None, ty, None);
    context.fail(kind, message);
}

/// Разрешить контракт в scope; `None` - сбой записан во фрейм
pub(crate) fn resolve_in(
    scope: &Arc<Scope>,
    policies: &Arc<Policies>,
    frame: &mut ResolutionFrame,
    parent: Option<usize>,
    contract: Contract,
    existing: Option<Existing>,
) -> Option<Value> {
    if existing.is_none() {
        if contract.ty().is_array() {
            return resolve_array(scope, policies, frame, parent, contract);
        }
        if contract.ty().is_deferred() {
            return resolve_deferred(scope, policies, frame, parent, contract);
        }
    }

    match scope.locate(&contract) {
        Some((owner, manager)) => {
            resolve_registered(scope, owner, policies, frame, parent, contract, manager, existing)
        }
        None => resolve_unregistered(scope, policies, frame, parent, contract, existing),
    }
}

/// Результат pipeline: значение или записанный сбой
fn finish(context: &mut BuilderContext<'_>) -> Option<Value> {
    if context.is_faulted() {
        return None;
    }
    match context.take_existing() {
        Some(built) => Some(built.into_value()),
        None => {
            context.fail(FaultKind::Configuration, "the build produced no value");
            None
        }
    }
}

fn pipeline_kind(manager: &RegistrationManager, contract: &Contract) -> PipelineKind {
    match manager.category() {
        Category::Factory => PipelineKind::Factory,
        Category::Instance | Category::Internal => PipelineKind::Instance,
        Category::Type
            if !manager.require_build() && manager.implementation() != Some(contract.ty()) =>
        {
            PipelineKind::Mapping
        }
        _ => PipelineKind::Type,
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_registered(
    scope: &Arc<Scope>,
    owner: &Scope,
    policies: &Arc<Policies>,
    frame: &mut ResolutionFrame,
    parent: Option<usize>,
    contract: Contract,
    manager: Arc<RegistrationManager>,
    existing: Option<Existing>,
) -> Option<Value> {
    let lifetime = manager.lifetime();
    if lifetime.kind() == LifetimeKind::Singleton && owner.is_disposed() {
        // владелец уже освободил свои значения
        let index = frame.push_request(contract.clone(), parent, manager_key(&manager));
        let message = format!("{} is owned by disposed scope {}", contract, owner.id());
        fault(scope, policies, frame, index, contract, FaultKind::Configuration, message);
        return None;
    }

    if existing.is_none() {
        if let Some(value) = lifetime.get_value(scope.id(), frame) {
            trace!(%contract, lifetime = ?lifetime.kind(), cache_hit = true, "Lifetime hit");
            return Some(value);
        }
    }

    let index = frame.push_request(contract.clone(), parent, manager_key(&manager));
    if frame.find_cycle(index) {
        let message = format!("circular dependency on {}", contract);
        fault(scope, policies, frame, index, contract, FaultKind::Cycle, message);
        return None;
    }

    let _guard = lifetime.kind().is_synchronized().then(|| manager.lock());
    if existing.is_none() {
        if let Some(value) = lifetime.get_value(scope.id(), frame) {
            return Some(value);
        }
    }

    let kind = pipeline_kind(&manager, &contract);
    let Some(pipeline) = manager.pipeline_or_insert(scope.id(), || policies.pipeline(kind)) else {
        let message = format!("no {:?} pipeline is configured", kind);
        fault(scope, policies, frame, index, contract, FaultKind::Configuration, message);
        return None;
    };

    let target = match kind {
        PipelineKind::Type | PipelineKind::Mapping => {
            manager.implementation().unwrap_or_else(|| contract.ty())
        }
        PipelineKind::Instance | PipelineKind::Factory => contract.ty(),
    };

    let since = lifetime.publications();
    let built = {
        let mut context = BuilderContext::new(
            scope,
            policies,
            frame,
            index,
            contract.clone(),
            Some(Arc::clone(&manager)),
            target,
            existing,
        );
        pipeline(&mut context);
        finish(&mut context)
    };

    let Some(value) = built else {
        lifetime.recover(scope.id(), since);
        return None;
    };

    lifetime.set_value(Arc::clone(&value), scope.id(), frame);
    match lifetime.kind() {
        LifetimeKind::Singleton => register_disposal(owner, policies, &value),
        LifetimeKind::Hierarchical | LifetimeKind::ContainerTransient => {
            register_disposal(scope, policies, &value)
        }
        _ => {}
    }

    trace!(%contract, ?kind, depth = frame.depth(index), cache_hit = false, "Registered contract resolved");
    Some(value)
}

/// Передать scope освобождение значения, если для его типа описан disposer
fn register_disposal(scope: &Scope, policies: &Policies, value: &Value) {
    let ty = TypeKey::of_value(&**value);
    let Some(disposer) = policies
        .member_provider()
        .type_info(ty)
        .and_then(|info| info.disposer.clone())
    else {
        return;
    };

    let value = Arc::clone(value);
    scope.register_disposable(move || disposer(&value));
    trace!(scope = scope.id(), %ty, "Disposable value owned by scope");
}

fn resolve_unregistered(
    scope: &Arc<Scope>,
    policies: &Arc<Policies>,
    frame: &mut ResolutionFrame,
    parent: Option<usize>,
    contract: Contract,
    existing: Option<Existing>,
) -> Option<Value> {
    let generic = policies
        .member_provider()
        .type_info(contract.ty())
        .and_then(|info| info.generic_definition);
    if let Some(generic) = generic {
        let generic = Contract::with_shared_name(generic, contract.shared_name().cloned());
        if let Some(manager) = scope.get_generic(&contract, &generic) {
            return resolve_registered(scope, scope, policies, frame, parent, contract, manager, existing);
        }
    }

    let index = frame.push_request(contract.clone(), parent, 0);
    if frame.find_cycle(index) {
        let message = format!("circular dependency on {}", contract);
        fault(scope, policies, frame, index, contract, FaultKind::Cycle, message);
        return None;
    }

    let Some(pipeline) = policies.pipeline(PipelineKind::Type) else {
        let message = "no Type pipeline is configured".to_string();
        fault(scope, policies, frame, index, contract, FaultKind::Configuration, message);
        return None;
    };

    let target = contract.ty();
    let mut context =
        BuilderContext::new(scope, policies, frame, index, contract, None, target, existing);
    pipeline(&mut context);
    finish(&mut context)
}

/// Контракты элементов массива, версионированные по цепочке scope
fn element_contracts(
    scope: &Scope,
    manager: &RegistrationManager,
    element: TypeKey,
) -> Arc<EnumerationSnapshot> {
    let version = scope.ancestry_version();
    if let Some(snapshot) = manager.snapshot().filter(|s| s.version == version) {
        return snapshot;
    }

    let _guard = manager.lock();
    if let Some(snapshot) = manager.snapshot().filter(|s| s.version == version) {
        return snapshot;
    }

    let elements: Vec<(Contract, usize)> = scope
        .registrations()
        .filter(|entry| entry.contract.ty() == element)
        .map(|entry| {
            let depth = scope.owner_depth(&entry.contract).unwrap_or(0);
            (entry.contract, depth)
        })
        .collect();
    debug!(scope = scope.id(), %element, count = elements.len(), version, "Array snapshot rebuilt");
    manager.set_snapshot(EnumerationSnapshot { version, elements })
}

fn resolve_array(
    scope: &Arc<Scope>,
    policies: &Arc<Policies>,
    frame: &mut ResolutionFrame,
    parent: Option<usize>,
    contract: Contract,
) -> Option<Value> {
    let manager = scope.get_cache(&contract, RegistrationManager::cache);
    let index = frame.push_request(contract.clone(), parent, manager_key(&manager));

    let Some(element) = contract.ty().element() else {
        let message = format!("{} is not an array contract", contract);
        fault(scope, policies, frame, index, contract, FaultKind::Configuration, message);
        return None;
    };

    let snapshot = element_contracts(scope, &manager, element);
    let policy = policies
        .get::<ArrayFailurePolicy>()
        .map_or(ArrayFailurePolicy::default(), |policy| *policy);

    let mut values: Vec<Value> = Vec::with_capacity(snapshot.elements.len());
    for (item, depth) in &snapshot.elements {
        // элемент строится в scope, где он зарегистрирован
        let owner = scope.ancestor(*depth).unwrap_or(scope);
        let mark = frame.mark();
        if let Some(value) = resolve_in(owner, policies, frame, Some(index), item.clone(), None) {
            values.push(value);
            continue;
        }

        let skip = match policy {
            ArrayFailurePolicy::SkipAll => true,
            ArrayFailurePolicy::SkipTypeLoadErrors => frame
                .fault()
                .map_or(false, |fault| fault.kind == FaultKind::TypeLoad),
            ArrayFailurePolicy::Fail => false,
        };
        if !skip {
            return None;
        }

        if let Some(skipped) = frame.restore(mark) {
            warn!(array = %contract, element = %item, reason = %skipped.message, "Array element skipped");
        }
    }

    values.shrink_to_fit();
    trace!(array = %contract, count = values.len(), "Array resolved");
    Some(Arc::new(values))
}

/// `Lazy`/`Func`: запрос запоминается вместе с scope, цель разрешается позже
fn resolve_deferred(
    scope: &Arc<Scope>,
    policies: &Arc<Policies>,
    frame: &mut ResolutionFrame,
    parent: Option<usize>,
    contract: Contract,
) -> Option<Value> {
    let index = frame.push_request(contract.clone(), parent, 0);
    let Some(target) = contract.ty().target() else {
        let message = format!("{} is not a deferred contract", contract);
        fault(scope, policies, frame, index, contract, FaultKind::Configuration, message);
        return None;
    };

    let target = Contract::with_shared_name(target, contract.shared_name().cloned());
    trace!(%target, depth = frame.depth(index), "Deferred resolution handed out");
    let deferred = Deferred::new(scope, policies, target, frame.detects_cycles());
    Some(Arc::new(deferred))
}

/// Вложенное разрешение из стратегии или фабрики
///
/// Dependency overrides проверяются один раз; значение override не
/// проходит повторную проверку overrides.
pub(crate) fn resolve_dependency(context: &mut BuilderContext<'_>, contract: Contract) -> Option<Value> {
    let overridden = find_last(context.overrides(), |o| o.matches_dependency(&contract))
        .map(|o| o.value().clone());

    let contract = match overridden {
        None => contract,
        Some(value @ (InjectionValue::Value { .. } | InjectionValue::Factory { .. })) => {
            return selection::evaluate(context, &value, None);
        }
        Some(value) => value.contract(contract.shared_name()).unwrap_or(contract),
    };

    let scope = context.scope();
    let policies = context.policies();
    let parent = Some(context.index());
    resolve_in(scope, policies, context.frame_mut(), parent, contract, None)
}

/// Build-up существующего объекта через Type pipeline; lifetime не используется
pub(crate) fn build_up(
    scope: &Arc<Scope>,
    policies: &Arc<Policies>,
    frame: &mut ResolutionFrame,
    contract: Contract,
    instance: Existing,
) -> Option<Value> {
    let registration = scope.get(&contract);
    let index = frame.push_request(contract.clone(), None, registration.as_ref().map_or(0, manager_key));

    let Some(pipeline) = policies.pipeline(PipelineKind::Type) else {
        let message = "no Type pipeline is configured".to_string();
        fault(scope, policies, frame, index, contract, FaultKind::Configuration, message);
        return None;
    };

    let target = contract.ty();
    let mut context = BuilderContext::new(
        scope,
        policies,
        frame,
        index,
        contract,
        registration,
        target,
        Some(instance),
    );
    pipeline(&mut context);
    finish(&mut context)
}
