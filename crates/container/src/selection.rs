//! Выбор членов и разрешение значений
//!
//! Порядок источников значения для параметра, поля или свойства:
//! 1. overrides вызова (последний подходящий)
//! 2. значение из конфигурации регистрации
//! 3. рекурсивное разрешение по объявленному типу и имени,
//!    с учетом правила значений по умолчанию

use std::any::Any;
use std::sync::Arc;
use tracing::trace;

use crate::config::DefaultValueRule;
use crate::contract::{Contract, TypeKey, Value};
use crate::errors::FaultKind;
use crate::injection::{InjectionMember, InjectionValue};
use crate::overrides::{find_last, ResolverOverride};
use crate::pipeline::BuilderContext;
use crate::policies::ConstructorSelector;
use crate::reflection::{Arguments, MemberInfo, ParameterInfo, TypeInfo};

/// Насколько значение подходит к члену
///
/// Порядок вариантов задает сравнение: `NoMatch < Partial(_) < ExactMatch`,
/// частичные совпадения сравниваются по счету.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRank {
    NoMatch,
    Partial(u32),
    ExactMatch,
}

pub trait RankMatch<T: ?Sized> {
    fn rank_match(&self, target: &T) -> MatchRank;
}

fn rank_types(declared: TypeKey, supplied: TypeKey) -> MatchRank {
    if declared == supplied {
        MatchRank::ExactMatch
    } else if declared == TypeKey::of::<dyn Any + Send + Sync>() {
        MatchRank::Partial(1)
    } else {
        MatchRank::NoMatch
    }
}

impl RankMatch<ParameterInfo> for InjectionValue {
    fn rank_match(&self, parameter: &ParameterInfo) -> MatchRank {
        match self.declared_type() {
            Some(ty) => rank_types(parameter.ty, ty),
            // фабрика без объявленного типа
            None => MatchRank::Partial(1),
        }
    }
}

impl RankMatch<MemberInfo> for InjectionValue {
    fn rank_match(&self, member: &MemberInfo) -> MatchRank {
        match self.declared_type() {
            Some(ty) => rank_types(member.ty, ty),
            None => MatchRank::Partial(1),
        }
    }
}

impl RankMatch<[ParameterInfo]> for [InjectionValue] {
    fn rank_match(&self, parameters: &[ParameterInfo]) -> MatchRank {
        if self.len() != parameters.len() {
            return MatchRank::NoMatch;
        }

        let mut score = 0;
        let mut exact = true;
        for (value, parameter) in self.iter().zip(parameters) {
            match value.rank_match(parameter) {
                MatchRank::NoMatch => return MatchRank::NoMatch,
                MatchRank::ExactMatch => score += 2,
                MatchRank::Partial(partial) => {
                    exact = false;
                    score += partial;
                }
            }
        }

        if exact {
            MatchRank::ExactMatch
        } else {
            MatchRank::Partial(score)
        }
    }
}

/// Лучший кандидат: exact останавливает поиск, NoMatch пропускается,
/// из частичных побеждает строго лучший (при равенстве - более ранний)
pub fn select_best<T>(candidates: &[T], mut rank: impl FnMut(&T) -> MatchRank) -> Option<usize> {
    let mut best: Option<(usize, MatchRank)> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        match rank(candidate) {
            MatchRank::NoMatch => continue,
            MatchRank::ExactMatch => return Some(index),
            partial => {
                if best.map_or(true, |(_, current)| partial > current) {
                    best = Some((index, partial));
                }
            }
        }
    }

    best.map(|(index, _)| index)
}

fn describe(values: &[InjectionValue]) -> String {
    values
        .iter()
        .map(|value| value.declared_type().map_or("?", |ty| ty.name()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Выбранный конструктор и значения, заданные регистрацией
pub type SelectedConstructor<'m> = (usize, Option<&'m [InjectionValue]>);

/// Выбор конструктора
///
/// 1. сигнатура из конфигурации регистрации
/// 2. единственный конструктор
/// 3. первый помеченный `is_import`
/// 4. алгоритмический выбор из policy `ConstructorSelector`
pub fn select_constructor<'m>(
    context: &mut BuilderContext<'_>,
    info: &TypeInfo,
    members: &'m [InjectionMember],
) -> Result<SelectedConstructor<'m>, String> {
    let injected = members.iter().find_map(|member| match member {
        InjectionMember::Constructor(args) => Some(args.as_slice()),
        _ => None,
    });

    if let Some(args) = injected {
        return select_best(&info.constructors, |constructor| {
            args.rank_match(constructor.parameters.as_slice())
        })
        .map(|index| (index, Some(args)))
        .ok_or_else(|| {
            format!(
                "type {} has no constructor matching the signature ({})",
                info.ty,
                describe(args)
            )
        });
    }

    match info.constructors.len() {
        0 => return Err(format!("type {} has no accessible constructors", info.ty)),
        1 => return Ok((0, None)),
        _ => {}
    }

    if let Some(index) = info.constructors.iter().position(|c| c.is_import) {
        return Ok((index, None));
    }

    let selector = context
        .policies()
        .get_for::<ConstructorSelector>(info.ty)
        .map(|policy| Arc::clone(&policy.0))
        .unwrap_or_else(|| ConstructorSelector::default().0);

    selector(context, info).map(|index| (index, None)).ok_or_else(|| {
        format!(
            "type {} has no constructor whose parameters can all be resolved",
            info.ty
        )
    })
}

/// Конструктор с наибольшим числом параметров, которые все можно разрешить
pub fn select_most_resolvable(context: &mut BuilderContext<'_>, info: &TypeInfo) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;

    for (index, constructor) in info.constructors.iter().enumerate() {
        let arity = constructor.parameters.len();
        if best.map_or(false, |(_, longest)| arity <= longest) {
            continue;
        }
        if constructor
            .parameters
            .iter()
            .all(|parameter| can_resolve(context, info.ty, parameter))
        {
            best = Some((index, arity));
        }
    }

    best.map(|(index, _)| index)
}

/// Может ли параметр получить значение без сборки
pub fn can_resolve(context: &BuilderContext<'_>, declaring: TypeKey, parameter: &ParameterInfo) -> bool {
    if find_last(context.overrides(), |o| o.matches_parameter(declaring, parameter)).is_some() {
        return true;
    }
    if parameter.default.is_some() {
        return true;
    }

    let contract = parameter.contract();
    // массив может быть пустым, отложенный запрос строится всегда
    if contract.ty().is_array() || contract.ty().is_deferred() || context.scope().contains(&contract) {
        return true;
    }

    match context.type_info(parameter.ty) {
        Some(info) => match info.generic_definition {
            Some(generic) => context
                .scope()
                .contains(&Contract::with_shared_name(generic, contract.shared_name().cloned())),
            None => !info.constructors.is_empty(),
        },
        None => false,
    }
}

/// Значение из конфигурации или override
pub fn evaluate(
    context: &mut BuilderContext<'_>,
    value: &InjectionValue,
    fallback_name: Option<&Arc<str>>,
) -> Option<Value> {
    match value {
        InjectionValue::Value { value, .. } => Some(Arc::clone(value)),
        InjectionValue::Factory { factory, .. } => {
            let factory = Arc::clone(factory);
            let mark = context.frame_mut().mark();
            match factory(context) {
                Ok(value) => {
                    // фабрика обработала сбой вложенного разрешения сама
                    context.frame_mut().restore(mark);
                    Some(value)
                }
                Err(error) => {
                    context.fail_with(
                        FaultKind::User,
                        format!("injection factory failed: {}", error),
                        Some(error),
                    );
                    None
                }
            }
        }
        InjectionValue::Resolve { .. } | InjectionValue::Type(_) => {
            let contract = value.contract(fallback_name)?;
            context.resolve_contract(contract)
        }
    }
}

/// Значение параметра конструктора или метода
pub fn resolve_parameter(
    context: &mut BuilderContext<'_>,
    declaring: TypeKey,
    parameter: &ParameterInfo,
    injected: Option<&InjectionValue>,
) -> Option<Value> {
    let overridden = find_last(context.overrides(), |o| o.matches_parameter(declaring, parameter))
        .map(|o| o.value().clone());
    if let Some(value) = overridden {
        trace!(parameter = %parameter.name, %declaring, "Parameter overridden");
        return evaluate(context, &value, parameter.contract_name.as_ref());
    }

    if let Some(value) = injected {
        return evaluate(context, value, parameter.contract_name.as_ref());
    }

    let contract = parameter.contract();
    if let Some(default) = &parameter.default {
        let rule = context
            .policies()
            .get::<DefaultValueRule>()
            .map_or(DefaultValueRule::default(), |rule| *rule);
        let use_default = match rule {
            DefaultValueRule::Always => true,
            DefaultValueRule::OnFailure => !context.scope().contains(&contract),
            DefaultValueRule::Never => false,
        };
        if use_default {
            trace!(parameter = %parameter.name, %declaring, "Default value used");
            return Some(Arc::clone(default));
        }
    }

    context.resolve_contract(contract)
}

/// Разрешить все параметры; сбой записывается в контекст
pub fn resolve_arguments(
    context: &mut BuilderContext<'_>,
    declaring: TypeKey,
    member: &str,
    parameters: &[ParameterInfo],
    injected: Option<&[InjectionValue]>,
) -> Option<Arguments> {
    let mut values = Vec::with_capacity(parameters.len());

    for (position, parameter) in parameters.iter().enumerate() {
        let value = injected.and_then(|values| values.get(position));
        match resolve_parameter(context, declaring, parameter, value) {
            Some(value) => values.push(value),
            None => {
                if !context.is_faulted() {
                    context.fail(
                        FaultKind::Configuration,
                        format!("parameter '{}' of {} could not be resolved", parameter.name, member),
                    );
                }
                return None;
            }
        }
    }

    Some(Arguments::new(values))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Property,
}

impl MemberKind {
    pub fn label(self) -> &'static str {
        match self {
            MemberKind::Field => "field",
            MemberKind::Property => "property",
        }
    }

    pub fn declared(self, info: &TypeInfo) -> &[MemberInfo] {
        match self {
            MemberKind::Field => &info.fields,
            MemberKind::Property => &info.properties,
        }
    }

    /// Имя и значение члена этого вида из конфигурации регистрации
    pub fn configured(self, member: &InjectionMember) -> Option<(&str, Option<&InjectionValue>)> {
        match (self, member) {
            (MemberKind::Field, InjectionMember::Field { name, value })
            | (MemberKind::Property, InjectionMember::Property { name, value }) => {
                Some((name.as_str(), value.as_ref()))
            }
            _ => None,
        }
    }

    fn overrides(self, candidate: &ResolverOverride, declaring: TypeKey, member: &MemberInfo) -> bool {
        match self {
            MemberKind::Field => candidate.matches_field(declaring, member),
            MemberKind::Property => candidate.matches_property(declaring, member),
        }
    }
}

/// Значение поля или свойства
pub fn resolve_member(
    context: &mut BuilderContext<'_>,
    declaring: TypeKey,
    kind: MemberKind,
    member: &MemberInfo,
    configured: Option<&InjectionValue>,
) -> Option<Value> {
    let overridden = find_last(context.overrides(), |o| kind.overrides(o, declaring, member))
        .map(|o| o.value().clone());
    if let Some(value) = overridden {
        return evaluate(context, &value, member.contract_name.as_ref());
    }

    match configured {
        Some(value) => evaluate(context, value, member.contract_name.as_ref()),
        None => context.resolve_contract(member.contract()),
    }
}
