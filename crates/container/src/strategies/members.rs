use tracing::trace;

use super::with_target;
use crate::errors::FaultKind;
use crate::injection::InjectionValue;
use crate::pipeline::{BuilderContext, BuilderStrategy};
use crate::selection::{resolve_member, select_best, MatchRank, MemberKind, RankMatch};

/// Заполняет поля: помеченные `is_import` всегда, остальные - если заданы регистрацией
pub struct FieldStrategy;

/// То же для свойств
pub struct PropertyStrategy;

impl BuilderStrategy for FieldStrategy {
    fn pre_build_up(&self, context: &mut BuilderContext<'_>) {
        inject_members(context, MemberKind::Field);
    }
}

impl BuilderStrategy for PropertyStrategy {
    fn pre_build_up(&self, context: &mut BuilderContext<'_>) {
        inject_members(context, MemberKind::Property);
    }
}

fn inject_members(context: &mut BuilderContext<'_>, kind: MemberKind) {
    let registration = context.registration().cloned();
    let configured: Vec<(&str, Option<&InjectionValue>)> = registration
        .as_deref()
        .map(|r| r.members().iter().filter_map(|m| kind.configured(m)).collect())
        .unwrap_or_default();

    let ty = context.target_type();
    let info = match context.type_info(ty) {
        Some(info) => info,
        None if configured.is_empty() => return,
        None => {
            context.fail(
                FaultKind::TypeLoad,
                format!("type {} is not described by the member provider", ty),
            );
            return;
        }
    };
    let declared = kind.declared(&info);

    let mut selected: Vec<(usize, Option<&InjectionValue>)> = Vec::with_capacity(configured.len());
    for &(name, value) in &configured {
        let found = select_best(declared, |member| {
            if &*member.name != name {
                MatchRank::NoMatch
            } else {
                value.map_or(MatchRank::ExactMatch, |value| value.rank_match(member))
            }
        });
        match found {
            Some(index) => selected.push((index, value)),
            None => {
                context.fail(
                    FaultKind::Configuration,
                    format!("type {} has no {} '{}' accepting the configured value", ty, kind.label(), name),
                );
                return;
            }
        }
    }

    for (index, member) in declared.iter().enumerate() {
        let configured = selected.iter().find(|(i, _)| *i == index).map(|(_, value)| *value);
        if !member.is_import && configured.is_none() {
            continue;
        }

        let label = format!("{} {}.{}", kind.label(), ty, member.name);
        let Some(value) = resolve_member(context, ty, kind, member, configured.flatten()) else {
            if !context.is_faulted() {
                context.fail(FaultKind::Configuration, format!("{} could not be resolved", label));
            }
            return;
        };

        if let Err(error) = with_target(context, &label, |target| member.assign(target, value)) {
            context.fail_invoke(&label, error);
            return;
        }
        trace!(member = %label, "Member injected");
    }
}
