use tracing::trace;

use super::{type_info_or_fault, with_target};
use crate::errors::FaultKind;
use crate::injection::{InjectionMember, InjectionValue};
use crate::pipeline::{BuilderContext, BuilderStrategy};
use crate::selection::{resolve_arguments, select_best, MatchRank, RankMatch};

/// Вызывает методы инициализации
///
/// Сначала методы с `is_import` в порядке объявления, затем методы из
/// конфигурации регистрации в порядке регистрации.
pub struct MethodStrategy;

impl BuilderStrategy for MethodStrategy {
    fn pre_build_up(&self, context: &mut BuilderContext<'_>) {
        let registration = context.registration().cloned();
        let configured: Vec<(&str, &[InjectionValue])> = registration
            .as_deref()
            .map(|r| {
                r.members()
                    .iter()
                    .filter_map(|member| match member {
                        InjectionMember::Method { name, args } => Some((name.as_str(), args.as_slice())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let info = if configured.is_empty() {
            match context.type_info(context.target_type()) {
                Some(info) => info,
                None => return,
            }
        } else {
            match type_info_or_fault(context) {
                Some(info) => info,
                None => return,
            }
        };

        let mut calls: Vec<(usize, Option<&[InjectionValue]>)> = info
            .methods
            .iter()
            .enumerate()
            .filter(|(_, method)| method.is_import)
            .map(|(index, _)| (index, None))
            .collect();

        for &(name, args) in &configured {
            let found = select_best(&info.methods, |method| {
                if &*method.name != name {
                    MatchRank::NoMatch
                } else {
                    args.rank_match(method.parameters.as_slice())
                }
            });
            let Some(index) = found else {
                context.fail(
                    FaultKind::Configuration,
                    format!("type {} has no method '{}' matching the configured arguments", info.ty, name),
                );
                return;
            };
            calls.retain(|(call, injected)| *call != index || injected.is_some());
            calls.push((index, Some(args)));
        }

        for (index, injected) in calls {
            let Some(method) = info.methods.get(index) else {
                continue;
            };
            let label = format!("method {}.{}", info.ty, method.name);
            let Some(arguments) =
                resolve_arguments(context, info.ty, &label, &method.parameters, injected)
            else {
                return;
            };

            if let Err(error) = with_target(context, &label, |target| method.invoke(target, &arguments)) {
                context.fail_invoke(&label, error);
                return;
            }
            trace!(method = %label, "Method invoked");
        }
    }
}
