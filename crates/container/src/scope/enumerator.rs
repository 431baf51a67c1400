use std::sync::Arc;

use super::{Scope, ScopeData, ScopeEntry};
use crate::contract::Contract;
use crate::storage::{Hashed, Table};

/// Кэш дедуплицированного списка для многоуровневой цепочки
pub(crate) struct Snapshot {
    version: u64,
    entries: Arc<[ScopeEntry]>,
}

#[derive(Clone)]
struct Slot {
    contract: Contract,
    position: usize,
}

impl Hashed for Slot {
    fn hash_code(&self) -> u32 {
        self.contract.hash_code()
    }
}

enum Source {
    /// Один scope: фильтрующий проход по снимку таблицы
    Single { data: Arc<ScopeData>, position: usize },
    /// Цепочка scope: готовый список из кэша
    Cached {
        entries: Arc<[ScopeEntry]>,
        position: usize,
    },
}

/// Снимок регистраций; служебные категории (Internal, Cache) пропущены
pub struct Registrations {
    source: Source,
}

impl Iterator for Registrations {
    type Item = ScopeEntry;

    fn next(&mut self) -> Option<ScopeEntry> {
        match &mut self.source {
            Source::Single { data, position } => loop {
                *position += 1;
                if *position > data.contracts.len() {
                    return None;
                }
                if let Some(entry) = data.contracts.get(*position) {
                    if entry.manager.category().is_enumerable() {
                        return Some(entry.clone());
                    }
                }
            },
            Source::Cached { entries, position } => {
                let entry = entries.get(*position)?.clone();
                *position += 1;
                Some(entry)
            }
        }
    }
}

pub(super) fn registrations(scope: &Scope) -> Registrations {
    if scope.parent().is_none() {
        return Registrations {
            source: Source::Single {
                data: scope.snapshot(),
                position: 0,
            },
        };
    }

    let version = scope.ancestry_version();
    let mut cache = scope.enumeration.lock();
    if let Some(snapshot) = cache.as_ref() {
        if snapshot.version == version {
            return Registrations {
                source: Source::Cached {
                    entries: Arc::clone(&snapshot.entries),
                    position: 0,
                },
            };
        }
    }

    let entries = collect(scope);
    *cache = Some(Snapshot {
        version,
        entries: Arc::clone(&entries),
    });

    Registrations {
        source: Source::Cached {
            entries,
            position: 0,
        },
    }
}

/// Проход от корня к листу: запись ребенка занимает позицию записи родителя
fn collect(scope: &Scope) -> Arc<[ScopeEntry]> {
    let scopes: Vec<Arc<ScopeData>> = scope.ancestry().map(Scope::snapshot).collect();
    let total: usize = scopes.iter().map(|data| data.contracts.len()).sum();

    let mut index: Table<Slot> = Table::with_capacity(total);
    let mut entries: Vec<ScopeEntry> = Vec::with_capacity(total);

    for data in scopes.iter().rev() {
        for (_, entry) in data.contracts.iter() {
            if !entry.manager.category().is_enumerable() {
                continue;
            }

            let existing = index
                .find(entry.contract.hash_code(), |slot| slot.contract == entry.contract)
                .and_then(|found| index.get(found))
                .map(|slot| slot.position);

            match existing {
                Some(position) => entries[position] = entry.clone(),
                None => {
                    index.push(Slot {
                        contract: entry.contract.clone(),
                        position: entries.len(),
                    });
                    entries.push(entry.clone());
                }
            }
        }
    }

    entries.into()
}
