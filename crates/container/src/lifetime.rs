//! Lifetime managers: где хранится произведенное значение
//!
//! - Transient: не хранится
//! - Singleton: один слот на регистрацию (владелец - scope регистрации)
//! - PerThread: слот на поток (thread-local, освобождается вместе с потоком)
//! - PerResolve: слот на один верхнеуровневый `resolve` (живет во фрейме)
//! - Hierarchical: слот на каждый запрашивающий scope
//! - ContainerTransient: не хранится, но disposable значения принадлежат scope

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::contract::Value;
use crate::pipeline::ResolutionFrame;
use crate::registration::Category;
use crate::scope::ScopeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifetimeKind {
    Transient,
    Singleton,
    PerThread,
    PerResolve,
    Hierarchical,
    ContainerTransient,
}

impl Default for LifetimeKind {
    fn default() -> Self {
        LifetimeKind::Transient
    }
}

impl LifetimeKind {
    /// Допустима ли комбинация с категорией регистрации
    pub fn supports(self, category: Category) -> bool {
        match category {
            Category::Instance | Category::Internal => {
                matches!(self, LifetimeKind::Singleton | LifetimeKind::Hierarchical)
            }
            Category::Cache => self == LifetimeKind::Transient,
            Category::Uninitialized | Category::Type | Category::Factory => true,
        }
    }

    /// Построение значения идет под lock менеджера
    pub fn is_synchronized(self) -> bool {
        matches!(self, LifetimeKind::Singleton | LifetimeKind::Hierarchical)
    }
}

static NEXT_THREAD_SLOT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Значения PerThread текущего потока по ключу слота менеджера
    static THREAD_VALUES: RefCell<HashMap<u64, Value>> = RefCell::new(HashMap::new());
}

fn thread_value(slot: u64) -> Option<Value> {
    THREAD_VALUES
        .try_with(|values| values.borrow().get(&slot).cloned())
        .ok()
        .flatten()
}

/// Прежнее значение возвращается наружу и освобождается вне borrow
fn swap_thread_value(slot: u64, value: Option<Value>) -> Option<Value> {
    THREAD_VALUES
        .try_with(|values| {
            let mut values = values.borrow_mut();
            match value {
                Some(value) => values.insert(slot, value),
                None => values.remove(&slot),
            }
        })
        .ok()
        .flatten()
}

enum Store {
    None,
    Slot(Mutex<Option<Value>>),
    /// Ключ в thread-local таблице; ключи не переиспользуются
    PerThread(u64),
    PerScope(Mutex<HashMap<ScopeId, Value>>),
}

/// Хранилище значений одной регистрации
pub struct LifetimeManager {
    kind: LifetimeKind,
    store: Store,
    /// Счетчик публикаций, по нему `recover` понимает, что слот заполнен текущей сборкой
    published: AtomicU64,
}

impl LifetimeManager {
    pub fn new(kind: LifetimeKind) -> Self {
        let store = match kind {
            LifetimeKind::Transient
            | LifetimeKind::PerResolve
            | LifetimeKind::ContainerTransient => Store::None,
            LifetimeKind::Singleton => Store::Slot(Mutex::new(None)),
            LifetimeKind::PerThread => {
                Store::PerThread(NEXT_THREAD_SLOT.fetch_add(1, Ordering::Relaxed))
            }
            LifetimeKind::Hierarchical => Store::PerScope(Mutex::new(HashMap::new())),
        };
        Self {
            kind,
            store,
            published: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> LifetimeKind {
        self.kind
    }

    /// Та же конфигурация с пустыми слотами
    pub fn fresh(&self) -> Self {
        Self::new(self.kind)
    }

    fn frame_key(&self) -> usize {
        self as *const Self as usize
    }

    pub(crate) fn get_value(&self, scope: ScopeId, frame: &ResolutionFrame) -> Option<Value> {
        match (&self.store, self.kind) {
            (Store::Slot(slot), _) => slot.lock().clone(),
            (Store::PerThread(slot), _) => thread_value(*slot),
            (Store::PerScope(slots), _) => slots.lock().get(&scope).cloned(),
            (Store::None, LifetimeKind::PerResolve) => frame.per_resolve(self.frame_key()),
            (Store::None, _) => None,
        }
    }

    pub(crate) fn set_value(&self, value: Value, scope: ScopeId, frame: &mut ResolutionFrame) {
        match (&self.store, self.kind) {
            (Store::Slot(slot), _) => *slot.lock() = Some(value),
            (Store::PerThread(slot), _) => {
                swap_thread_value(*slot, Some(value));
            }
            (Store::PerScope(slots), _) => {
                slots.lock().insert(scope, value);
            }
            (Store::None, LifetimeKind::PerResolve) => frame.set_per_resolve(self.frame_key(), value),
            (Store::None, _) => return,
        }
        self.published.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn publications(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Откатить значение, опубликованное сборкой, которая завершилась сбоем
    pub fn recover(&self, scope: ScopeId, since: u64) {
        if !self.kind.is_synchronized() || self.publications() == since {
            return;
        }
        warn!(lifetime = ?self.kind, scope, "Discarding value published by a faulted build");
        match &self.store {
            Store::Slot(slot) => *slot.lock() = None,
            Store::PerScope(slots) => {
                slots.lock().remove(&scope);
            }
            _ => {}
        }
    }

    /// Сбросить сохраненные значения; для PerThread только значение текущего потока
    pub fn clear(&self) {
        match &self.store {
            Store::Slot(slot) => *slot.lock() = None,
            Store::PerThread(slot) => {
                swap_thread_value(*slot, None);
            }
            Store::PerScope(slots) => slots.lock().clear(),
            Store::None => {}
        }
    }
}

impl Drop for LifetimeManager {
    fn drop(&mut self) {
        if let Store::PerThread(slot) = self.store {
            swap_thread_value(slot, None);
        }
    }
}

impl std::fmt::Debug for LifetimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeManager")
            .field("kind", &self.kind)
            .field("publications", &self.publications())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_supports_category() {
        assert!(LifetimeKind::Singleton.supports(Category::Instance));
        assert!(!LifetimeKind::Transient.supports(Category::Instance));
        assert!(!LifetimeKind::PerResolve.supports(Category::Instance));
        assert!(LifetimeKind::PerThread.supports(Category::Factory));
        assert!(LifetimeKind::ContainerTransient.supports(Category::Type));
    }

    #[test]
    fn test_singleton_slot() {
        let manager = LifetimeManager::new(LifetimeKind::Singleton);
        let mut frame = ResolutionFrame::new(Vec::new());
        assert!(manager.get_value(1, &frame).is_none());

        manager.set_value(Arc::new(5u32), 1, &mut frame);
        let value = manager.get_value(2, &frame).expect("shared across scopes");
        assert_eq!(value.downcast_ref::<u32>(), Some(&5));

        assert!(manager.fresh().get_value(1, &frame).is_none());
    }

    #[test]
    fn test_per_resolve_lives_in_frame() {
        let manager = LifetimeManager::new(LifetimeKind::PerResolve);
        let mut first = ResolutionFrame::new(Vec::new());
        manager.set_value(Arc::new(1u8), 1, &mut first);

        assert!(manager.get_value(1, &first).is_some());
        let second = ResolutionFrame::new(Vec::new());
        assert!(manager.get_value(1, &second).is_none());
    }

    #[test]
    fn test_hierarchical_slot_per_scope() {
        let manager = LifetimeManager::new(LifetimeKind::Hierarchical);
        let mut frame = ResolutionFrame::new(Vec::new());
        manager.set_value(Arc::new(1u8), 1, &mut frame);

        assert!(manager.get_value(1, &frame).is_some());
        assert!(manager.get_value(2, &frame).is_none());
    }

    #[test]
    fn test_per_thread_slot() {
        let manager = Arc::new(LifetimeManager::new(LifetimeKind::PerThread));
        let mut frame = ResolutionFrame::new(Vec::new());
        manager.set_value(Arc::new(1u8), 1, &mut frame);

        let other = Arc::clone(&manager);
        let seen = std::thread::spawn(move || {
            let frame = ResolutionFrame::new(Vec::new());
            other.get_value(1, &frame).is_some()
        })
        .join()
        .expect("thread joins");

        assert!(!seen);
        assert!(manager.get_value(1, &frame).is_some());
    }

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_per_thread_values_released_with_their_thread() {
        let manager = Arc::new(LifetimeManager::new(LifetimeKind::PerThread));
        let dropped = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let manager = Arc::clone(&manager);
            let dropped = Arc::clone(&dropped);
            std::thread::spawn(move || {
                let mut frame = ResolutionFrame::new(Vec::new());
                manager.set_value(Arc::new(Tracked(dropped)), 1, &mut frame);
                assert!(manager.get_value(1, &frame).is_some());
            })
            .join()
            .expect("thread joins");
        }

        // ничего не накапливается: значение каждого потока ушло вместе с ним
        assert_eq!(dropped.load(Ordering::SeqCst), 64);
        assert_eq!(manager.publications(), 64);
        assert!(manager.get_value(1, &ResolutionFrame::new(Vec::new())).is_none());
    }

    #[test]
    fn test_per_thread_clear_and_drop_release_current_value() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut frame = ResolutionFrame::new(Vec::new());

        let manager = LifetimeManager::new(LifetimeKind::PerThread);
        manager.set_value(Arc::new(Tracked(Arc::clone(&dropped))), 1, &mut frame);
        manager.set_value(Arc::new(Tracked(Arc::clone(&dropped))), 1, &mut frame);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);

        manager.clear();
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
        assert!(manager.get_value(1, &frame).is_none());

        manager.set_value(Arc::new(Tracked(Arc::clone(&dropped))), 1, &mut frame);
        drop(manager);
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_recover_discards_only_new_publication() {
        let manager = LifetimeManager::new(LifetimeKind::Singleton);
        let mut frame = ResolutionFrame::new(Vec::new());

        let before = manager.publications();
        manager.recover(1, before);
        manager.set_value(Arc::new(1u8), 1, &mut frame);
        let after = manager.publications();

        manager.recover(1, after);
        assert!(manager.get_value(1, &frame).is_some());

        manager.recover(1, before);
        assert!(manager.get_value(1, &frame).is_none());
    }
}
