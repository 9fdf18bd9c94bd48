use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::warn;

use crate::protocol::EventKind;

/// A local event callback.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`SubscriberRegistry::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(SubscriptionId, Callback)>>,
}

/// Event kind → ordered callbacks.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove one subscription. Unknown ids are ignored.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut registry = self.lock();
        let Some(list) = registry.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;
        if list.is_empty() {
            registry.by_kind.remove(&kind);
        }
        removed
    }

    /// Invoke every callback registered for `kind`, in registration order.
    ///
    /// Callbacks run on a snapshot taken before the first call, so they may
    /// subscribe or unsubscribe freely. A panicking callback is logged and
    /// does not stop the others. Returns how many callbacks completed.
    pub fn dispatch(&self, kind: EventKind, payload: &Value) -> usize {
        let snapshot: Vec<(SubscriptionId, Callback)> = match self.lock().by_kind.get(&kind) {
            Some(list) => list.clone(),
            None => return 0,
        };
        let mut completed = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => completed += 1,
                Err(_) => warn!(event = "subscriber_panicked", kind = %kind, subscription = id.0),
            }
        }
        completed
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.lock().by_kind.get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.lock().by_kind.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            registry.on(EventKind::BeadUpdate, move |payload| {
                seen.lock().unwrap().push(format!("{}:{}", tag, payload["todo"]));
            });
        }
        assert_eq!(
            registry.dispatch(EventKind::BeadUpdate, &serde_json::json!({"todo": 3})),
            2
        );
        assert_eq!(*seen.lock().unwrap(), vec!["first:3", "second:3"]);
        assert_eq!(registry.dispatch(EventKind::Activity, &Value::Null), 0);
    }

    #[test]
    fn test_off_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let id = registry.on(EventKind::Activity, |_| {});
        assert!(registry.off(EventKind::Activity, id));
        assert!(!registry.off(EventKind::Activity, id));
        assert_eq!(registry.count(EventKind::Activity), 0);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_others() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.on(EventKind::AgentStatus, |_| panic!("render failed"));
        let c = calls.clone();
        registry.on(EventKind::AgentStatus, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.dispatch(EventKind::AgentStatus, &Value::Null), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_uses_snapshot() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let r = registry.clone();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let slot_in = slot.clone();
        registry.on(EventKind::Activity, move |_| {
            if let Some(id) = *slot_in.lock().unwrap() {
                r.off(EventKind::Activity, id);
            }
        });
        let c = calls.clone();
        let second = registry.on(EventKind::Activity, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        *slot.lock().unwrap() = Some(second);

        registry.dispatch(EventKind::Activity, &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "snapshot still runs it once");
        registry.dispatch(EventKind::Activity, &Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
