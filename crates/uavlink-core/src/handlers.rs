//! Per-name callback registries.
//!
//! A [`HandlerManager`] keeps an ordered list of callbacks for every name.
//! Callbacks may carry a call budget and detach themselves once it is spent.
//! Two optional hooks observe the transitions between "no handlers" and "some
//! handlers" for a name; the client uses them to drive remote
//! subscribe/unsubscribe traffic.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A registered callback. Identity is the allocation it points to.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Lifecycle hook, called with the affected name.
pub type Hook = Box<dyn Fn(&str) + Send + Sync>;

/// Handle for one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration<T> {
    id: HandlerId,
    callback: Callback<T>,
    /// `None` for permanent handlers.
    remaining: Option<NonZeroU32>,
}

/// Ordered callback lists keyed by name.
pub struct HandlerManager<T> {
    slots: Mutex<BTreeMap<String, Vec<Registration<T>>>>,
    next_id: AtomicU64,
    on_first_added: Option<Hook>,
    on_last_removed: Option<Hook>,
}

impl<T> Default for HandlerManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for HandlerManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerManager")
            .field("names", &self.registered_names())
            .finish_non_exhaustive()
    }
}

impl<T> HandlerManager<T> {
    /// A manager without lifecycle hooks.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            on_first_added: None,
            on_last_removed: None,
        }
    }

    /// A manager that calls `first_added` when a name gains its first handler
    /// and `last_removed` when it loses its last one.
    pub fn with_hooks(
        first_added: impl Fn(&str) + Send + Sync + 'static,
        last_removed: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_first_added: Some(Box::new(first_added)),
            on_last_removed: Some(Box::new(last_removed)),
            ..Self::new()
        }
    }

    /// Register a permanent handler.
    pub fn attach(&self, name: &str, callback: Callback<T>) -> HandlerId {
        self.register(name, callback, None)
    }

    /// Register a handler that detaches after `calls` invocations.
    pub fn attach_limited(&self, name: &str, callback: Callback<T>, calls: NonZeroU32) -> HandlerId {
        self.register(name, callback, Some(calls))
    }

    /// Register a handler that detaches after its first invocation.
    pub fn attach_once(&self, name: &str, callback: Callback<T>) -> HandlerId {
        self.register(name, callback, Some(NonZeroU32::MIN))
    }

    /// Remove every registration of `callback` under `name`.
    ///
    /// Returns how many registrations were removed.
    pub fn detach(&self, name: &str, callback: &Callback<T>) -> usize {
        self.remove_where(name, |r| same_callback(&r.callback, callback))
    }

    /// Remove one registration by id. Returns whether it was still present.
    pub fn detach_id(&self, name: &str, id: HandlerId) -> bool {
        self.remove_where(name, |r| r.id == id) > 0
    }

    /// Remove every handler, firing the last-removed hook for each name.
    pub fn detach_all(&self) {
        let drained = std::mem::take(&mut *self.lock());
        for name in drained.keys() {
            self.fire_last_removed(name);
        }
    }

    /// Invoke every handler registered for `name`, in registration order.
    ///
    /// Each handler's budget is decremented, and the handler detached if the
    /// budget ran out, before it is invoked. Callbacks run without the
    /// registry locked, so they may attach or detach freely: a handler
    /// detached mid-dispatch is skipped, one attached mid-dispatch waits for
    /// the next dispatch. Returns the number of callbacks invoked.
    pub fn dispatch(&self, name: &str, payload: &T) -> usize {
        let pending: Vec<HandlerId> = match self.lock().get(name) {
            Some(list) => list.iter().map(|r| r.id).collect(),
            None => return 0,
        };

        let mut invoked = 0;
        for id in pending {
            let Some((callback, emptied)) = self.consume(name, id) else {
                continue;
            };
            if emptied {
                tracing::trace!(name, "last handler consumed");
                self.fire_last_removed(name);
            }
            callback(payload);
            invoked += 1;
        }
        invoked
    }

    /// Names with at least one handler.
    pub fn registered_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of handlers currently registered under `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, Vec::len)
    }

    pub fn has_handlers(&self, name: &str) -> bool {
        self.handler_count(name) > 0
    }

    fn register(&self, name: &str, callback: Callback<T>, remaining: Option<NonZeroU32>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let first = {
            let mut slots = self.lock();
            let list = slots.entry(name.to_owned()).or_default();
            list.push(Registration {
                id,
                callback,
                remaining,
            });
            list.len() == 1
        };
        if first {
            if let Some(hook) = &self.on_first_added {
                hook(name);
            }
        }
        id
    }

    /// Spend one call of handler `id`, returning its callback and whether
    /// the name has no handlers left.
    fn consume(&self, name: &str, id: HandlerId) -> Option<(Callback<T>, bool)> {
        let mut slots = self.lock();
        let list = slots.get_mut(name)?;
        let position = list.iter().position(|r| r.id == id)?;
        let entry = &mut list[position];
        let callback = Arc::clone(&entry.callback);

        let expired = match entry.remaining {
            None => false,
            Some(n) => match NonZeroU32::new(n.get() - 1) {
                Some(left) => {
                    entry.remaining = Some(left);
                    false
                }
                None => true,
            },
        };
        if expired {
            list.remove(position);
        }
        let emptied = list.is_empty();
        if emptied {
            slots.remove(name);
        }
        Some((callback, emptied))
    }

    fn remove_where(&self, name: &str, matches: impl Fn(&Registration<T>) -> bool) -> usize {
        let (removed, emptied) = {
            let mut slots = self.lock();
            let Some(list) = slots.get_mut(name) else {
                return 0;
            };
            let before = list.len();
            list.retain(|r| !matches(r));
            let removed = before - list.len();
            let emptied = list.is_empty();
            if emptied {
                slots.remove(name);
            }
            (removed, emptied)
        };
        if emptied {
            self.fire_last_removed(name);
        }
        removed
    }

    fn fire_last_removed(&self, name: &str) {
        if let Some(hook) = &self.on_last_removed {
            hook(name);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<Registration<T>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_callback<T>(a: &Callback<T>, b: &Callback<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}
