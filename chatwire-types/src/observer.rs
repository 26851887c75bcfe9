//! Observer registry with synchronous fan-out
//!
//! A registry of subscriber callbacks shared by the queue and the monitors.
//! Emission is synchronous; a panicking subscriber is isolated and logged so
//! it cannot break emission to its siblings. Registration returns a
//! [`Subscription`] handle used to unsubscribe.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    callbacks: HashMap<u64, Callback<E>>,
}

/// Listener registry for events of type `E`
pub struct Listeners<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: HashMap::new(),
            })),
        }
    }

    /// Register a callback; the returned handle unsubscribes it
    pub fn subscribe<F>(&self, callback: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.callbacks.insert(id, Arc::new(callback));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.registry.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fan the event out to every listener, isolating panics per callback
    pub fn emit(&self, event: &E) {
        // Snapshot the callbacks so listeners run outside the registry lock
        // and may subscribe or unsubscribe from within their own callback.
        let callbacks: Vec<(u64, Callback<E>)> = {
            let registry = self.registry.lock();
            registry
                .callbacks
                .iter()
                .map(|(id, cb)| (*id, Arc::clone(cb)))
                .collect()
        };

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(listener = id, "event listener panicked; continuing with remaining listeners");
            }
        }
    }
}

/// Unsubscribe handle returned by [`Listeners::subscribe`]
pub struct Subscription<E> {
    id: u64,
    registry: Weak<Mutex<Registry<E>>>,
}

impl<E> Subscription<E> {
    /// Remove the associated listener from its registry
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().callbacks.remove(&self.id);
        }
    }
}
