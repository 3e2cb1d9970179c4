//! Ordered notification listeners.

use std::sync::Arc;

use parking_lot::RwLock;

/// Callback run around a screen size change.
pub type ScreenListener = Box<dyn Fn() + Send + Sync>;

/// Append-only list of listeners, notified in registration order.
#[derive(Default)]
pub struct ListenerList {
    listeners: RwLock<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl ListenerList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    pub fn register(&self, listener: ScreenListener) {
        self.listeners.write().push(Arc::from(listener));
    }

    /// Run every listener. The list is not locked while they run, so a
    /// listener may register further listeners.
    pub fn notify(&self) {
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener();
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Check if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}
