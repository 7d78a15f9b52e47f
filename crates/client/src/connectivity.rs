//! Connectivity signal plumbing.
//!
//! The runtime that hosts the client (desktop shell, service, test) owns
//! the actual online/offline detection and exposes it through
//! [`ConnectivityNotifier`]. The client subscribes an observer; it never
//! touches a concrete runtime API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

pub trait ConnectivityObserver: Send + Sync {
    fn connectivity_changed(&self, online: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub trait ConnectivityNotifier: Send + Sync {
    fn subscribe(&self, observer: Arc<dyn ConnectivityObserver>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Observer that forwards transitions into a channel, consumed by the
/// client's background task.
pub(crate) struct ChannelObserver {
    pub(crate) tx: UnboundedSender<bool>,
}

impl ConnectivityObserver for ChannelObserver {
    fn connectivity_changed(&self, online: bool) {
        // Receiver gone means the client was dropped; nothing to notify.
        let _ = self.tx.send(online);
    }
}

/// Notifier driven by explicit calls. Useful for tests and for shells that
/// surface a manual online/offline toggle.
#[derive(Default)]
pub struct ManualNotifier {
    next_id: AtomicU64,
    observers: Mutex<HashMap<u64, Arc<dyn ConnectivityObserver>>>,
}

impl ManualNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_online(&self, online: bool) {
        let observers: Vec<_> = self.observers.lock().unwrap().values().cloned().collect();
        for observer in observers {
            observer.connectivity_changed(online);
        }
    }
}

impl ConnectivityNotifier for ManualNotifier {
    fn subscribe(&self, observer: Arc<dyn ConnectivityObserver>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().unwrap().insert(id, observer);
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.observers.lock().unwrap().remove(&id.0);
    }
}
