//! Listener registry and channel fan-out for permission events

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use slotmap::{new_key_type, SlotMap};

use super::types::PermissionEvent;

new_key_type! {
    /// Key for registered listeners, used for removal
    pub struct ListenerKey;
}

/// Callback invoked synchronously for every event
pub type EventCallback = Box<dyn Fn(&PermissionEvent) + Send + Sync>;

/// Capacity of each subscriber channel
const QUEUE_CAPACITY: usize = 1024;

/// Per-manager event dispatcher
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<SlotMap<ListenerKey, EventCallback>>,
    subscribers: Mutex<Vec<Sender<PermissionEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback to be called for every event
    ///
    /// Callbacks run on the thread that made the change and must not block.
    ///
    /// # Returns
    /// A key that can be used to unregister the callback via `remove_listener`.
    pub fn on_event<F>(&self, callback: F) -> ListenerKey
    where
        F: Fn(&PermissionEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().insert(Box::new(callback))
    }

    /// Remove a listener by its key
    ///
    /// Returns `true` if the listener was found and removed.
    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        self.callbacks.write().remove(key).is_some()
    }

    /// Receive events on a channel, for consumers living on other threads
    ///
    /// Dropping the receiver unsubscribes. If the receiver falls more than
    /// 1024 events behind, newer events are dropped for it.
    pub fn subscribe(&self) -> Receiver<PermissionEvent> {
        let (sender, receiver) = bounded(QUEUE_CAPACITY);
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Number of registered callbacks and live subscriptions
    pub fn listener_count(&self) -> usize {
        self.callbacks.read().len() + self.subscribers.lock().len()
    }

    /// Deliver an event to every callback and subscriber
    pub(crate) fn fire(&self, event: PermissionEvent) {
        tracing::debug!(?event, "Firing permission event");

        {
            let callbacks = self.callbacks.read();
            for (_, callback) in callbacks.iter() {
                callback(&event);
            }
        }

        self.subscribers
            .lock()
            .retain(|sender| match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Permission event queue full, dropping event");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }
}
