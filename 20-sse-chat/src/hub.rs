use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::message::Message;

/// Identity of one registered subscriber. Ids are never reused within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned by a handler that can no longer take messages.
///
/// Any error removes the handler from the hub; delivery to other subscribers
/// carries on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber disconnected")]
    Disconnected,
}

type Handler = Box<dyn FnMut(&Message) -> Result<(), DeliveryError> + Send>;

/// In-process publish/subscribe registry for a single topic.
///
/// `Hub` is a handle: clones share the same subscriber set, separately
/// constructed hubs are fully independent.
///
/// Handlers run synchronously inside [`Hub::publish`] while the subscriber set
/// is locked, which gives two guarantees: every subscriber observes publishes
/// in the same total order, and once [`Hub::unsubscribe`] returns the handler
/// is never invoked again. Handlers must therefore be quick and non-blocking,
/// and must not call back into the hub that invokes them.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    subscribers: Mutex<HashMap<SubscriptionId, Handler>>,
    next_id: AtomicU64,
    /// Only written and read while `subscribers` is locked.
    closed: AtomicBool,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Registers `handler` and returns the id needed to remove it again.
    ///
    /// Once the hub is closed the handler is dropped straight away instead of
    /// being registered; the returned id is then never delivered to.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: FnMut(&Message) -> Result<(), DeliveryError> + Send + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.inner.subscribers.lock();
        if self.inner.closed.load(Ordering::Relaxed) {
            drop(subscribers);
            debug!(subscription = %id, "hub closed; subscriber not registered");
            return id;
        }
        subscribers.insert(id, Box::new(handler));
        debug!(subscription = %id, subscribers = subscribers.len(), "subscriber registered");
        id
    }

    /// Like [`Hub::subscribe`], but the registration lives exactly as long as
    /// the returned guard.
    pub fn subscription<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(&Message) -> Result<(), DeliveryError> + Send + 'static,
    {
        Subscription {
            hub: self.clone(),
            id: self.subscribe(handler),
        }
    }

    /// Removes a subscriber. Unknown or already removed ids are ignored.
    ///
    /// Returns `true` when a handler was actually removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.subscribers.lock().remove(&id);
        if removed.is_some() {
            debug!(subscription = %id, "subscriber removed");
        }
        removed.is_some()
    }

    /// Fans `message` out to every current subscriber.
    ///
    /// Returns the number of handlers that accepted it. Handlers that fail or
    /// panic are dropped from the hub. Nothing is buffered: with no subscribers
    /// the message is simply discarded.
    pub fn publish(&self, message: impl Into<Message>) -> usize {
        let message = message.into();
        let mut subscribers = self.inner.subscribers.lock();

        let mut failed = Vec::new();
        for (id, handler) in subscribers.iter_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&message))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    debug!(subscription = %id, %error, "delivery failed; dropping subscriber");
                    failed.push(*id);
                }
                Err(_) => {
                    warn!(subscription = %id, "subscriber handler panicked; dropping subscriber");
                    failed.push(*id);
                }
            }
        }

        let removed: Vec<Handler> = failed
            .iter()
            .filter_map(|id| subscribers.remove(id))
            .collect();
        let delivered = subscribers.len();
        drop(subscribers);
        drop(removed);

        debug!(delivered, dropped = failed.len(), "message published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Drops every subscriber and refuses new ones from then on. Used on
    /// shutdown so open streams end and late ones never start.
    pub fn close(&self) -> usize {
        let removed = {
            let mut subscribers = self.inner.subscribers.lock();
            self.inner.closed.store(true, Ordering::Relaxed);
            std::mem::take(&mut *subscribers)
        };
        let count = removed.len();
        drop(removed);
        debug!(subscribers = count, "hub closed");
        count
    }

    pub fn is_closed(&self) -> bool {
        let _subscribers = self.inner.subscribers.lock();
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Scoped registration returned by [`Hub::subscription`].
///
/// Dropping the guard unsubscribes, so the slot is released on every exit
/// path of whatever owns it.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    hub: Hub,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
