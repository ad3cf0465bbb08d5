use crate::error::{BackendError, Result, StoreError, SubscriberError};
use crate::storage::Backend;
use crate::store::BoardStore;
use crate::types::{BoardEvent, Sticky, StickyId};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Handle identifying one subscription, returned by [`EventHub::subscribe`]
pub type SubscriptionId = u64;

/// Receiver of board events
///
/// Called once per event, in registration order with the board's other
/// subscribers. Returning an error (or panicking) gets the subscriber removed.
pub trait Subscriber: Send + Sync + 'static {
    fn notify(&self, event: &BoardEvent) -> std::result::Result<(), SubscriberError>;
}

impl<F> Subscriber for F
where
    F: Fn(&BoardEvent) -> std::result::Result<(), SubscriberError> + Send + Sync + 'static,
{
    fn notify(&self, event: &BoardEvent) -> std::result::Result<(), SubscriberError> {
        self(event)
    }
}

#[derive(Default)]
struct Registry {
    boards: HashMap<String, Vec<(SubscriptionId, Arc<dyn Subscriber>)>>,
    last_id: SubscriptionId,
}

/// Event notification layered over a BoardStore
///
/// Mutations go to the store first; once a mutation succeeds the resulting
/// record (or removed id) is sent to every subscriber of that board and the
/// store's result is handed back unchanged. Failed mutations emit nothing.
/// Reads pass straight through.
///
/// Mutations must be issued from within a tokio runtime.
pub struct EventHub<B: Backend> {
    store: BoardStore<B>,
    registry: Arc<Mutex<Registry>>,
}

impl<B: Backend> Clone for EventHub<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<B: Backend> EventHub<B> {
    pub fn new(store: BoardStore<B>) -> Self {
        Self {
            store,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Read-only, pass through
    pub fn get_stickies(
        &self,
        board_id: &str,
    ) -> impl Future<Output = Result<Vec<Sticky>>> + Send + 'static {
        self.store.get_stickies(board_id)
    }

    /// Read-only, pass through
    pub fn get_sticky(
        &self,
        sticky_id: StickyId,
        board_id: &str,
    ) -> impl Future<Output = Result<Sticky>> + Send + 'static {
        self.store.get_sticky(sticky_id, board_id)
    }

    pub fn add_sticky(
        &self,
        board_id: &str,
        text: impl Into<String>,
        x: i64,
        y: i64,
    ) -> impl Future<Output = Result<Sticky>> + Send + 'static {
        let pending = self.store.add_sticky(board_id, text, x, y);
        self.emit_on_completion(board_id, pending, |sticky| BoardEvent::Add(sticky.clone()))
    }

    pub fn update_sticky(
        &self,
        board_id: &str,
        sticky_id: StickyId,
        text: impl Into<String>,
        x: i64,
        y: i64,
    ) -> impl Future<Output = Result<Sticky>> + Send + 'static {
        let pending = self.store.update_sticky(board_id, sticky_id, text, x, y);
        self.emit_on_completion(board_id, pending, |sticky| BoardEvent::Update(sticky.clone()))
    }

    pub fn remove_sticky(
        &self,
        board_id: &str,
        sticky_id: StickyId,
    ) -> impl Future<Output = Result<StickyId>> + Send + 'static {
        let pending = self.store.remove_sticky(board_id, sticky_id);
        self.emit_on_completion(board_id, pending, |removed| BoardEvent::Remove(*removed))
    }

    /// Drive a mutation to completion on its own task and emit its event there
    ///
    /// The event goes out once the store resolves even if the caller drops
    /// the returned future, so subscribers never miss a stored change.
    fn emit_on_completion<T, F, E>(
        &self,
        board_id: &str,
        pending: F,
        event: E,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
        E: FnOnce(&T) -> BoardEvent + Send + 'static,
    {
        let hub = self.clone();
        let board_id = board_id.to_string();
        let task = tokio::spawn(async move {
            let value = pending.await?;
            hub.emit(&board_id, &event(&value));
            Ok::<T, StoreError>(value)
        });

        async move { task.await.map_err(BackendError::from)? }
    }

    /// Register a subscriber for every later event on `board_id`
    pub fn subscribe<S: Subscriber>(&self, board_id: &str, subscriber: S) -> SubscriptionId {
        let subscriber: Arc<dyn Subscriber> = Arc::new(subscriber);
        let mut registry = self.registry.lock();
        registry.last_id += 1;
        let id = registry.last_id;
        registry
            .boards
            .entry(board_id.to_string())
            .or_default()
            .push((id, subscriber));
        debug!("subscription {} added to board {}", id, board_id);
        id
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, board_id: &str, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock();
        let Some(subscribers) = registry.boards.get_mut(board_id) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            registry.boards.remove(board_id);
        }
        if removed {
            debug!("subscription {} removed from board {}", id, board_id);
        }
        removed
    }

    pub fn is_subscribed(&self, board_id: &str, id: SubscriptionId) -> bool {
        self.registry
            .lock()
            .boards
            .get(board_id)
            .is_some_and(|subscribers| subscribers.iter().any(|(sub_id, _)| *sub_id == id))
    }

    pub fn subscriber_count(&self, board_id: &str) -> usize {
        self.registry
            .lock()
            .boards
            .get(board_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver an event to every subscriber of a board
    ///
    /// Each subscriber is invoked in isolation: one that fails or panics is
    /// logged and unsubscribed, and delivery continues with the rest.
    /// Returns how many subscribers accepted the event.
    pub fn emit(&self, board_id: &str, event: &BoardEvent) -> usize {
        // Snapshot so subscribers may (un)subscribe from inside notify
        let targets = self
            .registry
            .lock()
            .boards
            .get(board_id)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, subscriber) in targets {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber.notify(event)))
                .unwrap_or_else(|payload| Err(SubscriberError::Panicked(panic_message(payload))));

            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Error sending {} to subscription {} on board {}: {}",
                        event.action(),
                        id,
                        board_id,
                        e
                    );
                    self.unsubscribe(board_id, id);
                }
            }
        }

        trace!(
            "emitted {} for sticky {} on board {} to {} subscribers",
            event.action(),
            event.sticky_id(),
            board_id,
            delivered
        );
        delivered
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
