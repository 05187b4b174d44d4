//! Message handler and state listener registry.
//!
//! Handlers are keyed by [`MessageKind`]; several may be registered for the
//! same kind and each is removed by the [`HandlerId`] returned on
//! registration. Errors and panics raised by a handler are logged and never
//! reach the receive loop.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use switchboard_core::{Message, MessageKind};
use tracing::{error, warn};

use super::state::SessionState;

/// Result returned by a message handler.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type MessageHandler = Arc<dyn Fn(&Message) -> HandlerResult + Send + Sync>;
type StateListener = Arc<dyn Fn(&SessionState) + Send + Sync>;

/// Stable identifier of a registered handler or listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Registry of message handlers and state listeners.
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<MessageKind, Vec<(HandlerId, MessageHandler)>>>,
    listeners: RwLock<Vec<(HandlerId, StateListener)>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers: usize = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum();
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &handlers)
            .field("listeners", &listeners)
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a handler for one message kind.
    pub fn on<F>(&self, kind: MessageKind, handler: F) -> HandlerId
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Registers a state listener.
    pub fn on_state<F>(&self, listener: F) -> HandlerId
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a handler or listener. Returns false if the id is unknown.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(h, _)| *h == id) {
                list.remove(pos);
                return true;
            }
        }
        drop(handlers);

        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match listeners.iter().position(|(h, _)| *h == id) {
            Some(pos) => {
                listeners.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Returns the number of handlers registered for a kind.
    #[must_use]
    pub fn count(&self, kind: MessageKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Runs every handler registered for the message's kind.
    ///
    /// Returns how many completed without error.
    pub fn dispatch(&self, message: &Message) -> usize {
        let kind = message.kind();
        let snapshot: Vec<MessageHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        let mut completed = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => completed += 1,
                Ok(Err(e)) => {
                    warn!(%kind, message_id = message.id(), error = %e, "Message handler failed");
                }
                Err(_) => {
                    error!(%kind, message_id = message.id(), "Message handler panicked");
                }
            }
        }
        completed
    }

    /// Notifies every state listener.
    pub fn notify(&self, state: &SessionState) {
        let snapshot: Vec<StateListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
                error!(%state, "State listener panicked");
            }
        }
    }
}
