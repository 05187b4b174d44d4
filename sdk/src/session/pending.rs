//! In-flight command correlation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use switchboard_core::Response;
use tokio::sync::oneshot;

use super::error::SessionError;

type Resolver = oneshot::Sender<Result<Response, SessionError>>;

/// Commands awaiting a response, keyed by request id.
#[derive(Debug, Default)]
pub(crate) struct PendingCommands {
    entries: Mutex<HashMap<String, Resolver>>,
}

/// A registered command. Dropping it removes the entry.
#[derive(Debug)]
pub(crate) struct PendingEntry<'a> {
    pending: &'a PendingCommands,
    request_id: String,
    pub(crate) receiver: oneshot::Receiver<Result<Response, SessionError>>,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.request_id);
    }
}

impl PendingCommands {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Resolver>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a resolver for `request_id`.
    pub(crate) fn register(&self, request_id: &str) -> PendingEntry<'_> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(request_id.to_string(), tx);
        PendingEntry {
            pending: self,
            request_id: request_id.to_string(),
            receiver: rx,
        }
    }

    /// Resolves the matching entry. Returns false if none is waiting.
    pub(crate) fn resolve(&self, response: Response) -> bool {
        match self.lock().remove(&response.request_id) {
            Some(resolver) => {
                let _ = resolver.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Rejects every entry with [`SessionError::ConnectionClosed`].
    pub(crate) fn reject_all(&self) -> usize {
        let drained: Vec<Resolver> = self.lock().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for resolver in drained {
            let _ = resolver.send(Err(SessionError::ConnectionClosed));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
