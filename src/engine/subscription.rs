//! Handles returned by query registration.

use super::EngineShared;
use crate::query::{QueryId, Solution};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Cancellation and renewal capability for one registered query.
///
/// Dropping a subscription does not cancel the query.
#[derive(Clone)]
pub struct Subscription {
    id: QueryId,
    active: Arc<AtomicBool>,
    engine: Weak<EngineShared>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).field("active", &self.is_active()).finish()
    }
}

impl Subscription {
    pub(crate) fn new(id: QueryId, active: Arc<AtomicBool>, engine: Weak<EngineShared>) -> Self {
        Self { id, active, engine }
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    /// False once the query was cancelled, satisfied, expired or cleared.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Unregisters the query. Idempotent.
    ///
    /// Once this returns, the callback is not invoked again for this query. Called
    /// from inside a callback of the same engine, the structural removal is applied
    /// before the triggering operation returns.
    pub fn cancel(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.cancel(self.id);
        }
    }

    /// Moves the query's expiration to `now + ttl_secs` (0 for never).
    ///
    /// Returns false when the query is no longer registered or the ttl is refused.
    pub fn renew(&self, ttl_secs: u64) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.engine.upgrade() {
            Some(engine) => engine.renew(self.id, ttl_secs),
            None => false,
        }
    }
}

/// A subscription whose solutions are delivered through a channel.
#[derive(Debug)]
pub struct QueryHandle {
    pub subscription: Subscription,
    pub receiver: Receiver<Solution>,
}

impl QueryHandle {
    pub fn id(&self) -> QueryId {
        self.subscription.id()
    }

    /// Blocks until the next solution, or returns None once the query is gone.
    pub fn receive(&self) -> Option<Solution> {
        self.receiver.recv().ok()
    }

    pub fn try_receive(&self) -> Option<Solution> {
        self.receiver.try_recv().ok()
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Option<Solution> {
        match self.receiver.recv_timeout(timeout) {
            Ok(solution) => Some(solution),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains every solution delivered so far.
    pub fn drain(&self) -> Vec<Solution> {
        self.receiver.try_iter().collect()
    }

    pub fn cancel(&self) {
        self.subscription.cancel();
    }
}
