//! Single-flight coordination
//!
//! Deduplicates concurrent executions of an expensive producer keyed by
//! cache key: while a computation is in flight, callers for the same key
//! join it and receive its result (or its failure) instead of starting
//! their own. Different keys never wait on each other, and the in-flight
//! marker is cleared on completion so a later miss starts a fresh run.
//!
//! A joining caller that is cancelled does not cancel the shared
//! computation; only the leader drives it. If the leader itself panics or
//! is cancelled, a drop guard fails the waiters and clears the marker.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};

/// Broadcast slot for one in-flight computation
type FlightSlot<V> = Option<std::result::Result<V, String>>;

/// Single-flight coordinator for values of type `V`
pub struct SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    in_flight: Arc<DashMap<String, watch::Receiver<FlightSlot<V>>>>,
    /// Computations this coordinator started
    led: AtomicU64,
    /// Callers that joined an existing computation
    joined: AtomicU64,
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new coordinator
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            led: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Run `producer` for `key`, or join an in-flight run of it
    ///
    /// Exactly one concurrent caller per key executes the producer; all
    /// callers receive that execution's result.
    pub async fn run<F, Fut>(&self, key: &str, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        // Fast path: join an existing flight
        if let Some(rx) = self.in_flight.get(key).map(|r| r.value().clone()) {
            return self.join(key, rx).await;
        }

        let (tx, rx) = watch::channel(None);

        // Claim leadership; someone may have beaten us between the check
        // above and this insert
        let guard = match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let rx = occupied.get().clone();
                drop(occupied);
                return self.join(key, rx).await;
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(rx);
                self.led.fetch_add(1, Ordering::Relaxed);
                FlightGuard {
                    key: key.to_string(),
                    in_flight: Arc::clone(&self.in_flight),
                    tx: Some(tx),
                }
            }
        };

        let result = producer().await;
        guard.complete(match &result {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(e.to_string()),
        });
        result
    }

    /// Wait for an in-flight computation to resolve
    async fn join(&self, key: &str, mut rx: watch::Receiver<FlightSlot<V>>) -> Result<V> {
        self.joined.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "joining in-flight computation");

        loop {
            let resolved = rx.borrow().clone();
            if let Some(result) = resolved {
                return result.map_err(Error::Loader);
            }
            if rx.changed().await.is_err() {
                // Sender dropped without publishing
                return Err(Error::Loader("in-flight computation cancelled".into()));
            }
        }
    }

    /// Number of computations currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Computations this coordinator led
    pub fn led(&self) -> u64 {
        self.led.load(Ordering::Relaxed)
    }

    /// Callers that joined an existing computation
    pub fn joined(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }
}

/// Clears the in-flight marker and fails waiters if the leader never
/// published a result (panic or cancellation).
struct FlightGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    key: String,
    in_flight: Arc<DashMap<String, watch::Receiver<FlightSlot<V>>>>,
    tx: Option<watch::Sender<FlightSlot<V>>>,
}

impl<V> FlightGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Publish the result to all joiners, consuming the guard
    fn complete(mut self, result: std::result::Result<V, String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(result));
        }
    }
}

impl<V> Drop for FlightGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(Err("computation cancelled before completion".into())));
        }
        self.in_flight.remove(&self.key);
    }
}

// =============================================================================
// Tests
// =============================================================================
