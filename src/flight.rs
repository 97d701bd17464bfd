//! Per-key in-flight deduplication
//!
//! A [`FlightGroup`] collapses concurrent calls for the same key into one
//! computation: the first caller installs a shared cell and runs the work,
//! later callers block on the same cell and observe the same result. The
//! entry is removed once resolved, so a later call (after a failure, say)
//! starts a fresh computation.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{Result, SchemaError};

type Flight<T> = Arc<OnceLock<std::result::Result<T, Arc<SchemaError>>>>;

pub struct FlightGroup<T> {
    calls: Mutex<HashMap<String, Flight<T>>>,
}

impl<T> Default for FlightGroup<T> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> FlightGroup<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a call for the same key is already in
    /// flight, in which case wait for that call and share its result.
    ///
    /// An error seen by several callers comes back as [`SchemaError::Shared`];
    /// a caller that was alone gets the original error.
    pub fn run(&self, key: &str, work: impl FnOnce() -> Result<T>) -> Result<T> {
        let flight = self.calls.lock().entry(key.to_string()).or_default().clone();

        let mut leader = false;
        let outcome = flight
            .get_or_init(|| {
                leader = true;
                work().map_err(Arc::new)
            })
            .clone();

        if leader {
            let mut calls = self.calls.lock();
            if calls.get(key).is_some_and(|f| Arc::ptr_eq(f, &flight)) {
                calls.remove(key);
            }
        } else {
            tracing::debug!(key, "joined in-flight computation");
        }
        drop(flight);

        outcome.map_err(SchemaError::from)
    }

    /// Number of keys currently in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}
