// runloop-core/src/runtime/idempotency.rs
// ============================================================================
// Module: Idempotency Coordinator
// Description: Per-key in-flight deduplication with persisted results.
// Purpose: Make reissued requests converge on one execution and one result.
// Dependencies: crate::interfaces, serde_json, tokio
// ============================================================================

//! ## Overview
//! Callers hand the coordinator an opaque key and a work future. A persisted
//! result short-circuits immediately; otherwise concurrent callers for the
//! same key serialize on a per-key lock, re-check the store inside the
//! critical section, and at most one of them runs the work. The persisted
//! store handles cross-restart correctness.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::interfaces::IdempotencyStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Application-level idempotency and concurrency control.
pub struct IdempotencyCoordinator {
    /// Persisted result store.
    store: Arc<dyn IdempotencyStore>,
    /// Per-key serialization locks.
    guard: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdempotencyCoordinator {
    /// Creates a coordinator over the given result store.
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self { store, guard: Mutex::new(HashMap::new()) }
    }

    /// Runs the work at most once per key, returning the shared result.
    ///
    /// # Errors
    ///
    /// Propagates store failures and the work's own error.
    pub async fn run<F, Fut>(&self, idempotency_key: &str, work: F) -> Result<Value, StoreError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, StoreError>> + Send,
    {
        if self.store.exists(idempotency_key)?
            && let Some(result) = self.store.get_result(idempotency_key)?
        {
            return Ok(result);
        }

        let key_lock = {
            let mut guard = self.guard.lock().await;
            Arc::clone(guard.entry(idempotency_key.to_string()).or_default())
        };

        let outcome = {
            let _held = key_lock.lock().await;
            // Double-check inside the critical section: a concurrent caller
            // may have finished while we waited for the key lock.
            match self.store.get_result(idempotency_key) {
                Err(error) => Err(error),
                Ok(Some(result)) => Ok(result),
                Ok(None) => match work().await {
                    Ok(result) => {
                        self.store.save_result(idempotency_key, &result).map(|()| result)
                    }
                    Err(error) => Err(error),
                },
            }
        };

        drop(key_lock);
        self.cleanup(idempotency_key).await;
        outcome
    }

    /// Drops the per-key lock entry when nobody else holds it.
    async fn cleanup(&self, idempotency_key: &str) {
        let mut guard = self.guard.lock().await;
        let removable = guard
            .get(idempotency_key)
            .is_some_and(|key_lock| Arc::strong_count(key_lock) == 1);
        if removable {
            guard.remove(idempotency_key);
        }
    }
}
