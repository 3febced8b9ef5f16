// runloop-core/src/runtime/async_recorder.rs
// ============================================================================
// Module: Async Event Recorder
// Description: Non-blocking best-effort persistence for execution events.
// Purpose: Keep streaming latency flat while events drain to the journal.
// Dependencies: crate::{core, interfaces, runtime::recorder}, tokio
// ============================================================================

//! ## Overview
//! Production streams must not block on journal writes. This sink enqueues
//! events without waiting and a single background worker drains the queue
//! serially. A full queue drops the event (best-effort by contract) and the
//! counters record every enqueue, drop, processed row, and failure so
//! operators can see the loss rate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::EventChannel;
use crate::core::ExecutionEvent;
use crate::core::RunId;
use crate::interfaces::ExecutionEventSink;
use crate::interfaces::StoreError;
use crate::runtime::recorder::RunEventRecorder;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default queue capacity before events drop.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

// ============================================================================
// SECTION: Counters
// ============================================================================

/// Monotone counters for the recorder's lifetime.
#[derive(Debug, Default)]
pub struct RecorderCounters {
    /// Events accepted into the queue.
    enqueued: AtomicU64,
    /// Events dropped because the queue was full.
    dropped: AtomicU64,
    /// Events persisted by the worker.
    processed: AtomicU64,
    /// Events the journal rejected.
    failed: AtomicU64,
}

/// Point-in-time counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderStats {
    /// Events accepted into the queue.
    pub enqueued: u64,
    /// Events dropped because the queue was full.
    pub dropped: u64,
    /// Events persisted by the worker.
    pub processed: u64,
    /// Events the journal rejected.
    pub failed: u64,
}

// ============================================================================
// SECTION: Async Recorder
// ============================================================================

/// Queued record handed to the worker.
struct QueuedEvent {
    /// Owning run identifier.
    run_id: RunId,
    /// Normalized execution event.
    event: ExecutionEvent,
}

/// Best-effort asynchronous execution-event sink.
pub struct AsyncEventRecorder {
    /// Queue feeding the worker.
    sender: mpsc::Sender<QueuedEvent>,
    /// Worker task handle.
    worker: JoinHandle<()>,
    /// Lifetime counters.
    counters: Arc<RecorderCounters>,
}

impl AsyncEventRecorder {
    /// Starts the recorder and its background worker.
    #[must_use]
    pub fn start(recorder: Arc<RunEventRecorder>, queue_size: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<QueuedEvent>(queue_size.max(1));
        let counters = Arc::new(RecorderCounters::default());
        let worker_counters = Arc::clone(&counters);

        let worker = tokio::spawn(async move {
            while let Some(queued) = receiver.recv().await {
                let mut payload = queued.event.fields.clone();
                payload.remove("channel");
                let appended = recorder.append(
                    &queued.run_id,
                    EventChannel::Execution,
                    &queued.event.event_type,
                    payload,
                    None,
                );
                if appended.is_ok() {
                    worker_counters.processed.fetch_add(1, Ordering::Relaxed);
                } else {
                    worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        Self { sender, worker, counters }
    }

    /// Closes the queue and waits for the worker to drain.
    pub async fn stop(self) {
        drop(self.sender);
        let _ = self.worker.await;
    }

    /// Returns a counter snapshot.
    #[must_use]
    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl ExecutionEventSink for AsyncEventRecorder {
    fn record(&self, run_id: &RunId, event: &ExecutionEvent) -> Result<(), StoreError> {
        let queued = QueuedEvent { run_id: run_id.clone(), event: event.clone() };
        if self.sender.try_send(queued).is_ok() {
            self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
