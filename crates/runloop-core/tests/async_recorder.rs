// runloop-core/tests/async_recorder.rs
// ============================================================================
// Module: Async Recorder Tests
// Description: Tests for the best-effort queued execution sink.
// ============================================================================
//! ## Overview
//! Validates that queued events drain to the journal, counters track the
//! flow, and shutdown waits for the worker.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;

use runloop_core::ExecutionEvent;
use runloop_core::MemoryRunStore;
use runloop_core::ProjectId;
use runloop_core::Run;
use runloop_core::RunEventJournal;
use runloop_core::RunEventRecorder;
use runloop_core::RunId;
use runloop_core::RunRepository;
use runloop_core::Timestamp;
use runloop_core::WorkflowId;
use runloop_core::interfaces::ExecutionEventSink;
use runloop_core::runtime::AsyncEventRecorder;

/// Tests that enqueued events drain into the journal before shutdown.
#[tokio::test]
async fn test_events_drain_to_journal() {
    let store = MemoryRunStore::new();
    let run = Run::new_workflow_run(
        RunId::new("run-1"),
        ProjectId::new("proj-1"),
        WorkflowId::new("wf-1"),
        Timestamp::now(),
    )
    .unwrap();
    store.save(&run).unwrap();

    let recorder = Arc::new(RunEventRecorder::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));
    let sink = AsyncEventRecorder::start(recorder, 16);

    for index in 0..5 {
        let event = ExecutionEvent::new("node_start").with("node_id", format!("n{index}"));
        sink.record(&run.run_id, &event).unwrap();
    }
    let stats = sink.stats();
    assert_eq!(stats.enqueued, 5);
    assert_eq!(stats.dropped, 0);

    sink.stop().await;

    let events = store.list_all(&run.run_id).unwrap();
    assert_eq!(events.len(), 5);
    assert!(events.iter().all(|event| event.event_type == "node_start"));
}
