// system-tests/tests/helpers/mod.rs
// ============================================================================
// Module: System Test Helpers
// Description: Ephemeral-port server harness and SSE parsing utilities.
// ============================================================================
//! ## Overview
//! Spawns the real server on an ephemeral port, keeps the container handles
//! for in-process seeding, and parses SSE frames incrementally so tests can
//! act mid-stream (confirmation decisions).

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
    dead_code,
    reason = "Test-only helpers; not every test uses every helper."
)]

use std::sync::Arc;

use runloop_core::EdgeId;
use runloop_core::NodeId;
use runloop_core::ProjectId;
use runloop_core::WorkflowId;
use runloop_core::WorkflowRepository;
use runloop_core::core::workflow::EdgeSpec;
use runloop_core::core::workflow::NodeSpec;
use runloop_core::core::workflow::NodeType;
use runloop_core::core::workflow::WorkflowSpec;
use runloop_server::RunloopConfig;
use runloop_server::ServerState;
use runloop_server::build_router;
use serde_json::Map;
use serde_json::Value;
use tokio_stream::StreamExt;

// ============================================================================
// SECTION: Server Harness
// ============================================================================

/// Running server plus its in-process container handles.
pub struct TestServer {
    /// Base URL of the listener.
    pub base_url: String,
    /// Shared container state for seeding and assertions.
    pub state: Arc<ServerState>,
    /// HTTP client.
    pub client: reqwest::Client,
}

/// Spawns a memory-backed server on an ephemeral port.
pub async fn spawn_server() -> TestServer {
    let state = ServerState::from_config(RunloopConfig::default()).unwrap();
    let router = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    TestServer {
        base_url: format!("http://{address}"),
        state,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    /// Returns a fully-qualified URL for a path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Creates a run over HTTP and returns its id.
    pub async fn create_run(&self, project_id: &str, workflow_id: &str) -> String {
        let response = self
            .client
            .post(self.url(&format!("/api/projects/{project_id}/workflows/{workflow_id}/runs")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        body.get("id").and_then(Value::as_str).unwrap().to_string()
    }
}

// ============================================================================
// SECTION: Workflow Fixtures
// ============================================================================

/// Builds a node with config key/value string pairs.
fn node(id: &str, node_type: NodeType, config: &[(&str, &str)]) -> NodeSpec {
    let mut map = Map::new();
    for (key, value) in config {
        map.insert((*key).to_string(), Value::from(*value));
    }
    NodeSpec { node_id: NodeId::new(id), node_type, config: map }
}

/// Builds an edge between two nodes.
fn edge(id: &str, source: &str, target: &str) -> EdgeSpec {
    EdgeSpec {
        edge_id: EdgeId::new(id),
        source_node_id: NodeId::new(source),
        target_node_id: NodeId::new(target),
    }
}

/// Seeds a start -> end workflow.
pub fn seed_linear_workflow(state: &ServerState, workflow_id: &str) {
    state
        .workflows
        .save(&WorkflowSpec {
            workflow_id: WorkflowId::new(workflow_id),
            project_id: ProjectId::new("proj-1"),
            name: "linear".to_string(),
            description: Some("export the data".to_string()),
            nodes: vec![node("start", NodeType::Start, &[]), node("end", NodeType::End, &[])],
            edges: vec![edge("e1", "start", "end")],
        })
        .unwrap();
}

/// Seeds a start -> notification -> end workflow (side-effect gated).
pub fn seed_notify_workflow(state: &ServerState, workflow_id: &str) {
    state
        .workflows
        .save(&WorkflowSpec {
            workflow_id: WorkflowId::new(workflow_id),
            project_id: ProjectId::new("proj-1"),
            name: "notify".to_string(),
            description: Some("send the report".to_string()),
            nodes: vec![
                node("start", NodeType::Start, &[]),
                node("notify", NodeType::Notification, &[("channel", "ops")]),
                node("end", NodeType::End, &[]),
            ],
            edges: vec![edge("e1", "start", "notify"), edge("e2", "notify", "end")],
        })
        .unwrap();
}

/// Seeds a workflow with a cycle on the main subgraph.
pub fn seed_cyclic_workflow(state: &ServerState, workflow_id: &str) {
    state
        .workflows
        .save(&WorkflowSpec {
            workflow_id: WorkflowId::new(workflow_id),
            project_id: ProjectId::new("proj-1"),
            name: "cyclic".to_string(),
            description: None,
            nodes: vec![
                node("start", NodeType::Start, &[]),
                node("a", NodeType::Condition, &[("expression", "x")]),
                node("b", NodeType::Condition, &[("expression", "y")]),
                node("end", NodeType::End, &[]),
            ],
            edges: vec![
                edge("e1", "start", "a"),
                edge("e2", "a", "b"),
                edge("e3", "b", "a"),
                edge("e4", "a", "end"),
            ],
        })
        .unwrap();
}

// ============================================================================
// SECTION: SSE Parsing
// ============================================================================

/// Chunk type yielded by `reqwest::Response::bytes_stream` (the workspace
/// resolves one `bytes` crate; axum re-exports it).
type Chunk = axum::body::Bytes;

/// Boxed byte stream from a streaming response.
type ChunkStream =
    std::pin::Pin<Box<dyn tokio_stream::Stream<Item = Result<Chunk, reqwest::Error>> + Send>>;

/// Incremental SSE frame reader over a streaming response.
pub struct SseReader {
    /// Byte stream from the response.
    stream: ChunkStream,
    /// Undelivered buffered text.
    buffer: String,
}

impl SseReader {
    /// Wraps a streaming response.
    pub fn new(response: reqwest::Response) -> Self {
        Self { stream: Box::pin(response.bytes_stream()), buffer: String::new() }
    }

    /// Returns the next SSE data frame as JSON, or `None` at end of stream.
    pub async fn next_event(&mut self) -> Option<Value> {
        loop {
            if let Some(frame_end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..frame_end + 2).collect();
                for line in frame.lines() {
                    if let Some(data) = line.strip_prefix("data: ") {
                        if let Ok(value) = serde_json::from_str::<Value>(data) {
                            return Some(value);
                        }
                    }
                }
                continue;
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                Some(Err(_)) | None => return None,
            }
        }
    }

    /// Drains the stream, returning every remaining event.
    pub async fn drain(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }
}

/// Returns the event types of a JSON event list.
pub fn event_types(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| event.get("type").and_then(Value::as_str).map(str::to_string))
        .collect()
}
