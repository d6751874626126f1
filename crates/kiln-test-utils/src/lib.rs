//! Shared mocks and fixtures for Kiln tests.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use kiln_core::error::{KilnError, Result};
use kiln_core::traits::{CompletionRequest, LanguageModel};
use kiln_core::{Items, ParamValue, Parameter};
use kiln_graph::{Catalog, CookContext, NodeType, NodeUpdate, Workspace, LOOPER};

// ── Mock language model ─────────────────────────────────────────

/// Language model that replays scripted responses, then echoes prompts.
pub struct MockModel {
    name: String,
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response.
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queue a failed request.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(KilnError::LlmRequest(message.into())));
        self
    }

    fn push(&self, response: Result<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageModel for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let scripted = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match scripted {
            Some(response) => response,
            None => Ok(format!("echo: {}", request.prompt)),
        }
    }
}

// ── Fixture node types ──────────────────────────────────────────

fn source(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let text = ctx.param_str("text")?;
    Ok(vec![text.lines().map(str::to_string).collect()])
}

fn append_index(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let mut items = ctx.input(0);
    items.push(ctx.iteration().unwrap_or(0).to_string());
    Ok(vec![items])
}

fn suffix_index(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let index = ctx.iteration().unwrap_or(0);
    Ok(vec![ctx
        .input(0)
        .into_iter()
        .map(|item| format!("{}{}", item, index))
        .collect()])
}

fn sleep(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let secs = ctx.param_float("seconds")?;
    std::thread::sleep(Duration::from_secs_f64(secs.max(0.0)));
    Ok(vec![ctx.input(0)])
}

fn fail(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let message = ctx.param_str("message")?;
    Err(KilnError::cook(ctx.path(), message))
}

static COUNTER_COOKS: AtomicUsize = AtomicUsize::new(0);

fn counter(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let n = COUNTER_COOKS.fetch_add(1, Ordering::SeqCst) + 1;
    let mut items = ctx.input(0);
    items.push(n.to_string());
    Ok(vec![items])
}

/// Fixture types used across crate tests:
///
/// - `source`: no inputs, emits the lines of its `text` parameter
/// - `append_index`: input plus the loop iteration index as a new item
/// - `suffix_index`: every input item with the loop iteration index appended
/// - `sleep`: passes input through after sleeping `seconds`
/// - `fail`: always fails with `message`
/// - `counter`: input plus a process-wide cook counter; always dynamic
pub fn fixture_types() -> Vec<NodeType> {
    vec![
        NodeType::new("source", source)
            .inputs(&[])
            .group("fixture")
            .param(Parameter::string("text", "")),
        NodeType::new("append_index", append_index).group("fixture"),
        NodeType::new("suffix_index", suffix_index).group("fixture"),
        NodeType::new("sleep", sleep)
            .group("fixture")
            .param(Parameter::float("seconds", 0.0)),
        NodeType::new("fail", fail)
            .group("fixture")
            .param(Parameter::string("message", "fixture failure")),
        NodeType::new("counter", counter).group("fixture").dynamic(),
    ]
}

/// Catalog with the looper types and every fixture type.
pub fn fixture_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    for ty in fixture_types() {
        catalog.register(ty);
    }
    catalog
}

// ── Workspace helpers ───────────────────────────────────────────

/// Set one parameter, panicking on failure.
pub fn set_param(ws: &mut Workspace, node: &str, name: &str, value: impl Into<ParamValue>) {
    ws.update_node(node, NodeUpdate::default().param(name, value))
        .unwrap_or_else(|e| panic!("setting {}.{} failed: {}", node, name, e));
}

/// Wire `/src -> /loop` with a single `body` node between the loop boundaries.
///
/// `/src` emits the lines of `input`; the looper iterates 1..=3.
pub fn looper_workspace(catalog: Catalog, body_type: &str, input: &str) -> Workspace {
    let mut ws = Workspace::new(catalog);
    build_looper(&mut ws, body_type, input);
    ws
}

pub fn build_looper(ws: &mut Workspace, body_type: &str, input: &str) {
    must(ws.create_node("source", "/", Some("src")), "create /src");
    must(ws.create_node(LOOPER, "/", Some("loop")), "create /loop");
    must(ws.create_node(body_type, "/loop", Some("body")), "create /loop/body");
    must(ws.loop_boundaries("/loop"), "loop boundaries");
    must(ws.connect("/src", 0, "/loop", 0), "connect /src");
    must(ws.connect("/loop/input", 0, "/loop/body", 0), "connect body input");
    must(ws.connect("/loop/body", 0, "/loop/output", 0), "connect body output");
    set_param(ws, "/src", "text", input);
    set_param(ws, "/loop", "min", 1i64);
    set_param(ws, "/loop", "max", 3i64);
}

/// Unwrap a setup step, naming it in the panic message.
pub fn must<T>(result: Result<T>, what: &str) -> T {
    result.unwrap_or_else(|e| panic!("{} failed: {}", what, e))
}

/// Write `content` to a named temp file with the given suffix.
pub fn temp_file(content: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .unwrap_or_else(|e| panic!("temp file: {}", e));
    file.write_all(content.as_bytes())
        .unwrap_or_else(|e| panic!("temp file write: {}", e));
    file
}
