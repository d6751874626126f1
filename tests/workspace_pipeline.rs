use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use kiln_core::config::EngineConfig;
use kiln_core::traits::LanguageModel;
use kiln_core::{CookState, KilnError};
use kiln_graph::{Catalog, NodeUpdate, Workspace, LOOPER};
use kiln_test_utils::{fixture_catalog, must, set_param, MockModel};

fn full_catalog() -> Catalog {
    let mut catalog = fixture_catalog();
    kiln_nodes::register_builtins(&mut catalog);
    catalog
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// file_in -> split -> search -> query -> file_out
fn build_pipeline(ws: &mut Workspace, input_glob: &str, output: &str) {
    must(ws.create_node("file_in", "/", Some("docs")), "create docs");
    must(ws.create_node("split", "/", Some("lines")), "create lines");
    must(ws.create_node("search", "/", Some("pick")), "create pick");
    must(ws.create_node("query", "/", Some("ask")), "create ask");
    must(ws.create_node("file_out", "/", Some("out")), "create out");
    must(ws.connect("/docs", 0, "/lines", 0), "docs -> lines");
    must(ws.connect("/lines", 0, "/pick", 0), "lines -> pick");
    must(ws.connect("/pick", 0, "/ask", 0), "pick -> ask");
    must(ws.connect("/ask", 0, "/out", 0), "ask -> out");
    set_param(ws, "/docs", "path", input_glob);
    set_param(ws, "/pick", "pattern", "^alpha");
    set_param(ws, "/ask", "template", "Define {input}");
    set_param(ws, "/out", "path", output);
}

fn write_inputs(dir: &Path) {
    std::fs::write(dir.join("a.txt"), "alpha\nbeta").unwrap();
    std::fs::write(dir.join("b.txt"), "gamma\nalphabet\n").unwrap();
}

#[test]
fn test_pipeline_save_load_and_run() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let glob = path_str(&dir.path().join("*.txt"));
    let output = format!("{}/$PROJECT.out", path_str(dir.path()));

    let mut ws = Workspace::new(full_catalog());
    build_pipeline(&mut ws, &glob, &output);
    let saved = dir.path().join("pipeline.json");
    ws.save(&saved).unwrap();

    let mut loaded = Workspace::load(&saved, kiln_nodes::catalog(&EngineConfig::default()), EngineConfig::default()).unwrap();
    let mock = Arc::new(MockModel::new());
    let model: Arc<dyn LanguageModel> = mock.clone();
    loaded.set_model(Some(model));
    loaded.set_global("PROJECT", "defs").unwrap();

    let report = loaded.evaluate("/out", false).unwrap();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(
        report.output[0],
        vec!["echo: Define alpha", "echo: Define alphabet"]
    );
    let written = std::fs::read_to_string(dir.path().join("defs.out")).unwrap();
    assert_eq!(written, "echo: Define alpha\necho: Define alphabet");
    assert_eq!(mock.call_count(), 2);

    // file_in rereads, finds identical content, and the query stays cached
    let again = loaded.evaluate("/out", false).unwrap();
    assert!(again.success);
    assert_eq!(again.output, report.output);
    assert_eq!(mock.call_count(), 2);
    assert_eq!(loaded.describe("/ask").unwrap().cook_count, 1);

    // New content upstream reaches the model on the next pull
    std::fs::write(dir.path().join("c.txt"), "alpine\nalphanumeric").unwrap();
    let third = loaded.evaluate("/out", false).unwrap();
    assert_eq!(third.output[0].len(), 3);
    assert_eq!(mock.call_count(), 5);
}

#[test]
fn test_query_without_model_is_cook_error() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let mut ws = Workspace::new(full_catalog());
    build_pipeline(
        &mut ws,
        &path_str(&dir.path().join("*.txt")),
        &path_str(&dir.path().join("out.txt")),
    );

    let report = ws.evaluate("/out", false).unwrap();
    assert!(!report.success);
    assert!(report.errors.iter().any(|e| e.contains("/ask")), "{:?}", report.errors);
    assert_eq!(report.state, CookState::Uncooked);
    let ask = ws.describe("/ask").unwrap();
    assert!(ask.errors.iter().any(|e| e.contains("language model")), "{:?}", ask.errors);
    assert!(!dir.path().join("out.txt").exists());
}

#[test]
fn test_invalidation_leaves_unrelated_nodes_alone() {
    let mut ws = Workspace::new(full_catalog());
    ws.create_node("text", "/", Some("a")).unwrap();
    ws.create_node("text", "/", Some("b")).unwrap();
    set_param(&mut ws, "/a", "text", "one");
    set_param(&mut ws, "/b", "text", "two");
    ws.evaluate("/a", false).unwrap();
    ws.evaluate("/b", false).unwrap();

    set_param(&mut ws, "/a", "text", "uno");
    assert_eq!(ws.describe("/a").unwrap().state, CookState::Uncooked);
    assert_eq!(ws.describe("/b").unwrap().state, CookState::Unchanged);

    let a = ws.evaluate("/a", false).unwrap();
    let b = ws.evaluate("/b", false).unwrap();
    assert_eq!(a.output[0], vec!["uno"]);
    assert_eq!(a.cook_count, 2);
    assert_eq!(b.cook_count, 1);
}

#[test]
fn test_cycle_rejection_leaves_graph_unchanged() {
    let mut ws = Workspace::new(full_catalog());
    for name in ["a", "b", "c"] {
        ws.create_node("merge", "/", Some(name)).unwrap();
    }
    ws.connect("/a", 0, "/b", 0).unwrap();
    ws.connect("/b", 0, "/c", 0).unwrap();
    let before = ws.connections();

    assert!(matches!(ws.connect("/b", 0, "/a", 0), Err(KilnError::Cycle { .. })));
    assert!(matches!(ws.connect("/c", 0, "/a", 0), Err(KilnError::Cycle { .. })));
    assert_eq!(ws.connections(), before);
}

#[test]
fn test_delete_leaves_no_dangling_connections() {
    let mut ws = Workspace::new(full_catalog());
    for name in ["src", "mid", "dst"] {
        ws.create_node("merge", "/", Some(name)).unwrap();
    }
    ws.connect("/src", 0, "/mid", 0).unwrap();
    ws.connect("/mid", 0, "/dst", 0).unwrap();
    ws.connect("/src", 0, "/dst", 0).unwrap();

    ws.delete_node("/mid").unwrap();
    let remaining = ws.connections();
    assert_eq!(remaining.len(), 1);
    assert!(remaining.iter().all(|c| c.from != "/mid" && c.to != "/mid"));
}

#[test]
fn test_global_substitution_and_missing_warning() {
    let mut ws = Workspace::new(full_catalog());
    ws.create_node("text", "/", Some("name")).unwrap();
    set_param(&mut ws, "/name", "text", "out_$PROJECT.txt");
    ws.set_global("PROJECT", "demo").unwrap();

    let report = ws.evaluate("/name", false).unwrap();
    assert_eq!(report.output[0], vec!["out_demo.txt"]);
    assert!(report.warnings.is_empty());

    ws.delete_global("PROJECT");
    let report = ws.evaluate("/name", false).unwrap();
    assert!(report.success);
    assert_eq!(report.output[0], vec!["out_$PROJECT.txt"]);
    assert!(report.warnings.iter().any(|w| w.contains("PROJECT")), "{:?}", report.warnings);
}

#[test]
fn test_looper_over_builtin_nodes() {
    // Each iteration tags every line with its index, then joins them
    let mut ws = Workspace::new(full_catalog());
    ws.create_node("text", "/", Some("src")).unwrap();
    ws.create_node(LOOPER, "/", Some("loop")).unwrap();
    ws.create_node("suffix_index", "/loop", Some("tag")).unwrap();
    ws.create_node("join", "/loop", Some("glue")).unwrap();
    ws.loop_boundaries("/loop").unwrap();
    ws.connect("/src", 0, "/loop", 0).unwrap();
    ws.connect("/loop/input", 0, "/loop/tag", 0).unwrap();
    ws.connect("/loop/tag", 0, "/loop/glue", 0).unwrap();
    ws.connect("/loop/glue", 0, "/loop/output", 0).unwrap();
    ws.update_node(
        "/src",
        NodeUpdate::default().param("text", "a\nb").param("split_lines", true),
    )
    .unwrap();
    ws.update_node(
        "/loop",
        NodeUpdate::default().param("max_from_input", true).param("min", 1i64),
    )
    .unwrap();
    set_param(&mut ws, "/loop/glue", "separator", "+");

    let report = ws.evaluate("/loop", false).unwrap();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.output[0], vec!["a1+b1", "a2+b2"]);

    // Loop bodies are cached until something inside changes
    let again = ws.evaluate("/loop", false).unwrap();
    assert_eq!(again.cook_count, report.cook_count);
    set_param(&mut ws, "/loop/glue", "separator", ",");
    let changed = ws.evaluate("/loop", false).unwrap();
    assert_eq!(changed.output[0], vec!["a1,b1", "a2,b2"]);
}

#[test]
fn test_cli_runs_saved_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let mut ws = Workspace::new(kiln_nodes::catalog(&EngineConfig::default()));
    ws.create_node("text", "/", Some("greeting")).unwrap();
    ws.create_node("replace", "/", Some("shout")).unwrap();
    ws.connect("/greeting", 0, "/shout", 0).unwrap();
    set_param(&mut ws, "/greeting", "text", "hello $WHO");
    set_param(&mut ws, "/shout", "pattern", "hello");
    set_param(&mut ws, "/shout", "replacement", "HELLO");
    let file = dir.path().join("ws.json");
    ws.save(&file).unwrap();

    let config = dir.path().join("kiln.toml");
    std::fs::write(&config, "[globals]\nWHO = \"config\"\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_kiln"))
        .arg("-c")
        .arg(&config)
        .arg("run")
        .arg(&file)
        .arg("/shout")
        .args(["--set", "WHO=world", "--json"])
        .env("KILN_LOG", "off")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["output"][0][0], "HELLO world");

    let failed = Command::new(env!("CARGO_BIN_EXE_kiln"))
        .arg("-c")
        .arg(&config)
        .arg("run")
        .arg(&file)
        .arg("/missing")
        .env("KILN_LOG", "off")
        .output()
        .unwrap();
    assert!(!failed.status.success());
}
