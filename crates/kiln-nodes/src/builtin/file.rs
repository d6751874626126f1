use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use kiln_core::error::{KilnError, Result};
use kiln_core::{Items, Parameter};
use kiln_graph::{CookContext, NodeType};

use super::text::unescape;

// ── file_in ─────────────────────────────────────────────────────

/// Read every file matching a glob pattern, one item per file.
///
/// Files change outside the graph, so the node recooks on every evaluation.
pub fn file_in_type() -> NodeType {
    NodeType::new("file_in", cook_file_in)
        .glyph("📄")
        .group("file")
        .description("Read files matching a glob pattern; each file becomes one item")
        .inputs(&[])
        .param(Parameter::string("path", ""))
        .param(Parameter::button("reload"))
        .dynamic()
}

fn cook_file_in(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let pattern = ctx.param_str("path")?;
    if pattern.trim().is_empty() {
        return Ok(vec![vec![]]);
    }
    if ctx.pressed("reload") {
        debug!(node = ctx.path(), pattern = %pattern, "Reload requested");
    }

    let entries = glob::glob(&pattern)
        .map_err(|e| KilnError::cook(ctx.path(), format!("invalid glob '{}': {}", pattern, e)))?;
    let mut files: Vec<PathBuf> = entries.filter_map(|e| e.ok()).filter(|p| p.is_file()).collect();
    files.sort();

    if files.is_empty() {
        ctx.warn(format!("No files match '{}'", pattern));
    }

    let mut items = Vec::with_capacity(files.len());
    for file in &files {
        let content = std::fs::read_to_string(file).map_err(|e| {
            KilnError::cook(ctx.path(), format!("cannot read {}: {}", file.display(), e))
        })?;
        items.push(content);
    }
    debug!(node = ctx.path(), files = files.len(), "Read files");
    Ok(vec![items])
}

// ── file_out ────────────────────────────────────────────────────

const MODES: [&str; 2] = ["overwrite", "append"];

/// Write the input items to a file and pass them through.
pub fn file_out_type() -> NodeType {
    NodeType::new("file_out", cook_file_out)
        .glyph("💾")
        .group("file")
        .description("Write items to a file (joined by a separator) and pass them on")
        .param(Parameter::string("path", ""))
        .param(Parameter::menu("mode", &MODES, MODES[0]))
        .param(Parameter::string("separator", "\\n"))
}

fn cook_file_out(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let path = ctx.param_str("path")?;
    let mode = ctx.param_str("mode")?;
    let separator = unescape(&ctx.param_str("separator")?);
    let items = ctx.input(0);

    if path.trim().is_empty() {
        return Err(KilnError::cook(ctx.path(), "no output path set"));
    }
    let target = Path::new(&path);
    write_items(target, &items, &separator, mode == MODES[1])
        .map_err(|e| KilnError::cook(ctx.path(), format!("cannot write {}: {}", path, e)))?;

    debug!(node = ctx.path(), file = %path, items = items.len(), mode = %mode, "Wrote file");
    Ok(vec![items])
}

fn write_items(target: &Path, items: &[String], separator: &str, append: bool) -> std::io::Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(target)?;
    let mut body = items.join(separator);
    if append && !body.is_empty() {
        body.push_str(separator);
    }
    file.write_all(body.as_bytes())
}
