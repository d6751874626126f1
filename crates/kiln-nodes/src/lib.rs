//! Built-in leaf node types.

pub mod builtin;

use kiln_core::config::EngineConfig;
use kiln_graph::Catalog;

/// Register every built-in leaf type.
pub fn register_builtins(catalog: &mut Catalog) {
    // ── Text ────────────────────────────────────────────────────
    catalog.register(builtin::text::text_type());
    catalog.register(builtin::text::merge_type());
    catalog.register(builtin::text::null_type());
    catalog.register(builtin::text::split_type());
    catalog.register(builtin::text::join_type());

    // ── Pattern matching ────────────────────────────────────────
    catalog.register(builtin::search::search_type());
    catalog.register(builtin::search::replace_type());

    // ── Data ────────────────────────────────────────────────────
    catalog.register(builtin::data::json_extract_type());

    // ── Files ───────────────────────────────────────────────────
    catalog.register(builtin::file::file_in_type());
    catalog.register(builtin::file::file_out_type());

    // ── LLM ─────────────────────────────────────────────────────
    catalog.register(builtin::query::query_type());
}

/// Catalog with the looper types and all built-ins.
pub fn catalog(engine: &EngineConfig) -> Catalog {
    let mut catalog = Catalog::with_engine(engine);
    register_builtins(&mut catalog);
    catalog
}
