use regex::{Regex, RegexBuilder};

use kiln_core::error::{KilnError, Result};
use kiln_core::{Items, Parameter};
use kiln_graph::{CookContext, NodeType};

fn compile(ctx: &CookContext<'_>, pattern: &str, ignore_case: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|e| KilnError::cook(ctx.path(), format!("invalid pattern: {}", e)))
}

// ── search ──────────────────────────────────────────────────────

/// Partition items by a regular expression: matches on output 0, the rest on output 1.
pub fn search_type() -> NodeType {
    NodeType::new("search", cook_search)
        .glyph("⌕")
        .group("pattern")
        .description("Route items matching a regular expression to the first output")
        .outputs(&["matched", "unmatched"])
        .param(Parameter::string("pattern", ""))
        .param(Parameter::toggle("ignore_case", false))
}

fn cook_search(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let pattern = ctx.param_str("pattern")?;
    let ignore_case = ctx.param_bool("ignore_case")?;
    let re = compile(ctx, &pattern, ignore_case)?;

    let (matched, unmatched): (Items, Items) =
        ctx.input(0).into_iter().partition(|item| re.is_match(item));
    tracing::trace!(node = ctx.path(), matched = matched.len(), unmatched = unmatched.len(), "Search");
    Ok(vec![matched, unmatched])
}

// ── replace ─────────────────────────────────────────────────────

pub fn replace_type() -> NodeType {
    NodeType::new("replace", cook_replace)
        .glyph("⇄")
        .group("pattern")
        .description("Regex replace in every item; `$1` and `${name}` refer to captures")
        .param(Parameter::string("pattern", ""))
        .param(Parameter::string("replacement", ""))
}

fn cook_replace(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let pattern = ctx.param_str("pattern")?;
    let replacement = ctx.param_str("replacement")?;
    let items = ctx.input(0);
    if pattern.is_empty() {
        return Ok(vec![items]);
    }
    let re = compile(ctx, &pattern, false)?;
    Ok(vec![items
        .iter()
        .map(|item| re.replace_all(item, replacement.as_str()).into_owned())
        .collect()])
}
