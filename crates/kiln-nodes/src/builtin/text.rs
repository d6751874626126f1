use kiln_core::error::Result;
use kiln_core::{Items, Parameter};
use kiln_graph::{Arity, CookContext, NodeType};

// ── text ────────────────────────────────────────────────────────

/// Upstream items followed by the node's own text.
pub fn text_type() -> NodeType {
    NodeType::new("text", cook_text)
        .glyph("T")
        .group("text")
        .description("Append literal text to whatever arrives on the input")
        .arity(Arity::Multiple)
        .param(Parameter::string("text", ""))
        .param(Parameter::toggle("split_lines", false))
}

fn cook_text(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let mut items = ctx.input(0);
    let text = ctx.param_str("text")?;
    if ctx.param_bool("split_lines")? {
        items.extend(text.lines().map(str::to_string));
    } else if !text.is_empty() {
        items.push(text);
    }
    Ok(vec![items])
}

// ── merge ───────────────────────────────────────────────────────

pub fn merge_type() -> NodeType {
    NodeType::new("merge", cook_merge)
        .glyph("⋃")
        .group("text")
        .description("Concatenate every connected input")
        .arity(Arity::Multiple)
        .param(Parameter::toggle("dedupe", false))
}

fn cook_merge(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let items = ctx.input(0);
    if !ctx.param_bool("dedupe")? {
        return Ok(vec![items]);
    }
    let mut seen = std::collections::HashSet::new();
    Ok(vec![items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()])
}

// ── null ────────────────────────────────────────────────────────

pub fn null_type() -> NodeType {
    NodeType::new("null", cook_null)
        .glyph("∅")
        .group("text")
        .description("Pass input through unchanged")
}

fn cook_null(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    Ok(vec![ctx.input(0)])
}

// ── split ───────────────────────────────────────────────────────

pub fn split_type() -> NodeType {
    NodeType::new("split", cook_split)
        .glyph("⑂")
        .group("text")
        .description("Split every item on a delimiter")
        .param(Parameter::string("delimiter", "\n"))
        .param(Parameter::toggle("trim", true))
        .param(Parameter::toggle("keep_empty", false))
}

fn cook_split(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let delimiter = unescape(&ctx.param_str("delimiter")?);
    let trim = ctx.param_bool("trim")?;
    let keep_empty = ctx.param_bool("keep_empty")?;

    let mut out = Vec::new();
    for item in ctx.input(0) {
        let pieces: Vec<&str> = if delimiter.is_empty() {
            vec![item.as_str()]
        } else {
            item.split(delimiter.as_str()).collect()
        };
        for piece in pieces {
            let piece = if trim { piece.trim() } else { piece };
            if keep_empty || !piece.is_empty() {
                out.push(piece.to_string());
            }
        }
    }
    Ok(vec![out])
}

// ── join ────────────────────────────────────────────────────────

pub fn join_type() -> NodeType {
    NodeType::new("join", cook_join)
        .glyph("⑃")
        .group("text")
        .description("Join all items into one")
        .param(Parameter::string("separator", "\n"))
}

fn cook_join(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let separator = unescape(&ctx.param_str("separator")?);
    let items = ctx.input(0);
    if items.is_empty() {
        return Ok(vec![vec![]]);
    }
    Ok(vec![vec![items.join(&separator)]])
}

/// Interpret `\n`, `\t` and `\\` typed into a single-line parameter field.
pub(crate) fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
