//! Fixture node types for unit tests.
//!
//! `kiln-test-utils` depends on this crate, so unit tests here cannot use it:
//! a dev-dependency would link a second copy of `kiln-graph` whose `Catalog`
//! and `Workspace` are distinct types. Integration tests under `tests/` and
//! downstream crates use `kiln_test_utils::fixture_catalog` instead. The
//! types below that have no counterpart there (`pass`, `gather`, `fork`,
//! `ticker`, `clicker`, `panic`) exercise engine paths only unit tests reach.

use std::time::Duration;

use kiln_core::error::{KilnError, Result};
use kiln_core::{Items, Parameter};

use crate::catalog::Catalog;
use crate::descriptor::{Arity, CookContext, NodeType};

fn source(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let text = ctx.param_str("text")?;
    Ok(vec![text.lines().map(str::to_string).collect()])
}

fn pass(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    ctx.param_str("label")?;
    Ok(vec![ctx.input(0)])
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
    std::thread::sleep(Duration::from_secs_f64(secs));
    Ok(vec![ctx.input(0)])
}

fn fail(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    Err(KilnError::cook(ctx.path(), "boom"))
}

fn panics(_ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    panic!("index out of range");
}

fn fork(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let items = ctx.input(0);
    let mut reversed = items.clone();
    reversed.reverse();
    Ok(vec![items, reversed])
}

fn clicker(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let out = if ctx.pressed("bump") {
        vec!["pressed".to_string()]
    } else {
        vec![]
    };
    Ok(vec![out])
}

pub(crate) fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.register(
        NodeType::new("source", source)
            .inputs(&[])
            .param(Parameter::string("text", "")),
    );
    catalog.register(NodeType::new("pass", pass).param(Parameter::string("label", "")));
    catalog.register(NodeType::new("gather", pass).arity(Arity::Multiple).param(Parameter::string("label", "")));
    catalog.register(NodeType::new("append_index", append_index));
    catalog.register(NodeType::new("suffix_index", suffix_index));
    catalog.register(NodeType::new("sleep", sleep).param(Parameter::float("seconds", 0.0)));
    catalog.register(NodeType::new("fail", fail));
    catalog.register(NodeType::new("panic", panics));
    catalog.register(NodeType::new("fork", fork).outputs(&["items", "reversed"]));
    catalog.register(NodeType::new("ticker", pass).param(Parameter::string("label", "")).dynamic());
    catalog.register(
        NodeType::new("clicker", clicker)
            .inputs(&[])
            .param(Parameter::button("bump")),
    );
    catalog
}
