use serde_json::Value;

use kiln_core::error::Result;
use kiln_core::{Items, Parameter};
use kiln_graph::{CookContext, NodeType};

/// Parse each item as JSON and pull out the value at a dot/bracket path.
pub fn json_extract_type() -> NodeType {
    NodeType::new("json_extract", cook_json_extract)
        .glyph("{}")
        .group("data")
        .description("Extract a value from every JSON item, e.g. `results[0].title`")
        .param(Parameter::string("path", ""))
}

fn cook_json_extract(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let path = ctx.param_str("path")?;
    let mut out = Vec::new();

    for (index, item) in ctx.input(0).iter().enumerate() {
        let value: Value = match serde_json::from_str(item) {
            Ok(v) => v,
            Err(e) => {
                ctx.warn(format!("Item {} is not valid JSON: {}", index, e));
                continue;
            }
        };
        match json_path_query(&value, &path) {
            Value::Null => ctx.warn(format!("Path '{}' not found in item {}", path, index)),
            Value::Array(values) => out.extend(values.iter().map(render)),
            other => out.push(render(&other)),
        }
    }
    Ok(vec![out])
}

/// Strings come out bare, everything else as compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walk `a.b[0].c`. Segments may chain indices (`grid[1][2]`).
fn json_path_query(value: &Value, path: &str) -> Value {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (key, mut rest) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            match current.get(key) {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return Value::Null;
            }
            let Some(end) = rest.find(']') else {
                return Value::Null;
            };
            let next = rest[1..end]
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|idx| current.get(idx));
            match next {
                Some(next) => current = next,
                None => return Value::Null,
            }
            rest = &rest[end + 1..];
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::config::EngineConfig;
    use kiln_graph::Workspace;
    use kiln_test_utils::{must, set_param};

    #[test]
    fn test_json_path_query() {
        let v: Value = serde_json::json!({
            "results": [{"title": "a"}, {"title": "b"}],
            "grid": [[1, 2], [3, 4]],
        });
        assert_eq!(json_path_query(&v, "results[1].title"), Value::from("b"));
        assert_eq!(json_path_query(&v, "grid[1][0]"), Value::from(3));
        assert_eq!(json_path_query(&v, "missing.x"), Value::Null);
        assert_eq!(json_path_query(&v, "results[9]"), Value::Null);
        assert_eq!(json_path_query(&v, ""), v);
    }

    #[test]
    fn test_json_path_query_malformed_brackets() {
        let v: Value = serde_json::json!({"a": [1, 2], "b": {"c": 3}});
        assert_eq!(json_path_query(&v, "a[0]]"), Value::Null);
        assert_eq!(json_path_query(&v, "a]"), Value::Null);
        assert_eq!(json_path_query(&v, "a[0"), Value::Null);
        assert_eq!(json_path_query(&v, "a[0]x"), Value::Null);
        assert_eq!(json_path_query(&v, "b]c"), Value::Null);
        assert_eq!(json_path_query(&v, "a[1]"), Value::from(2));
    }

    #[test]
    fn test_extract_flattens_arrays_and_warns() {
        let mut ws = Workspace::new(crate::catalog(&EngineConfig::default()));
        must(ws.create_node("text", "/", Some("a")), "create");
        set_param(&mut ws, "/a", "text", r#"{"tags": ["x", "y"], "n": 1}"#);
        must(ws.create_node("text", "/", Some("b")), "create");
        set_param(&mut ws, "/b", "text", "not json");
        must(ws.create_node("merge", "/", Some("m")), "create");
        must(ws.connect("/a", 0, "/m", 0), "connect");
        must(ws.connect("/b", 0, "/m", 0), "connect");
        must(ws.create_node("json_extract", "/", Some("j")), "create");
        set_param(&mut ws, "/j", "path", "tags");
        must(ws.connect("/m", 0, "/j", 0), "connect");

        let report = ws.evaluate("/j", false).unwrap();
        assert!(report.success);
        assert_eq!(report.output[0], vec!["x", "y"]);
        assert_eq!(report.warnings.len(), 1);

        set_param(&mut ws, "/j", "path", "n");
        assert_eq!(ws.evaluate("/j", false).unwrap().output[0], vec!["1"]);
    }
}
