use tracing::debug;

use kiln_core::error::Result;
use kiln_core::traits::CompletionRequest;
use kiln_core::{Items, Parameter};
use kiln_graph::{CookContext, NodeType};

const PLACEHOLDER: &str = "{input}";

/// Send items to the workspace language model.
///
/// One request per item, or a single request over all items with `batch`.
/// Requests are issued in item order.
pub fn query_type() -> NodeType {
    NodeType::new("query", cook_query)
        .glyph("✦")
        .group("llm")
        .description("Prompt the language model with each item (or all items at once)")
        .param(Parameter::string("template", PLACEHOLDER))
        .param(Parameter::string("system", ""))
        .param(Parameter::toggle("batch", false))
}

fn render(template: &str, input: &str) -> String {
    if template.contains(PLACEHOLDER) {
        template.replace(PLACEHOLDER, input)
    } else if template.is_empty() {
        input.to_string()
    } else {
        format!("{}\n\n{}", template, input)
    }
}

fn cook_query(ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
    let template = ctx.param_str("template")?;
    let system = ctx.param_str("system")?;
    let batch = ctx.param_bool("batch")?;
    let model = ctx.model()?;
    let items = ctx.input(0);

    let prompts: Vec<String> = if batch {
        if items.is_empty() {
            vec![]
        } else {
            vec![render(&template, &items.join("\n"))]
        }
    } else {
        items.iter().map(|item| render(&template, item)).collect()
    };

    let mut out = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let mut request = CompletionRequest::new(prompt);
        if !system.is_empty() {
            request = request.with_system(system.as_str());
        }
        out.push(model.complete(&request)?);
    }
    debug!(node = ctx.path(), model = model.name(), responses = out.len(), "Queried model");
    Ok(vec![out])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use kiln_core::config::EngineConfig;
    use kiln_graph::Workspace;
    use kiln_test_utils::{must, set_param, MockModel};

    fn ws(model: Option<Arc<MockModel>>) -> Workspace {
        let mut ws = Workspace::new(crate::catalog(&EngineConfig::default()));
        if let Some(model) = model {
            ws.set_model(Some(model));
        }
        must(ws.create_node("text", "/", Some("src")), "create");
        set_param(&mut ws, "/src", "text", "cats\ndogs");
        set_param(&mut ws, "/src", "split_lines", true);
        must(ws.create_node("query", "/", Some("q")), "create");
        must(ws.connect("/src", 0, "/q", 0), "connect");
        ws
    }

    #[test]
    fn test_render_template() {
        assert_eq!(render("Summarize: {input}", "x"), "Summarize: x");
        assert_eq!(render("", "x"), "x");
        assert_eq!(render("Translate", "x"), "Translate\n\nx");
    }

    #[test]
    fn test_query_per_item_in_order() {
        let model = Arc::new(MockModel::new().respond("meow").respond("woof"));
        let mut ws = ws(Some(model.clone()));
        set_param(&mut ws, "/q", "template", "Sound of {input}?");
        set_param(&mut ws, "/q", "system", "Be brief.");

        let report = ws.evaluate("/q", false).unwrap();
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.output[0], vec!["meow", "woof"]);

        let requests = model.requests();
        assert_eq!(requests[0].prompt, "Sound of cats?");
        assert_eq!(requests[1].prompt, "Sound of dogs?");
        assert_eq!(requests[0].system.as_deref(), Some("Be brief."));

        ws.evaluate("/q", false).unwrap();
        assert_eq!(model.call_count(), 2);
    }

    #[test]
    fn test_query_batch() {
        let model = Arc::new(MockModel::new());
        let mut ws = ws(Some(model.clone()));
        set_param(&mut ws, "/q", "batch", true);
        let report = ws.evaluate("/q", false).unwrap();
        assert_eq!(report.output[0], vec!["echo: cats\ndogs"]);
        assert_eq!(model.call_count(), 1);
    }

    #[test]
    fn test_query_without_model_fails() {
        let mut ws = ws(None);
        let report = ws.evaluate("/q", false).unwrap();
        assert!(!report.success);
        assert!(report.errors[0].contains("No language model"));
    }

    #[test]
    fn test_query_model_error_is_cook_error() {
        let model = Arc::new(MockModel::new().respond("ok").fail("rate limited"));
        let mut ws = ws(Some(model));
        let report = ws.evaluate("/q", false).unwrap();
        assert!(!report.success);
        assert!(report.errors[0].contains("rate limited"));
    }
}
