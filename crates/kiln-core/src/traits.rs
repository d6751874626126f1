use crate::error::Result;

/// A single completion request issued by a query node.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Language model backend used by query nodes.
///
/// Calls are blocking: the cooking engine is single-threaded and performs
/// external calls in evaluation order.
pub trait LanguageModel: Send + Sync + 'static {
    /// Provider/model label for logs and diagnostics.
    fn name(&self) -> &str;

    /// Produce a completion for one request.
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
