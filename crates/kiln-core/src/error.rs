use thiserror::Error;

#[derive(Debug, Error)]
pub enum KilnError {
    // Validation errors
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Path already exists: {0}")]
    DuplicatePath(String),

    #[error("Invalid node name: {0}")]
    InvalidName(String),

    #[error("Invalid parent for {child}: {parent}")]
    InvalidParent { parent: String, child: String },

    #[error("Node type cannot be created directly: {0}")]
    NotCreatable(String),

    #[error("Node is owned by its looper: {0}")]
    Protected(String),

    #[error("Connection rejected: {0}")]
    Connection(String),

    #[error("Connection would create a cycle: {from} -> {to}")]
    Cycle { from: String, to: String },

    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("Parameter is read-only: {0}")]
    ReadOnlyParameter(String),

    #[error("Invalid value for parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Invalid global variable name: {0}")]
    InvalidGlobal(String),

    // Cook errors
    #[error("Cook failed: {node}: {message}")]
    Cook { node: String, message: String },

    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("No language model configured")]
    NoModel,

    // Resource-limit errors
    #[error("Looper timed out at iteration {iteration} after {elapsed_secs:.3}s (limit {limit_secs}s)")]
    LoopTimeout {
        iteration: i64,
        elapsed_secs: f64,
        limit_secs: f64,
    },

    #[error("Looper data limit exceeded at iteration {iteration}: {bytes} bytes (limit {limit} bytes)")]
    LoopDataLimit {
        iteration: i64,
        bytes: usize,
        limit: usize,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Persistence errors
    #[error("Workspace document error: {0}")]
    Document(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KilnError {
    /// Whether this error rejects a request outright (core state unchanged)
    /// rather than describing a failed cook.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            KilnError::UnknownNodeType(_)
                | KilnError::NodeNotFound(_)
                | KilnError::DuplicatePath(_)
                | KilnError::InvalidName(_)
                | KilnError::InvalidParent { .. }
                | KilnError::NotCreatable(_)
                | KilnError::Protected(_)
                | KilnError::Connection(_)
                | KilnError::Cycle { .. }
                | KilnError::ParameterNotFound(_)
                | KilnError::ReadOnlyParameter(_)
                | KilnError::InvalidParameter { .. }
                | KilnError::InvalidGlobal(_)
        )
    }

    pub fn cook(node: impl Into<String>, message: impl Into<String>) -> Self {
        KilnError::Cook {
            node: node.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(KilnError::UnknownNodeType("x".into()).is_validation());
        assert!(KilnError::Cycle {
            from: "/a".into(),
            to: "/b".into()
        }
        .is_validation());
        assert!(!KilnError::cook("/a", "boom").is_validation());
        assert!(!KilnError::LoopDataLimit {
            iteration: 2,
            bytes: 10,
            limit: 5
        }
        .is_validation());
    }

    #[test]
    fn test_resource_limit_messages_are_distinct() {
        let timeout = KilnError::LoopTimeout {
            iteration: 3,
            elapsed_secs: 1.5,
            limit_secs: 0.5,
        };
        let data = KilnError::LoopDataLimit {
            iteration: 3,
            bytes: 100,
            limit: 10,
        };
        assert!(timeout.to_string().contains("timed out at iteration 3"));
        assert!(data.to_string().contains("data limit exceeded at iteration 3"));
    }
}
