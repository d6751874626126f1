use serde::{Deserialize, Serialize};

/// Process-lifetime node identifier. Never reused within a session.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a single edge in the connection graph.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Cook state of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookState {
    /// Needs (re)computation before its output can be trusted.
    #[default]
    Uncooked,
    /// Currently on the evaluation stack.
    Cooking,
    /// Output is current until something invalidates it.
    Unchanged,
}

impl std::fmt::Display for CookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CookState::Uncooked => write!(f, "uncooked"),
            CookState::Cooking => write!(f, "cooking"),
            CookState::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// The data carried on a single port: an ordered list of text items.
pub type Items = Vec<String>;

/// Total UTF-8 byte size of a list of items.
pub fn items_size(items: &[String]) -> usize {
    items.iter().map(|s| s.len()).sum()
}
