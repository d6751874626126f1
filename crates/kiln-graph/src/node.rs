use std::sync::Arc;
use std::time::Duration;

use kiln_core::{ConnectionId, CookState, Items, NodeId, ParameterStore};

use crate::descriptor::NodeType;

/// Results of the last cook plus the bookkeeping freshness checks rely on.
#[derive(Debug, Clone, Default)]
pub struct CookCache {
    /// One item list per output port.
    pub output: Vec<Items>,
    /// Revision stamp per output port; bumped only when that port's items change.
    pub revisions: Vec<u64>,
    /// Upstream `(connection, revision)` pairs consumed by the last successful cook.
    pub consumed: Vec<(ConnectionId, u64)>,
    pub cook_count: u64,
    pub last_cook: Option<Duration>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// The last cook read the loop iteration index.
    pub loop_sensitive: bool,
}

impl CookCache {
    fn for_outputs(count: usize) -> Self {
        Self {
            output: vec![Items::new(); count],
            revisions: vec![0; count],
            ..Self::default()
        }
    }

    /// Items on one output port (empty before the first cook).
    pub fn port(&self, index: usize) -> &[String] {
        self.output.get(index).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn revision(&self, index: usize) -> u64 {
        self.revisions.get(index).copied().unwrap_or(0)
    }
}

/// Items and iteration index bound to a looper's input boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopBinding {
    pub items: Items,
    pub iteration: i64,
}

/// A node instance owned by the environment.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub path: String,
    pub name: String,
    /// Owning looper, `None` at the root network.
    pub parent: Option<NodeId>,
    pub node_type: Arc<NodeType>,
    pub glyph: String,
    pub group: String,
    pub state: CookState,
    pub params: ParameterStore,
    pub cache: CookCache,
    /// Boundary nodes belong to their looper and cannot be renamed or deleted directly.
    pub protected: bool,
    pub loop_binding: Option<LoopBinding>,
    /// `(input, output)` boundary ids, once materialized.
    pub boundaries: Option<(NodeId, NodeId)>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        path: String,
        name: String,
        parent: Option<NodeId>,
        node_type: Arc<NodeType>,
    ) -> Self {
        Self {
            id,
            path,
            name,
            parent,
            glyph: node_type.glyph.clone(),
            group: node_type.group.clone(),
            state: CookState::Uncooked,
            params: node_type.instantiate_params(),
            cache: CookCache::for_outputs(node_type.outputs.len()),
            protected: false,
            loop_binding: None,
            boundaries: None,
            node_type,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.node_type.name
    }

    pub fn is_looper(&self) -> bool {
        self.node_type.is_looper()
    }

    /// Whether this node must recook on every evaluation, judged from the node alone.
    pub fn is_time_dependent(&self) -> bool {
        self.node_type.always_dynamic || self.params.has_expressions() || self.cache.loop_sensitive
    }

    /// Time dependence that is visible outside an enclosing looper.
    pub(crate) fn is_externally_dynamic(&self) -> bool {
        self.node_type.always_dynamic || self.params.has_expressions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CookContext;
    use kiln_core::error::Result;
    use kiln_core::Parameter;

    fn noop(_ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
        Ok(vec![vec![], vec![]])
    }

    fn make(ty: NodeType) -> Node {
        Node::new(NodeId(1), "/n".into(), "n".into(), None, Arc::new(ty))
    }

    #[test]
    fn test_new_node_is_uncooked_with_empty_ports() {
        let node = make(NodeType::new("two", noop).outputs(&["a", "b"]).glyph("T"));
        assert_eq!(node.state, CookState::Uncooked);
        assert_eq!(node.cache.output.len(), 2);
        assert!(node.cache.port(1).is_empty());
        assert!(node.cache.port(7).is_empty());
        assert_eq!(node.cache.revision(0), 0);
        assert_eq!(node.glyph, "T");
    }

    #[test]
    fn test_time_dependence_sources() {
        let mut node = make(NodeType::new("p", noop).param(Parameter::string("s", "plain")));
        assert!(!node.is_time_dependent());

        node.params.set("s", "x_$NAME").unwrap();
        assert!(node.is_time_dependent());
        assert!(node.is_externally_dynamic());

        node.params.set("s", "plain").unwrap();
        node.cache.loop_sensitive = true;
        assert!(node.is_time_dependent());
        assert!(!node.is_externally_dynamic());

        let dynamic = make(NodeType::new("d", noop).dynamic());
        assert!(dynamic.is_time_dependent());
    }
}
