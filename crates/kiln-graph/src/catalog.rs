use std::collections::BTreeMap;
use std::sync::Arc;

use kiln_core::config::EngineConfig;
use kiln_core::error::{KilnError, Result};

use crate::descriptor::NodeType;
use crate::looper;

/// Registration table mapping type names to node-type descriptors.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    types: BTreeMap<String, Arc<NodeType>>,
}

impl Catalog {
    /// A catalog with no types at all, not even the looper.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog holding the looper and its boundary types with default settings.
    pub fn new() -> Self {
        Self::with_engine(&EngineConfig::default())
    }

    /// Catalog holding the looper types, using engine defaults for loop limits.
    pub fn with_engine(config: &EngineConfig) -> Self {
        let mut catalog = Self::empty();
        catalog.register(looper::looper_type(config));
        catalog.register(looper::loop_input_type());
        catalog.register(looper::loop_output_type());
        catalog
    }

    /// Register a node type, replacing any type of the same name.
    pub fn register(&mut self, node_type: NodeType) {
        if self.types.contains_key(&node_type.name) {
            tracing::debug!(node_type = %node_type.name, "Replacing registered node type");
        }
        self.types
            .insert(node_type.name.clone(), Arc::new(node_type));
    }

    pub fn get(&self, name: &str) -> Result<Arc<NodeType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| KilnError::UnknownNodeType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// All registered types in name order.
    pub fn list(&self) -> impl Iterator<Item = &Arc<NodeType>> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CookContext;
    use kiln_core::Items;

    fn noop(_ctx: &mut CookContext<'_>) -> Result<Vec<Items>> {
        Ok(vec![vec![]])
    }

    #[test]
    fn test_new_registers_looper_types() {
        let catalog = Catalog::new();
        assert!(catalog.contains(looper::LOOPER));
        assert!(catalog.contains(looper::LOOP_INPUT));
        assert!(catalog.contains(looper::LOOP_OUTPUT));
        assert!(!catalog.get(looper::LOOP_INPUT).unwrap().creatable);
        assert!(Catalog::empty().is_empty());
    }

    #[test]
    fn test_register_and_lookup() {
        let mut catalog = Catalog::empty();
        catalog.register(NodeType::new("noop", noop));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("noop").unwrap().name, "noop");
        assert!(matches!(
            catalog.get("missing"),
            Err(KilnError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_list_is_sorted() {
        let mut catalog = Catalog::empty();
        catalog.register(NodeType::new("zeta", noop));
        catalog.register(NodeType::new("alpha", noop));
        let names: Vec<_> = catalog.list().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
