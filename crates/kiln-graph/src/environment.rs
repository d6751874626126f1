use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kiln_core::error::{KilnError, Result};
use kiln_core::{ConnectionId, CookState, Items, NodeId, ParamValue};

use crate::catalog::Catalog;
use crate::connection::ConnectionGraph;
use crate::descriptor::{Arity, NodeType};
use crate::looper::{LOOP_INPUT, LOOP_OUTPUT};
use crate::node::{LoopBinding, Node};
use crate::path;

/// Child names a looper keeps for its boundary nodes.
pub const RESERVED_LOOP_NAMES: [&str; 2] = ["input", "output"];

/// Addresses a node by session id or by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Id(NodeId),
    Path(String),
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        NodeRef::Id(id)
    }
}

impl From<&str> for NodeRef {
    fn from(path: &str) -> Self {
        NodeRef::Path(path.to_string())
    }
}

impl From<String> for NodeRef {
    fn from(path: String) -> Self {
        NodeRef::Path(path)
    }
}

impl From<&String> for NodeRef {
    fn from(path: &String) -> Self {
        NodeRef::Path(path.clone())
    }
}

/// Hierarchical registry of node instances and the connections between them.
#[derive(Debug, Default)]
pub struct Environment {
    nodes: HashMap<NodeId, Node>,
    paths: BTreeMap<String, NodeId>,
    connections: ConnectionGraph,
    next_id: u64,
    revision: u64,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| KilnError::NodeNotFound(id.to_string()))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| KilnError::NodeNotFound(id.to_string()))
    }

    pub fn find(&self, node_path: &str) -> Option<&Node> {
        self.paths
            .get(&path::normalize(node_path))
            .and_then(|id| self.nodes.get(id))
    }

    pub fn id_of(&self, node_path: &str) -> Result<NodeId> {
        self.find(node_path)
            .map(|n| n.id)
            .ok_or_else(|| KilnError::NodeNotFound(node_path.to_string()))
    }

    pub fn resolve(&self, node: &NodeRef) -> Result<NodeId> {
        match node {
            NodeRef::Id(id) => self.node(*id).map(|n| n.id),
            NodeRef::Path(p) => self.id_of(p),
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Nodes at or beneath `prefix`, in path order.
    pub fn list(&self, prefix: &str) -> Vec<&Node> {
        let prefix = path::normalize(prefix);
        self.paths
            .iter()
            .filter(|(p, _)| path::matches_prefix(p, &prefix))
            .filter_map(|(_, id)| self.nodes.get(id))
            .collect()
    }

    /// Every node in path order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.paths.values().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn connections(&self) -> &ConnectionGraph {
        &self.connections
    }

    /// Create a node of a registered, client-creatable type.
    ///
    /// `parent` is `/` or the path of a looper. Without a name, a unique
    /// `type_N` name is generated.
    pub fn create(
        &mut self,
        catalog: &Catalog,
        type_name: &str,
        parent: &str,
        name: Option<&str>,
    ) -> Result<NodeId> {
        let node_type = catalog.get(type_name)?;
        if !node_type.creatable {
            return Err(KilnError::NotCreatable(type_name.to_string()));
        }

        let parent_path = path::normalize(parent);
        let parent_id = self.resolve_parent(&parent_path, name.unwrap_or(type_name))?;
        let in_looper = parent_id.is_some();

        let name = match name {
            Some(name) => {
                self.check_child_name(in_looper, name)?;
                name.to_string()
            }
            None => self.generate_name(&parent_path, type_name, in_looper),
        };
        let node_path = path::join(&parent_path, &name);
        if self.paths.contains_key(&node_path) {
            return Err(KilnError::DuplicatePath(node_path));
        }

        let id = self.insert_node(node_type, parent_id, node_path.clone(), name, false);
        if let Some(parent_id) = parent_id {
            self.invalidate(parent_id);
        }
        info!(node = %node_path, node_type = type_name, "Created node");
        Ok(id)
    }

    fn resolve_parent(&self, parent_path: &str, child: &str) -> Result<Option<NodeId>> {
        if parent_path == path::ROOT {
            return Ok(None);
        }
        let parent = self
            .find(parent_path)
            .ok_or_else(|| KilnError::NodeNotFound(parent_path.to_string()))?;
        if !parent.is_looper() {
            return Err(KilnError::InvalidParent {
                parent: parent_path.to_string(),
                child: child.to_string(),
            });
        }
        Ok(Some(parent.id))
    }

    fn check_child_name(&self, in_looper: bool, name: &str) -> Result<()> {
        path::validate_name(name)?;
        if in_looper && RESERVED_LOOP_NAMES.contains(&name) {
            return Err(KilnError::InvalidName(format!(
                "{} (reserved for looper boundaries)",
                name
            )));
        }
        Ok(())
    }

    fn generate_name(&self, parent_path: &str, type_name: &str, in_looper: bool) -> String {
        (1u64..)
            .map(|n| format!("{}_{}", type_name, n))
            .find(|candidate| {
                !(in_looper && RESERVED_LOOP_NAMES.contains(&candidate.as_str()))
                    && !self.paths.contains_key(&path::join(parent_path, candidate))
            })
            .unwrap_or_else(|| type_name.to_string())
    }

    fn insert_node(
        &mut self,
        node_type: Arc<NodeType>,
        parent: Option<NodeId>,
        node_path: String,
        name: String,
        protected: bool,
    ) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        let mut node = Node::new(id, node_path.clone(), name, parent, node_type);
        node.protected = protected;
        self.paths.insert(node_path, id);
        self.nodes.insert(id, node);
        id
    }

    /// Delete a node and everything it owns. Connections go first.
    ///
    /// Returns the removed paths.
    pub fn delete(&mut self, id: NodeId) -> Result<Vec<String>> {
        let node = self.node(id)?;
        if node.protected {
            return Err(KilnError::Protected(node.path.clone()));
        }
        let root_path = node.path.clone();
        let parent = node.parent;

        let doomed: Vec<(String, NodeId)> = self
            .paths
            .iter()
            .filter(|(p, _)| path::matches_prefix(p, &root_path))
            .map(|(p, id)| (p.clone(), *id))
            .collect();
        let doomed_ids: HashSet<NodeId> = doomed.iter().map(|(_, id)| *id).collect();

        let mut affected = Vec::new();
        for (_, doomed_id) in &doomed {
            for conn in self.connections.remove_node(*doomed_id) {
                if !doomed_ids.contains(&conn.to) {
                    affected.push(conn.to);
                }
            }
        }
        for (doomed_path, doomed_id) in &doomed {
            self.paths.remove(doomed_path);
            self.nodes.remove(doomed_id);
        }
        for target in affected {
            self.invalidate(target);
        }
        if let Some(parent) = parent {
            self.invalidate(parent);
        }

        info!(node = %root_path, removed = doomed.len(), "Deleted node");
        Ok(doomed.into_iter().map(|(p, _)| p).collect())
    }

    /// Validate a rename without applying it. Returns the new path.
    pub(crate) fn check_rename(&self, id: NodeId, new_name: &str) -> Result<String> {
        let node = self.node(id)?;
        if node.protected {
            return Err(KilnError::Protected(node.path.clone()));
        }
        self.check_child_name(node.parent.is_some(), new_name)?;
        let new_path = path::join(path::parent_of(&node.path), new_name);
        if new_path != node.path && self.paths.contains_key(&new_path) {
            return Err(KilnError::DuplicatePath(new_path));
        }
        Ok(new_path)
    }

    /// Rename a node, moving its owned subtree along with it.
    pub fn rename(&mut self, id: NodeId, new_name: &str) -> Result<String> {
        let new_path = self.check_rename(id, new_name)?;
        self.apply_rename(id, &new_path);
        Ok(new_path)
    }

    fn apply_rename(&mut self, id: NodeId, new_path: &str) {
        let Some(old_path) = self.nodes.get(&id).map(|n| n.path.clone()) else {
            return;
        };
        if old_path == new_path {
            return;
        }
        let moved: Vec<(String, NodeId)> = self
            .paths
            .iter()
            .filter(|(p, _)| path::matches_prefix(p, &old_path))
            .map(|(p, id)| (p.clone(), *id))
            .collect();
        for (old, moved_id) in moved {
            let updated = format!("{}{}", new_path, &old[old_path.len()..]);
            self.paths.remove(&old);
            if let Some(node) = self.nodes.get_mut(&moved_id) {
                node.path = updated.clone();
                if moved_id == id {
                    node.name = path::name_of(&updated).to_string();
                }
            }
            self.paths.insert(updated, moved_id);
        }
        info!(from = %old_path, to = %new_path, "Renamed node");
    }

    /// Connect `from`'s output to `to`'s input.
    ///
    /// Connecting an identical edge twice returns the existing id.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_output: usize,
        to: NodeId,
        to_input: usize,
    ) -> Result<ConnectionId> {
        let (from_path, to_path) = {
            let src = self.node(from)?;
            let dst = self.node(to)?;
            if from_output >= src.node_type.outputs.len() {
                return Err(KilnError::Connection(format!(
                    "{} has no output {}",
                    src.path, from_output
                )));
            }
            if to_input >= dst.node_type.inputs.len() {
                return Err(KilnError::Connection(format!(
                    "{} has no input {}",
                    dst.path, to_input
                )));
            }
            if src.parent != dst.parent {
                return Err(KilnError::Connection(format!(
                    "{} and {} are in different networks",
                    src.path, dst.path
                )));
            }
            if let Some(existing) = self.connections.find(from, from_output, to, to_input) {
                return Ok(existing.id);
            }
            if from == to || self.connections.reaches(to, from) {
                return Err(KilnError::Cycle {
                    from: src.path.clone(),
                    to: dst.path.clone(),
                });
            }
            if dst.node_type.input_arity == Arity::Single
                && self.connections.input_count(to, to_input) > 0
            {
                return Err(KilnError::Connection(format!(
                    "input {} of {} already has a connection",
                    to_input, dst.path
                )));
            }
            (src.path.clone(), dst.path.clone())
        };

        let id = self.connections.insert(from, from_output, to, to_input);
        self.invalidate(to);
        debug!(connection = %id, from = %from_path, from_output, to = %to_path, to_input, "Connected");
        Ok(id)
    }

    /// Remove the edge with these endpoints. Missing edges are a no-op.
    pub fn disconnect(&mut self, from: NodeId, from_output: usize, to: NodeId, to_input: usize) -> bool {
        match self.connections.find(from, from_output, to, to_input) {
            Some(conn) => {
                let id = conn.id;
                self.disconnect_id(id)
            }
            None => false,
        }
    }

    pub fn disconnect_id(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some(conn) => {
                self.invalidate(conn.to);
                debug!(connection = %id, "Disconnected");
                true
            }
            None => false,
        }
    }

    /// Set one parameter. Returns whether the raw value changed.
    pub fn set_parameter(&mut self, id: NodeId, name: &str, value: ParamValue) -> Result<bool> {
        let node = self.node_mut(id)?;
        if let Some(validate) = node.node_type.validator {
            validate(name, &node.params.normalize(name, value.clone())?)?;
        }
        let changed = node.params.set(name, value)?;
        if changed {
            self.invalidate(id);
        }
        Ok(changed)
    }

    /// Apply parameter changes and an optional rename as one unit: either all
    /// succeed or nothing changes.
    pub fn update(
        &mut self,
        id: NodeId,
        params: &BTreeMap<String, ParamValue>,
        name: Option<&str>,
    ) -> Result<()> {
        let node = self.node(id)?;
        let mut staged = node.params.clone();
        let mut changed = false;
        for (param, value) in params {
            if let Some(validate) = node.node_type.validator {
                validate(param, &staged.normalize(param, value.clone())?)?;
            }
            changed |= staged.set(param, value.clone())?;
        }
        let new_path = name.map(|n| self.check_rename(id, n)).transpose()?;

        self.node_mut(id)?.params = staged;
        if changed {
            self.invalidate(id);
        }
        if let Some(new_path) = new_path {
            self.apply_rename(id, &new_path);
        }
        Ok(())
    }

    /// Queue a button press for the next cook.
    pub fn press_button(&mut self, id: NodeId, name: &str) -> Result<()> {
        self.node_mut(id)?.params.press(name)?;
        self.invalidate(id);
        Ok(())
    }

    pub(crate) fn set_cosmetics(&mut self, id: NodeId, glyph: Option<String>, group: Option<String>) -> Result<()> {
        let node = self.node_mut(id)?;
        if let Some(glyph) = glyph {
            node.glyph = glyph;
        }
        if let Some(group) = group {
            node.group = group;
        }
        Ok(())
    }

    /// Mark a node stale, together with the loopers that own it.
    ///
    /// Nothing downstream is touched: consumers notice on their next pull.
    pub fn invalidate(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.nodes.get_mut(&id)) {
            if node.state != CookState::Cooking {
                node.state = CookState::Uncooked;
            }
            current = node.parent;
        }
    }

    /// Create a looper's boundary nodes if they do not exist yet.
    pub fn ensure_loop_boundaries(
        &mut self,
        catalog: &Catalog,
        id: NodeId,
    ) -> Result<(NodeId, NodeId)> {
        let node = self.node(id)?;
        if !node.is_looper() {
            return Err(KilnError::InvalidParent {
                parent: node.path.clone(),
                child: RESERVED_LOOP_NAMES[0].to_string(),
            });
        }
        if let Some(boundaries) = node.boundaries {
            return Ok(boundaries);
        }

        let base = node.path.clone();
        let input_path = path::join(&base, RESERVED_LOOP_NAMES[0]);
        let output_path = path::join(&base, RESERVED_LOOP_NAMES[1]);
        for p in [&input_path, &output_path] {
            if self.paths.contains_key(p) {
                return Err(KilnError::DuplicatePath(p.clone()));
            }
        }
        let input_type = catalog.get(LOOP_INPUT)?;
        let output_type = catalog.get(LOOP_OUTPUT)?;

        let input = self.insert_node(
            input_type,
            Some(id),
            input_path,
            RESERVED_LOOP_NAMES[0].to_string(),
            true,
        );
        let output = self.insert_node(
            output_type,
            Some(id),
            output_path,
            RESERVED_LOOP_NAMES[1].to_string(),
            true,
        );
        self.node_mut(id)?.boundaries = Some((input, output));
        debug!(looper = %base, "Created loop boundaries");
        Ok((input, output))
    }

    /// Bind the items for the next iteration to a looper's input boundary.
    pub(crate) fn bind_loop_input(&mut self, id: NodeId, items: Items, iteration: i64) {
        if let Some(node) = self.nodes.get_mut(&id) {
            let binding = LoopBinding { items, iteration };
            if node.loop_binding.as_ref() != Some(&binding) {
                node.loop_binding = Some(binding);
                node.state = CookState::Uncooked;
            }
        }
    }

    pub(crate) fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Whether evaluation of this node must always recook.
    ///
    /// A looper is dynamic when anything it owns is, except for nodes that
    /// only depend on its own iteration index.
    pub fn is_time_dependent(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if node.is_time_dependent() {
            return true;
        }
        node.is_looper()
            && self
                .list(&node.path)
                .iter()
                .any(|n| n.id != id && n.is_externally_dynamic())
    }
}
