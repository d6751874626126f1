use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use kiln_core::config::EngineConfig;
use kiln_core::error::Result;
use kiln_core::traits::LanguageModel;
use kiln_core::{ConnectionId, CookState, GlobalTable, GlobalValue, Items, NodeId, ParamValue, Parameter};

use crate::catalog::Catalog;
use crate::connection::Connection;
use crate::descriptor::{Arity, NodeType};
use crate::engine::Cooker;
use crate::environment::{Environment, NodeRef};
use crate::node::Node;

/// Port metadata with its current connection count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub index: usize,
    pub name: String,
    pub connections: usize,
}

/// Client-facing snapshot of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub glyph: String,
    pub group: String,
    pub state: CookState,
    pub parameters: Vec<Parameter>,
    pub inputs: Vec<PortDescriptor>,
    pub outputs: Vec<PortDescriptor>,
    pub input_arity: Arity,
    pub cook_count: u64,
    pub last_cook_secs: Option<f64>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub time_dependent: bool,
    pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub id: ConnectionId,
    pub from: String,
    pub from_output: usize,
    pub to: String,
    pub to_input: usize,
}

/// Registered node type, as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTypeInfo {
    pub name: String,
    pub glyph: String,
    pub group: String,
    pub description: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub input_arity: Arity,
    pub parameters: Vec<Parameter>,
    pub always_dynamic: bool,
    pub creatable: bool,
}

impl From<&NodeType> for NodeTypeInfo {
    fn from(ty: &NodeType) -> Self {
        Self {
            name: ty.name.clone(),
            glyph: ty.glyph.clone(),
            group: ty.group.clone(),
            description: ty.description.clone(),
            inputs: ty.inputs.iter().map(|p| p.name.clone()).collect(),
            outputs: ty.outputs.iter().map(|p| p.name.clone()).collect(),
            input_arity: ty.input_arity,
            parameters: ty.parameters.clone(),
            always_dynamic: ty.always_dynamic,
            creatable: ty.creatable,
        }
    }
}

/// Partial node update. Applied atomically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUpdate {
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub glyph: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl NodeUpdate {
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Outcome of an evaluation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub success: bool,
    pub id: NodeId,
    pub path: String,
    pub state: CookState,
    /// One item list per output port. Last good output when the cook failed.
    pub output: Vec<Items>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub elapsed_secs: f64,
    pub cook_count: u64,
}

/// A node graph together with its catalog, globals and optional language model.
pub struct Workspace {
    pub(crate) catalog: Catalog,
    pub(crate) env: Environment,
    pub(crate) globals: GlobalTable,
    pub(crate) engine: EngineConfig,
    model: Option<Arc<dyn LanguageModel>>,
}

impl Workspace {
    pub fn new(catalog: Catalog) -> Self {
        Self::with_engine(catalog, EngineConfig::default())
    }

    pub fn with_engine(catalog: Catalog, engine: EngineConfig) -> Self {
        Self {
            catalog,
            env: Environment::new(),
            globals: GlobalTable::new(),
            engine,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn set_model(&mut self, model: Option<Arc<dyn LanguageModel>>) {
        self.model = model;
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn globals(&self) -> &GlobalTable {
        &self.globals
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    // ── Nodes ────────────────────────────────────────────────────

    pub fn create_node(
        &mut self,
        type_name: &str,
        parent: &str,
        name: Option<&str>,
    ) -> Result<NodeDescriptor> {
        let id = self.env.create(&self.catalog, type_name, parent, name)?;
        self.describe(id)
    }

    pub fn update_node(&mut self, node: impl Into<NodeRef>, update: NodeUpdate) -> Result<NodeDescriptor> {
        let id = self.env.resolve(&node.into())?;
        self.env.update(id, &update.parameters, update.name.as_deref())?;
        self.env.set_cosmetics(id, update.glyph, update.group)?;
        self.describe(id)
    }

    /// Delete a node and everything it owns. Returns the removed paths.
    pub fn delete_node(&mut self, node: impl Into<NodeRef>) -> Result<Vec<String>> {
        let id = self.env.resolve(&node.into())?;
        self.env.delete(id)
    }

    pub fn press_button(&mut self, node: impl Into<NodeRef>, name: &str) -> Result<()> {
        let id = self.env.resolve(&node.into())?;
        self.env.press_button(id, name)
    }

    /// The looper's input and output boundary nodes, created if needed.
    pub fn loop_boundaries(&mut self, looper: impl Into<NodeRef>) -> Result<(NodeDescriptor, NodeDescriptor)> {
        let id = self.env.resolve(&looper.into())?;
        let (input, output) = self.env.ensure_loop_boundaries(&self.catalog, id)?;
        Ok((self.describe(input)?, self.describe(output)?))
    }

    // ── Connections ──────────────────────────────────────────────

    pub fn connect(
        &mut self,
        from: impl Into<NodeRef>,
        from_output: usize,
        to: impl Into<NodeRef>,
        to_input: usize,
    ) -> Result<ConnectionDescriptor> {
        let from = self.env.resolve(&from.into())?;
        let to = self.env.resolve(&to.into())?;
        let id = self.env.connect(from, from_output, to, to_input)?;
        let conn = self.env.connections().get(id).copied();
        conn.map(|c| self.connection_descriptor(&c))
            .ok_or_else(|| kiln_core::KilnError::Connection(format!("connection {} vanished", id)))
    }

    /// Remove an edge by endpoints. Returns whether one existed.
    pub fn disconnect(
        &mut self,
        from: impl Into<NodeRef>,
        from_output: usize,
        to: impl Into<NodeRef>,
        to_input: usize,
    ) -> Result<bool> {
        let from = self.env.resolve(&from.into())?;
        let to = self.env.resolve(&to.into())?;
        Ok(self.env.disconnect(from, from_output, to, to_input))
    }

    pub fn disconnect_id(&mut self, id: ConnectionId) -> bool {
        self.env.disconnect_id(id)
    }

    pub fn connections(&self) -> Vec<ConnectionDescriptor> {
        self.env
            .connections()
            .iter()
            .map(|c| self.connection_descriptor(c))
            .collect()
    }

    fn connection_descriptor(&self, conn: &Connection) -> ConnectionDescriptor {
        let path = |id: NodeId| {
            self.env
                .node(id)
                .map(|n| n.path.clone())
                .unwrap_or_else(|_| id.to_string())
        };
        ConnectionDescriptor {
            id: conn.id,
            from: path(conn.from),
            from_output: conn.from_output,
            to: path(conn.to),
            to_input: conn.to_input,
        }
    }

    // ── Evaluation ───────────────────────────────────────────────

    /// Evaluate a node. `Err` means the request itself was invalid; cook
    /// failures come back inside the report.
    pub fn evaluate(&mut self, node: impl Into<NodeRef>, force: bool) -> Result<EvaluationReport> {
        let id = self.env.resolve(&node.into())?;
        let started = Instant::now();
        let success = {
            let mut cooker = Cooker::new(&mut self.env, &self.catalog, &self.globals, &self.engine)
                .with_model(self.model.as_deref());
            cooker.evaluate(id, None, force)
        };
        let elapsed_secs = started.elapsed().as_secs_f64();

        let node = self.env.node(id)?;
        info!(
            node = %node.path,
            success,
            state = %node.state,
            elapsed_ms = (elapsed_secs * 1000.0) as u64,
            "Evaluated"
        );
        Ok(EvaluationReport {
            success,
            id,
            path: node.path.clone(),
            state: node.state,
            output: node.cache.output.clone(),
            errors: node.cache.errors.clone(),
            warnings: node.cache.warnings.clone(),
            elapsed_secs,
            cook_count: node.cache.cook_count,
        })
    }

    // ── Globals ──────────────────────────────────────────────────

    pub fn list_globals(&self) -> Vec<(String, GlobalValue)> {
        self.globals
            .list()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    pub fn get_global(&self, name: &str) -> Option<&GlobalValue> {
        self.globals.get(name)
    }

    /// Set a global. Nodes referencing it are time-dependent and pick it up on their next evaluation.
    pub fn set_global(&mut self, name: &str, value: impl Into<GlobalValue>) -> Result<Option<GlobalValue>> {
        self.globals.set(name, value)
    }

    pub fn delete_global(&mut self, name: &str) -> Option<GlobalValue> {
        self.globals.delete(name)
    }

    // ── Introspection ────────────────────────────────────────────

    pub fn describe(&self, node: impl Into<NodeRef>) -> Result<NodeDescriptor> {
        let id = self.env.resolve(&node.into())?;
        let node = self.env.node(id)?;
        Ok(self.descriptor(node))
    }

    /// Descriptors of all nodes at or beneath `prefix`.
    pub fn list(&self, prefix: &str) -> Vec<NodeDescriptor> {
        self.env
            .list(prefix)
            .into_iter()
            .map(|n| self.descriptor(n))
            .collect()
    }

    pub fn node_types(&self) -> Vec<NodeTypeInfo> {
        self.catalog.list().map(|t| NodeTypeInfo::from(t.as_ref())).collect()
    }

    fn descriptor(&self, node: &Node) -> NodeDescriptor {
        let graph = self.env.connections();
        NodeDescriptor {
            id: node.id,
            path: node.path.clone(),
            name: node.name.clone(),
            node_type: node.type_name().to_string(),
            glyph: node.glyph.clone(),
            group: node.group.clone(),
            state: node.state,
            parameters: node.params.iter().cloned().collect(),
            inputs: node
                .node_type
                .inputs
                .iter()
                .enumerate()
                .map(|(index, port)| PortDescriptor {
                    index,
                    name: port.name.clone(),
                    connections: graph.input_count(node.id, index),
                })
                .collect(),
            outputs: node
                .node_type
                .outputs
                .iter()
                .enumerate()
                .map(|(index, port)| PortDescriptor {
                    index,
                    name: port.name.clone(),
                    connections: graph.output_count(node.id, index),
                })
                .collect(),
            input_arity: node.node_type.input_arity,
            cook_count: node.cache.cook_count,
            last_cook_secs: node.cache.last_cook.map(|d| d.as_secs_f64()),
            errors: node.cache.errors.clone(),
            warnings: node.cache.warnings.clone(),
            time_dependent: self.env.is_time_dependent(node.id),
            protected: node.protected,
        }
    }
}
