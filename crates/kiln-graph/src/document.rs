//! JSON persistence of a whole workspace.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kiln_core::config::EngineConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::{GlobalTable, ParamValue};

use crate::catalog::Catalog;
use crate::environment::RESERVED_LOOP_NAMES;
use crate::looper::{LOOP_INPUT, LOOP_OUTPUT};
use crate::path;
use crate::workspace::Workspace;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub path: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub glyph: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub from: String,
    pub from_output: usize,
    pub to: String,
    pub to_input: usize,
}

/// Serialized form of nodes, parameters, connections and globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceDocument {
    pub version: u32,
    #[serde(default)]
    pub exported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub globals: GlobalTable,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

impl Workspace {
    pub fn export(&self) -> WorkspaceDocument {
        let nodes = self
            .env
            .nodes()
            .map(|node| NodeRecord {
                path: node.path.clone(),
                node_type: node.type_name().to_string(),
                glyph: Some(node.glyph.clone()),
                group: Some(node.group.clone()),
                parameters: node.params.raw_values(),
            })
            .collect();
        let connections = self
            .connections()
            .into_iter()
            .map(|c| ConnectionRecord {
                from: c.from,
                from_output: c.from_output,
                to: c.to,
                to_input: c.to_input,
            })
            .collect();
        WorkspaceDocument {
            version: FORMAT_VERSION,
            exported_at: Some(Utc::now()),
            globals: self.globals.clone(),
            nodes,
            connections,
        }
    }

    /// Build a fresh workspace from a document. Fails as a whole on the first
    /// invalid record.
    pub fn import(doc: WorkspaceDocument, catalog: Catalog, engine: EngineConfig) -> Result<Self> {
        if doc.version > FORMAT_VERSION {
            return Err(KilnError::Document(format!(
                "unsupported format version {} (newest known is {})",
                doc.version, FORMAT_VERSION
            )));
        }

        let mut ws = Workspace::with_engine(catalog, engine);
        for (name, value) in doc.globals.list() {
            ws.globals.set(name, value.clone())?;
        }

        let mut records = doc.nodes;
        records.iter_mut().for_each(|r| r.path = path::normalize(&r.path));
        records.sort_by(|a, b| {
            path::depth(&a.path)
                .cmp(&path::depth(&b.path))
                .then_with(|| a.path.cmp(&b.path))
        });

        for record in &records {
            ws.import_node(record)?;
        }

        for conn in &doc.connections {
            let from = ws.env.id_of(&conn.from)?;
            let to = ws.env.id_of(&conn.to)?;
            ws.env.connect(from, conn.from_output, to, conn.to_input)?;
        }

        info!(
            nodes = ws.env.len(),
            connections = ws.env.connections().len(),
            "Imported workspace"
        );
        Ok(ws)
    }

    fn import_node(&mut self, record: &NodeRecord) -> Result<()> {
        if record.path == path::ROOT {
            return Err(KilnError::Document("a node cannot live at the root path".into()));
        }
        let parent = path::parent_of(&record.path);
        let name = path::name_of(&record.path);

        let id = if record.node_type == LOOP_INPUT || record.node_type == LOOP_OUTPUT {
            let expected = if record.node_type == LOOP_INPUT {
                RESERVED_LOOP_NAMES[0]
            } else {
                RESERVED_LOOP_NAMES[1]
            };
            if name != expected {
                return Err(KilnError::Document(format!(
                    "{} must be named '{}'",
                    record.path, expected
                )));
            }
            let looper = self.env.id_of(parent)?;
            let (input, output) = self.env.ensure_loop_boundaries(&self.catalog, looper)?;
            if record.node_type == LOOP_INPUT {
                input
            } else {
                output
            }
        } else {
            self.env
                .create(&self.catalog, &record.node_type, parent, Some(name))?
        };

        self.env
            .set_cosmetics(id, record.glyph.clone(), record.group.clone())?;

        let node = self.env.node_mut(id)?;
        let validator = node.node_type.validator;
        for (param, value) in &record.parameters {
            if node.params.get(param).is_none() {
                warn!(node = %record.path, parameter = %param, "Skipping unknown parameter");
                continue;
            }
            if let Some(validate) = validator {
                validate(param, &node.params.normalize(param, value.clone())?)?;
            }
            node.params.force_set(param, value.clone())?;
        }
        Ok(())
    }

    pub fn save(&self, file: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.export())?;
        std::fs::write(file, json)?;
        info!(path = %file.display(), "Saved workspace");
        Ok(())
    }

    pub fn load(file: &Path, catalog: Catalog, engine: EngineConfig) -> Result<Self> {
        let content = std::fs::read_to_string(file)?;
        let doc: WorkspaceDocument = serde_json::from_str(&content)?;
        Self::import(doc, catalog, engine)
    }
}
