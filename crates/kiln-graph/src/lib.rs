pub mod catalog;
pub mod connection;
pub mod descriptor;
pub mod document;
pub mod engine;
pub mod environment;
pub mod looper;
pub mod node;
pub mod path;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use catalog::Catalog;
pub use connection::{Connection, ConnectionGraph};
pub use descriptor::{Arity, Behavior, CookContext, NodeType, ParamValidator, PortSpec, Transform};
pub use document::{ConnectionRecord, NodeRecord, WorkspaceDocument};
pub use engine::Cooker;
pub use environment::{Environment, NodeRef};
pub use looper::{LoopSettings, LOOPER, LOOP_INPUT, LOOP_OUTPUT};
pub use node::{CookCache, Node};
pub use workspace::{
    ConnectionDescriptor, EvaluationReport, NodeDescriptor, NodeTypeInfo, NodeUpdate,
    PortDescriptor, Workspace,
};
