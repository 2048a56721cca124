//! Read-only graph metadata used for diagnostics and profiling labels
//!
//! The executor never makes control decisions from this view; it only pulls
//! node names and op types into error messages, log lines and profile
//! events.

use crate::error::{ForgeResult, PlanForgeError};

/// Metadata for one graph node
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    /// Node name from the model; may be empty
    pub name: String,
    /// Operator type, e.g. "MatMul"
    pub op_type: String,
    /// Free-form description, e.g. marking backward-pass nodes
    pub description: String,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        NodeInfo {
            name: name.into(),
            op_type: op_type.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Label for profile traces; falls back to `<op_type>_<index>` when the
    /// model left the node name blank.
    pub fn profiling_name(&self, node_index: usize) -> String {
        if self.name.is_empty() {
            format!("{}_{}", self.op_type, node_index)
        } else {
            self.name.clone()
        }
    }
}

/// Immutable view over the node metadata of a compiled graph
#[derive(Debug, Clone, Default)]
pub struct GraphViewer {
    nodes: Vec<NodeInfo>,
}

impl GraphViewer {
    pub fn new(nodes: Vec<NodeInfo>) -> Self {
        GraphViewer { nodes }
    }

    pub fn node(&self, node_index: usize) -> ForgeResult<&NodeInfo> {
        self.nodes.get(node_index).ok_or_else(|| {
            PlanForgeError::Internal(format!("node index {} out of range", node_index))
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}
