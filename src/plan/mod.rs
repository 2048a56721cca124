//! Static execution plan consumed by the sequential executor
//!
//! The plan is produced by an out-of-scope allocation planner and shared
//! read-only by every run of a compiled graph. It fixes the node order, the
//! release point of every intermediate value, the per-node slot bindings and
//! the set of nodes whose slots carry fences. The executor trusts the plan:
//! it does not re-derive liveness or re-check free ranges.

use std::collections::HashSet;

/// One step of the plan: which node runs, and which entries of the shared
/// `to_be_freed` list are released once it completes. The free range is
/// inclusive on both ends; an empty range is encoded as
/// `free_from_index > free_to_index` (the planner's convention).
#[derive(Debug, Clone)]
pub struct NodeExecutionPlan {
    pub node_index: usize,
    pub free_from_index: usize,
    pub free_to_index: usize,
}

impl NodeExecutionPlan {
    /// Step with nothing to free after the node
    pub fn new(node_index: usize) -> Self {
        NodeExecutionPlan {
            node_index,
            free_from_index: 1,
            free_to_index: 0,
        }
    }

    /// Step that frees `to_be_freed[from..=to]` after the node
    pub fn with_free_range(node_index: usize, from: usize, to: usize) -> Self {
        NodeExecutionPlan {
            node_index,
            free_from_index: from,
            free_to_index: to,
        }
    }
}

/// Slot bindings for one node: which value slots its inputs, implicit
/// inputs and outputs live in. `None` marks an optional input/output the
/// model left unconnected.
#[derive(Debug, Clone, Default)]
pub struct NodeIo {
    pub inputs: Vec<Option<usize>>,
    pub implicit_inputs: Vec<usize>,
    pub outputs: Vec<Option<usize>>,
}

impl NodeIo {
    pub fn new(inputs: Vec<Option<usize>>, outputs: Vec<Option<usize>>) -> Self {
        NodeIo {
            inputs,
            implicit_inputs: Vec::new(),
            outputs,
        }
    }

    /// Convenience constructor for fully-connected nodes
    pub fn dense(inputs: &[usize], outputs: &[usize]) -> Self {
        NodeIo {
            inputs: inputs.iter().copied().map(Some).collect(),
            implicit_inputs: Vec::new(),
            outputs: outputs.iter().copied().map(Some).collect(),
        }
    }

    pub fn with_implicit_inputs(mut self, implicit: Vec<usize>) -> Self {
        self.implicit_inputs = implicit;
        self
    }
}

/// Immutable, topologically-ordered execution plan
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    steps: Vec<NodeExecutionPlan>,
    to_be_freed: Vec<usize>,
    nodes_with_fences: HashSet<usize>,
}

impl ExecutionPlan {
    pub fn new(
        steps: Vec<NodeExecutionPlan>,
        to_be_freed: Vec<usize>,
        nodes_with_fences: HashSet<usize>,
    ) -> Self {
        ExecutionPlan {
            steps,
            to_be_freed,
            nodes_with_fences,
        }
    }

    pub fn steps(&self) -> &[NodeExecutionPlan] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether any slot touched by this node carries a fence. When false the
    /// executor skips all fence passes for the node.
    pub fn node_has_fence(&self, node_index: usize) -> bool {
        self.nodes_with_fences.contains(&node_index)
    }

    /// Value slots released after the given step completes
    pub fn slots_to_free(&self, step: &NodeExecutionPlan) -> &[usize] {
        if step.free_from_index > step.free_to_index {
            return &[];
        }
        &self.to_be_freed[step.free_from_index..=step.free_to_index]
    }

    pub fn to_be_freed(&self) -> &[usize] {
        &self.to_be_freed
    }
}
