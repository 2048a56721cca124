//! Immutable per-session state shared by every run
//!
//! A session bundles everything the executor needs that does not change
//! between runs: the execution plan, the graph view, the kernel registry,
//! per-node slot bindings, the fence table and the session-wide services
//! (profiler, memory-pattern cache, partial-run registry). Built once with
//! [`SessionStateBuilder`], then shared behind an `Arc`.

mod config;
mod registry;

pub use config::SessionConfig;
pub use registry::{RunId, RunRegistry};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{ForgeResult, PlanForgeError};
use crate::fence::FenceRef;
use crate::frame::{ExecutionFrame, FetchAllocator};
use crate::graph::GraphViewer;
use crate::kernel::{KernelRegistry, OpKernel};
use crate::memory::MemoryPatternCache;
use crate::plan::{ExecutionPlan, NodeIo};
use crate::profiling::Profiler;
use crate::tensor::Value;

pub struct SessionState {
    plan: Arc<ExecutionPlan>,
    graph: GraphViewer,
    kernels: KernelRegistry,
    node_io: Vec<NodeIo>,
    num_value_slots: usize,
    fences: Vec<Option<FenceRef>>,
    /// Slots holding weights and other initializers, excluded from
    /// activation accounting
    constant_slots: HashSet<usize>,
    config: SessionConfig,
    profiler: Profiler,
    pattern_cache: MemoryPatternCache,
    run_registry: RunRegistry,
    // keyed by sorted fetch slots
    reachability: Mutex<HashMap<Vec<usize>, Arc<HashSet<usize>>>>,
}

impl SessionState {
    pub fn builder() -> SessionStateBuilder {
        SessionStateBuilder::default()
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn graph(&self) -> &GraphViewer {
        &self.graph
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn pattern_cache(&self) -> &MemoryPatternCache {
        &self.pattern_cache
    }

    pub fn run_registry(&self) -> &RunRegistry {
        &self.run_registry
    }

    pub fn num_value_slots(&self) -> usize {
        self.num_value_slots
    }

    pub fn is_constant_slot(&self, slot: usize) -> bool {
        self.constant_slots.contains(&slot)
    }

    /// Kernel selected for a node. Every node the plan schedules must have
    /// one; absence is a fatal session-configuration error, not a skip.
    pub fn kernel(&self, node_index: usize) -> ForgeResult<Arc<dyn OpKernel>> {
        self.kernels.get(node_index).ok_or_else(|| {
            let node_name = self
                .graph
                .node(node_index)
                .map(|n| n.name.clone())
                .unwrap_or_default();
            PlanForgeError::MissingKernel {
                node_index,
                node_name,
            }
        })
    }

    pub fn node_io(&self, node_index: usize) -> ForgeResult<&NodeIo> {
        self.node_io
            .get(node_index)
            .ok_or_else(|| PlanForgeError::Internal(format!("no slot bindings for node {}", node_index)))
    }

    /// Create the execution frame for a fresh run
    pub fn new_frame(
        &self,
        feed_idxs: &[usize],
        feeds: Vec<Value>,
        fetch_idxs: &[usize],
        fetch_allocators: HashMap<usize, FetchAllocator>,
    ) -> ForgeResult<ExecutionFrame> {
        ExecutionFrame::new(
            feed_idxs,
            feeds,
            fetch_idxs,
            fetch_allocators,
            self.num_value_slots,
            &self.fences,
            self.config.enable_memory_patterns,
        )
    }

    /// Nodes that can influence the given fetch slots, for path pruning.
    /// Computed by one reverse sweep over the plan and cached per fetch set.
    pub fn nodes_for_fetches(&self, fetch_slots: &[usize]) -> ForgeResult<Arc<HashSet<usize>>> {
        let mut key: Vec<usize> = fetch_slots.to_vec();
        key.sort_unstable();
        key.dedup();

        {
            let cache = self.reachability.lock()?;
            if let Some(nodes) = cache.get(&key) {
                return Ok(nodes.clone());
            }
        }

        let mut needed_slots: HashSet<usize> = key.iter().copied().collect();
        let mut executable: HashSet<usize> = HashSet::new();
        for step in self.plan.steps().iter().rev() {
            let io = self.node_io(step.node_index)?;
            let produces_needed = io
                .outputs
                .iter()
                .flatten()
                .any(|slot| needed_slots.contains(slot));
            if !produces_needed {
                continue;
            }
            executable.insert(step.node_index);
            needed_slots.extend(io.inputs.iter().flatten().copied());
            needed_slots.extend(io.implicit_inputs.iter().copied());
        }

        let nodes = Arc::new(executable);
        let mut cache = self.reachability.lock()?;
        cache.entry(key).or_insert_with(|| nodes.clone());
        Ok(nodes)
    }
}

// Kernels and fences are trait objects, so Debug summarizes the session
// instead of deriving.
impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("plan_len", &self.plan.len())
            .field("num_nodes", &self.graph.num_nodes())
            .field("num_value_slots", &self.num_value_slots)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct SessionStateBuilder {
    plan: Option<Arc<ExecutionPlan>>,
    graph: Option<GraphViewer>,
    kernels: KernelRegistry,
    node_io: Vec<NodeIo>,
    num_value_slots: usize,
    fences: Vec<Option<FenceRef>>,
    constant_slots: HashSet<usize>,
    config: SessionConfig,
}

impl SessionStateBuilder {
    pub fn plan(mut self, plan: ExecutionPlan) -> Self {
        self.plan = Some(Arc::new(plan));
        self
    }

    pub fn graph(mut self, graph: GraphViewer) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn kernels(mut self, kernels: KernelRegistry) -> Self {
        self.kernels = kernels;
        self
    }

    pub fn node_io(mut self, node_io: Vec<NodeIo>) -> Self {
        self.node_io = node_io;
        self
    }

    pub fn num_value_slots(mut self, num: usize) -> Self {
        self.num_value_slots = num;
        self
    }

    /// Fence table indexed by value slot; missing tail entries mean no fence
    pub fn fences(mut self, fences: Vec<Option<FenceRef>>) -> Self {
        self.fences = fences;
        self
    }

    pub fn constant_slots(mut self, slots: HashSet<usize>) -> Self {
        self.constant_slots = slots;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ForgeResult<SessionState> {
        let plan = self
            .plan
            .ok_or_else(|| PlanForgeError::InvalidSession("missing execution plan".to_string()))?;
        let graph = self
            .graph
            .ok_or_else(|| PlanForgeError::InvalidSession("missing graph".to_string()))?;

        if self.node_io.len() != graph.num_nodes() {
            return Err(PlanForgeError::InvalidSession(format!(
                "slot bindings cover {} nodes but the graph has {}",
                self.node_io.len(),
                graph.num_nodes()
            )));
        }
        for step in plan.steps() {
            if step.node_index >= graph.num_nodes() {
                return Err(PlanForgeError::InvalidSession(format!(
                    "plan schedules node {} but the graph has {} nodes",
                    step.node_index,
                    graph.num_nodes()
                )));
            }
        }
        for (node_index, io) in self.node_io.iter().enumerate() {
            let slots = io
                .inputs
                .iter()
                .chain(io.outputs.iter())
                .flatten()
                .chain(io.implicit_inputs.iter());
            for slot in slots {
                if *slot >= self.num_value_slots {
                    return Err(PlanForgeError::InvalidSession(format!(
                        "node {} binds slot {} but the session has {} slots",
                        node_index, slot, self.num_value_slots
                    )));
                }
            }
        }

        let profiler = Profiler::new(self.config.enable_profiling);
        Ok(SessionState {
            plan,
            graph,
            kernels: self.kernels,
            node_io: self.node_io,
            num_value_slots: self.num_value_slots,
            fences: self.fences,
            constant_slots: self.constant_slots,
            config: self.config,
            profiler,
            pattern_cache: MemoryPatternCache::new(),
            run_registry: RunRegistry::new(),
            reachability: Mutex::new(HashMap::new()),
        })
    }
}
