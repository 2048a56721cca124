//! Kernel abstraction and per-node kernel registry
//!
//! A kernel is the compute step bound to one graph node, chosen ahead of
//! time by the planner. The executor resolves kernels by node index; a
//! missing kernel for an executable node is a fatal configuration error.

mod context;
mod ops;

pub use context::OpKernelContext;
pub use ops::{ElementwiseAddKernel, IdentityKernel, SuspendKernel};

use std::collections::HashMap;
use std::sync::Arc;

use crate::fence::{ProviderType, QueueId, CPU_PROVIDER, DEFAULT_QUEUE};

/// Op type of the suspension operator. A partial-execution window ends just
/// after the first node of this type strictly past the window start.
pub const SUSPEND_OP_TYPE: &str = "Yield";

/// Where a kernel expects one of its inputs to reside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemType {
    /// Wherever the kernel's provider keeps its values
    #[default]
    Default,
    /// Host memory, regardless of the kernel's provider
    CpuInput,
}

/// Static description of a kernel: op name, provider identity, device queue
/// and per-input memory requirements.
#[derive(Debug, Clone)]
pub struct KernelDef {
    op_name: String,
    provider: ProviderType,
    queue_id: QueueId,
    input_mem_types: Vec<MemType>,
}

impl KernelDef {
    pub fn new(op_name: impl Into<String>, provider: ProviderType) -> Self {
        KernelDef {
            op_name: op_name.into(),
            provider,
            queue_id: DEFAULT_QUEUE,
            input_mem_types: Vec::new(),
        }
    }

    /// Host kernel definition on the CPU provider
    pub fn cpu(op_name: impl Into<String>) -> Self {
        KernelDef::new(op_name, CPU_PROVIDER)
    }

    pub fn with_queue_id(mut self, queue_id: QueueId) -> Self {
        self.queue_id = queue_id;
        self
    }

    /// Declare the memory type of one input position
    pub fn with_input_memory_type(mut self, input_index: usize, mem_type: MemType) -> Self {
        if self.input_mem_types.len() <= input_index {
            self.input_mem_types.resize(input_index + 1, MemType::Default);
        }
        self.input_mem_types[input_index] = mem_type;
        self
    }

    pub fn op_name(&self) -> &str {
        &self.op_name
    }

    pub fn provider(&self) -> ProviderType {
        self.provider
    }

    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    pub fn input_memory_type(&self, input_index: usize) -> MemType {
        self.input_mem_types
            .get(input_index)
            .copied()
            .unwrap_or_default()
    }

    /// Whether this kernel marks a partial-execution suspension point
    pub fn is_suspension_point(&self) -> bool {
        self.op_name == SUSPEND_OP_TYPE
    }
}

/// Kernel-local error type. The executor wraps these with node name and op
/// type before surfacing them.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("{0}")]
    Failed(String),
    #[error("missing input {0}")]
    MissingInput(usize),
    #[error("missing output {0}")]
    MissingOutput(usize),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

pub type KernelResult<T> = Result<T, KernelError>;

/// One node's compute step.
///
/// `compute` must report failure through its result; panics are caught at
/// the executor boundary and converted into a runtime-exception status, but
/// well-behaved kernels should not rely on that.
pub trait OpKernel: Send + Sync {
    fn def(&self) -> &KernelDef;

    fn compute(&self, ctx: &mut OpKernelContext<'_>) -> KernelResult<()>;
}

/// Mapping from node index to the kernel instance the planner selected
#[derive(Default)]
pub struct KernelRegistry {
    kernels: HashMap<usize, Arc<dyn OpKernel>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node_index: usize, kernel: Arc<dyn OpKernel>) {
        self.kernels.insert(node_index, kernel);
    }

    pub fn get(&self, node_index: usize) -> Option<Arc<dyn OpKernel>> {
        self.kernels.get(&node_index).cloned()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}
