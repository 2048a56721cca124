//! planforge: plan-driven sequential execution engine for compiled graphs
//!
//! The engine runs a topologically-ordered execution plan over a table of
//! value slots. A [`SessionState`] holds everything shared between runs
//! (plan, kernels, fences, caches); each run gets its own
//! [`ExecutionFrame`](frame::ExecutionFrame) owning the value lifetimes.
//! The [`SequentialExecutor`] drives nodes one at a time, bracketing fenced
//! slot accesses with cross-device ordering hooks and releasing values at
//! the plan's free points. Runs can suspend at suspension operators and
//! resume later through the session's run registry.
//!
//! # Example
//!
//! ```no_run
//! use planforge::{
//!     CancelToken, RunControl, SequentialExecutor, SessionState, Tensor,
//! };
//!
//! # fn run(session: &SessionState) -> planforge::ForgeResult<()> {
//! let executor = SequentialExecutor::new();
//! let cancel = CancelToken::new();
//! let output = executor.execute(
//!     session,
//!     &[0],
//!     vec![Tensor::scalar_f32(1.0).into()],
//!     &[2],
//!     Default::default(),
//!     RunControl::Full,
//!     &cancel,
//! )?;
//! # let _ = output.fetches;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod executor;
pub mod fence;
pub mod frame;
pub mod graph;
pub mod kernel;
pub mod logging;
pub mod memory;
pub mod plan;
pub mod profiling;
pub mod session;
pub mod tensor;

pub use error::{ErrorCategory, ForgeResult, PlanForgeError, StatusCode};
pub use executor::{CancelToken, RunControl, RunOutput, SequentialExecutor};
pub use fence::{Fence, FenceRef, ProviderType, QueueId, CPU_PROVIDER};
pub use frame::{ExecutionFrame, FetchAllocator};
pub use graph::{GraphViewer, NodeInfo};
pub use kernel::{
    KernelDef, KernelError, KernelRegistry, KernelResult, MemType, OpKernel, OpKernelContext,
    SUSPEND_OP_TYPE,
};
pub use memory::{MemoryPatternCache, MemoryPatternGroup};
pub use plan::{ExecutionPlan, NodeExecutionPlan, NodeIo};
pub use profiling::{EventCategory, ProfileEvent, Profiler};
pub use session::{RunId, RunRegistry, SessionConfig, SessionState, SessionStateBuilder};
pub use tensor::{DType, Tensor, Value};
