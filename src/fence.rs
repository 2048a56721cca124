//! Cross-device ordering fences
//!
//! A fence is attached to a value slot when the planner determined that a
//! producer and a consumer live on different execution providers or queues.
//! Every access to a fenced slot must be bracketed with the matching
//! before/after pair, in program order relative to that slot. The
//! [`SequentialExecutor`](crate::executor::SequentialExecutor) issues the
//! hooks in a fixed order per node visit: before-as-input (explicit inputs,
//! then implicit inputs), before-as-output, compute, after-as-input
//! (explicit, then implicit), after-as-output.

use std::sync::Arc;

/// Device queue identifier within an execution provider
pub type QueueId = i32;

/// Execution provider identity, e.g. which backend owns a kernel
pub type ProviderType = &'static str;

/// Provider identity used when a kernel requires an input in host memory
pub const CPU_PROVIDER: ProviderType = "CPUExecutionProvider";

/// Default device queue within a provider
pub const DEFAULT_QUEUE: QueueId = 0;

/// Ordering hooks for asynchronous producer/consumer access to one value slot.
///
/// Implementations are expected to block (or enqueue a wait) in the
/// `before_*` hooks until prior asynchronous work on the slot is visible to
/// the named provider/queue, and to publish completion in the `after_*`
/// hooks. The executor never inspects fence state; it only guarantees call
/// order and exactly-once invocation per node visit.
pub trait Fence: Send + Sync {
    /// Called before a node reads the slot
    fn before_using_as_input(&self, provider: ProviderType, queue_id: QueueId);

    /// Called before a node writes the slot
    fn before_using_as_output(&self, provider: ProviderType, queue_id: QueueId);

    /// Called after the node's compute step, for each input access
    fn after_used_as_input(&self, queue_id: QueueId);

    /// Called after the node's compute step, for each output access
    fn after_used_as_output(&self, queue_id: QueueId);
}

/// Shared handle to a fence; slots hold these, kernels and the executor
/// clone them freely.
pub type FenceRef = Arc<dyn Fence>;
