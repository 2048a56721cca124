//! Plan-driven sequential executor
//!
//! Walks the execution plan between a start and end cursor, running one
//! node per step: cancellation check, optional path pruning, kernel
//! resolution, pre-compute fence waits, compute, post-compute fence
//! releases, then release of the values whose last consumer just ran.
//! Partial runs execute one window per call — up to and including the
//! first suspension operator strictly past the window start — and park
//! their frame in the session's run registry between calls.

mod cancel;

pub use cancel::CancelToken;

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::{ForgeResult, PlanForgeError};
use crate::fence::CPU_PROVIDER;
use crate::frame::{ExecutionFrame, FetchAllocator};
use crate::kernel::{MemType, OpKernelContext, SUSPEND_OP_TYPE};
use crate::profiling::EventCategory;
use crate::session::{RunId, SessionState};
use crate::tensor::Value;

/// How a call to [`SequentialExecutor::execute`] relates to the run registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    /// Run the whole plan in one call; no registry interaction
    Full,
    /// Start a new partial run: execute the first window and suspend
    NewPartial,
    /// Resume the suspended partial run with this id
    Resume(RunId),
}

/// Result of one execute call
#[derive(Debug)]
pub struct RunOutput {
    pub fetches: Vec<Value>,
    /// Present for partial runs; pass it back via [`RunControl::Resume`]
    pub run_id: Option<RunId>,
}

pub struct SequentialExecutor {
    only_execute_path_to_fetches: bool,
}

impl Default for SequentialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialExecutor {
    pub fn new() -> Self {
        SequentialExecutor {
            only_execute_path_to_fetches: false,
        }
    }

    /// Skip nodes that cannot influence the requested fetches
    pub fn with_path_pruning(mut self, prune: bool) -> Self {
        self.only_execute_path_to_fetches = prune;
        self
    }

    /// Execute the session's plan, or one window of it for partial runs.
    ///
    /// Feeds are bound to their slots before the first node runs; fetches
    /// are extracted after the window completes. A compute failure aborts
    /// the run and drops a partial run from the registry; cooperative
    /// termination of a previously suspended run instead leaves its frame
    /// registered so the caller can retry or discard it.
    pub fn execute(
        &self,
        session: &SessionState,
        feed_idxs: &[usize],
        feeds: Vec<Value>,
        fetch_idxs: &[usize],
        fetch_allocators: HashMap<usize, FetchAllocator>,
        control: RunControl,
        cancel: &CancelToken,
    ) -> ForgeResult<RunOutput> {
        match control {
            RunControl::Full => {
                let mut frame =
                    session.new_frame(feed_idxs, feeds, fetch_idxs, fetch_allocators)?;
                let to_execute = self.pruned_nodes(session, fetch_idxs)?;
                let session_start = session.profiler().start();
                self.execute_range(
                    session,
                    &mut frame,
                    0,
                    session.plan().len(),
                    to_execute.as_deref(),
                    cancel,
                )?;
                session.profiler().end_and_record(
                    EventCategory::Session,
                    "sequential_execution",
                    session_start,
                    vec![],
                );
                self.end_of_range(session, &frame)?;
                // the frame dies with this call, so fetches can be moved out
                let fetches = frame.get_outputs(true)?;
                Ok(RunOutput {
                    fetches,
                    run_id: None,
                })
            }
            RunControl::NewPartial => {
                let run_id = session.run_registry().allocate_id()?;
                let frame = session.new_frame(feed_idxs, feeds, fetch_idxs, fetch_allocators)?;
                debug!(run_id, "starting partial run");
                self.run_window(session, frame, run_id, false, fetch_idxs, cancel)
            }
            RunControl::Resume(run_id) => {
                let mut frame = session.run_registry().checkout(run_id)?;
                frame.update_feeds_and_fetches(feed_idxs, feeds, fetch_idxs, fetch_allocators)?;
                debug!(run_id, cursor = frame.program_counter(), "resuming partial run");
                self.run_window(session, frame, run_id, true, fetch_idxs, cancel)
            }
        }
    }

    /// Execute one partial-run window and either park the frame or finish
    /// the run.
    fn run_window(
        &self,
        session: &SessionState,
        mut frame: ExecutionFrame,
        run_id: RunId,
        resumed: bool,
        fetch_idxs: &[usize],
        cancel: &CancelToken,
    ) -> ForgeResult<RunOutput> {
        let plan = session.plan();
        let start = frame.program_counter();
        let end = self.window_end(session, start)?;

        let to_execute = self.pruned_nodes(session, fetch_idxs)?;
        let session_start = session.profiler().start();
        if let Err(err) = self.execute_range(session, &mut frame, start, end, to_execute.as_deref(), cancel) {
            if err.is_terminated() && resumed {
                // cooperative cancellation leaves the frame as-is; the caller
                // decides whether to retry the window or discard the run. A
                // run cancelled before its first suspension is dropped
                // instead: its id was never returned, so a registered frame
                // would be unreachable.
                session.run_registry().checkin(run_id, frame)?;
            }
            return Err(err);
        }
        session.profiler().end_and_record(
            EventCategory::Session,
            "sequential_execution",
            session_start,
            vec![("run_id".to_string(), run_id.to_string())],
        );
        self.end_of_range(session, &frame)?;

        // Sync the inputs of the node just past the window so the caller can
        // safely read the fetched intermediates before resuming.
        if end < plan.len() {
            self.wait_input_fences(session, &frame, plan.steps()[end].node_index)?;
        }

        let transfer = session.config().transfer_intermediate_ownership;
        let fetches = frame.get_outputs(transfer)?;
        // With ownership transfer the node after the suspension point had its
        // inputs handed to the caller, so the cursor skips past it.
        let new_pc = if transfer && end < plan.len() {
            end + 1
        } else {
            end
        };
        frame.set_program_counter(new_pc);

        if new_pc >= plan.len() {
            debug!(run_id, "partial run complete");
        } else {
            session.run_registry().checkin(run_id, frame)?;
        }
        Ok(RunOutput {
            fetches,
            run_id: Some(run_id),
        })
    }

    /// End cursor of the window starting at `start`: one past the first
    /// suspension operator strictly after `start`, or plan end. Scanning
    /// strictly after the start guarantees progress when the cursor itself
    /// sits on a suspension operator.
    fn window_end(&self, session: &SessionState, start: usize) -> ForgeResult<usize> {
        let steps = session.plan().steps();
        for step_index in (start + 1)..steps.len() {
            let node = session.graph().node(steps[step_index].node_index)?;
            if node.op_type == SUSPEND_OP_TYPE {
                return Ok(step_index + 1);
            }
        }
        Ok(steps.len())
    }

    fn pruned_nodes(
        &self,
        session: &SessionState,
        fetch_idxs: &[usize],
    ) -> ForgeResult<Option<Arc<HashSet<usize>>>> {
        if self.only_execute_path_to_fetches || session.config().only_execute_path_to_fetches {
            Ok(Some(session.nodes_for_fetches(fetch_idxs)?))
        } else {
            Ok(None)
        }
    }

    /// Run plan steps `start..end` against the frame
    fn execute_range(
        &self,
        session: &SessionState,
        frame: &mut ExecutionFrame,
        start: usize,
        end: usize,
        to_execute: Option<&HashSet<usize>>,
        cancel: &CancelToken,
    ) -> ForgeResult<()> {
        let plan = session.plan();
        let profiler = session.profiler();

        for step_index in start..end {
            if cancel.is_cancelled() {
                error!("exiting due to terminate flag being set to true");
                return Err(PlanForgeError::Terminated);
            }

            let step = &plan.steps()[step_index];
            let node_index = step.node_index;
            if let Some(nodes) = to_execute {
                if !nodes.contains(&node_index) {
                    continue;
                }
            }

            let node = session.graph().node(node_index)?;
            let kernel = session.kernel(node_index)?;
            let def = kernel.def();
            let io = session.node_io(node_index)?;
            let has_fence = plan.node_has_fence(node_index);
            let trace_name = node.profiling_name(node_index);

            debug!(node_index, op_type = %node.op_type, "executing node");

            if has_fence {
                let fence_start = profiler.start();
                for (input_index, slot) in io.inputs.iter().enumerate() {
                    let Some(slot) = slot else { continue };
                    if let Some(fence) = frame.fence(*slot) {
                        let provider = match def.input_memory_type(input_index) {
                            MemType::CpuInput => CPU_PROVIDER,
                            MemType::Default => def.provider(),
                        };
                        fence.before_using_as_input(provider, def.queue_id());
                    }
                }
                for slot in &io.implicit_inputs {
                    if let Some(fence) = frame.fence(*slot) {
                        fence.before_using_as_input(def.provider(), def.queue_id());
                    }
                }
                for slot in io.outputs.iter().flatten() {
                    if let Some(fence) = frame.fence(*slot) {
                        fence.before_using_as_output(def.provider(), def.queue_id());
                    }
                }
                if profiler.is_enabled() {
                    profiler.end_and_record(
                        EventCategory::Node,
                        format!("{}_fence_before", trace_name),
                        fence_start,
                        vec![("op_name".to_string(), node.op_type.clone())],
                    );
                }
            }

            let mut activation_bytes = 0usize;
            let mut parameter_bytes = 0usize;
            if profiler.is_enabled() {
                for slot in io.inputs.iter().flatten().chain(io.implicit_inputs.iter()) {
                    if let Some(value) = frame.value_opt(*slot) {
                        if session.is_constant_slot(*slot) {
                            parameter_bytes += value.size_in_bytes();
                        } else {
                            activation_bytes += value.size_in_bytes();
                        }
                    }
                }
            }

            let kernel_start = profiler.start();
            let output_bytes;
            {
                let mut ctx = OpKernelContext::new(frame, io, node_index, cancel);
                let compute = catch_unwind(AssertUnwindSafe(|| kernel.compute(&mut ctx)));
                match compute {
                    Ok(Ok(())) => {}
                    Ok(Err(kernel_err)) => {
                        let message = kernel_err.to_string();
                        error!(
                            node_index,
                            op_type = %node.op_type,
                            node_name = %node.name,
                            %message,
                            "kernel compute failed"
                        );
                        return Err(PlanForgeError::ComputeFailed {
                            op_type: node.op_type.clone(),
                            node_name: node.name.clone(),
                            message,
                        });
                    }
                    Err(payload) => {
                        let message = panic_message(payload);
                        error!(
                            node_index,
                            op_type = %node.op_type,
                            node_name = %node.name,
                            %message,
                            "kernel compute panicked"
                        );
                        return Err(PlanForgeError::ComputePanicked {
                            op_type: node.op_type.clone(),
                            node_name: node.name.clone(),
                            message,
                        });
                    }
                }
                output_bytes = if profiler.is_enabled() {
                    (0..ctx.output_count())
                        .filter_map(|i| ctx.output_value(i))
                        .map(Value::size_in_bytes)
                        .sum()
                } else {
                    0usize
                };
            }

            if profiler.is_enabled() {
                profiler.end_and_record(
                    EventCategory::Node,
                    format!("{}_kernel_time", trace_name),
                    kernel_start,
                    vec![
                        ("op_name".to_string(), node.op_type.clone()),
                        ("provider".to_string(), def.provider().to_string()),
                        ("graph_index".to_string(), node_index.to_string()),
                        ("exec_plan_index".to_string(), step_index.to_string()),
                        ("activation_size".to_string(), activation_bytes.to_string()),
                        ("parameter_size".to_string(), parameter_bytes.to_string()),
                        ("output_size".to_string(), output_bytes.to_string()),
                    ],
                );
            }

            if has_fence {
                let fence_start = profiler.start();
                for slot in io.inputs.iter().flatten() {
                    if let Some(fence) = frame.fence(*slot) {
                        fence.after_used_as_input(def.queue_id());
                    }
                }
                for slot in &io.implicit_inputs {
                    if let Some(fence) = frame.fence(*slot) {
                        fence.after_used_as_input(def.queue_id());
                    }
                }
                for slot in io.outputs.iter().flatten() {
                    if let Some(fence) = frame.fence(*slot) {
                        fence.after_used_as_output(def.queue_id());
                    }
                }
                if profiler.is_enabled() {
                    profiler.end_and_record(
                        EventCategory::Node,
                        format!("{}_fence_after", trace_name),
                        fence_start,
                        vec![("op_name".to_string(), node.op_type.clone())],
                    );
                }
            }

            for slot in plan.slots_to_free(step) {
                frame.release_value(*slot)?;
            }
        }
        Ok(())
    }

    /// Before-as-input hooks for one node, without computing it
    fn wait_input_fences(
        &self,
        session: &SessionState,
        frame: &ExecutionFrame,
        node_index: usize,
    ) -> ForgeResult<()> {
        if !session.plan().node_has_fence(node_index) {
            return Ok(());
        }
        let kernel = session.kernel(node_index)?;
        let def = kernel.def();
        let io = session.node_io(node_index)?;
        for (input_index, slot) in io.inputs.iter().enumerate() {
            let Some(slot) = slot else { continue };
            if let Some(fence) = frame.fence(*slot) {
                let provider = match def.input_memory_type(input_index) {
                    MemType::CpuInput => CPU_PROVIDER,
                    MemType::Default => def.provider(),
                };
                fence.before_using_as_input(provider, def.queue_id());
            }
        }
        for slot in &io.implicit_inputs {
            if let Some(fence) = frame.fence(*slot) {
                fence.before_using_as_input(def.provider(), def.queue_id());
            }
        }
        Ok(())
    }

    /// Memory-pattern publication and usage accounting after the last node
    /// in a range
    fn end_of_range(&self, session: &SessionState, frame: &ExecutionFrame) -> ForgeResult<()> {
        if frame.has_memory_pattern_planner() {
            if let Some(shapes) = frame.feed_shapes() {
                let group = frame.generate_patterns()?;
                debug!(total_size = group.total_size(), "publishing memory pattern");
                session.pattern_cache().insert(shapes.to_vec(), group);
            }
        }
        for (kind, bytes) in frame.static_memory_size_info() {
            info!(%kind, bytes, "static memory usage");
        }
        for (kind, bytes) in frame.dynamic_memory_size_info() {
            info!(%kind, bytes, "dynamic memory usage");
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "kernel panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphViewer, NodeInfo};
    use crate::kernel::{IdentityKernel, KernelRegistry, SuspendKernel};
    use crate::plan::{ExecutionPlan, NodeExecutionPlan, NodeIo};

    fn chain_session(op_types: &[&str]) -> SessionState {
        let nodes = op_types
            .iter()
            .enumerate()
            .map(|(i, op)| NodeInfo::new(format!("n{}", i), *op))
            .collect();
        let steps = (0..op_types.len()).map(NodeExecutionPlan::new).collect();
        let node_io = (0..op_types.len())
            .map(|i| NodeIo::dense(&[i], &[i + 1]))
            .collect();
        let mut kernels = KernelRegistry::new();
        for (i, op) in op_types.iter().enumerate() {
            if *op == SUSPEND_OP_TYPE {
                kernels.insert(i, Arc::new(SuspendKernel::new()));
            } else {
                kernels.insert(i, Arc::new(IdentityKernel::new()));
            }
        }
        SessionState::builder()
            .plan(ExecutionPlan::new(steps, vec![], HashSet::new()))
            .graph(GraphViewer::new(nodes))
            .kernels(kernels)
            .node_io(node_io)
            .num_value_slots(op_types.len() + 1)
            .fences(vec![None; op_types.len() + 1])
            .build()
            .unwrap()
    }

    #[test]
    fn test_window_ends_after_first_suspension() {
        let session = chain_session(&["Identity", "Identity", SUSPEND_OP_TYPE, "Identity", "Identity"]);
        let executor = SequentialExecutor::new();
        assert_eq!(executor.window_end(&session, 0).unwrap(), 3);
        assert_eq!(executor.window_end(&session, 3).unwrap(), 5);
    }

    #[test]
    fn test_window_without_suspension_covers_whole_plan() {
        let session = chain_session(&["Identity", "Identity", "Identity"]);
        let executor = SequentialExecutor::new();
        assert_eq!(executor.window_end(&session, 0).unwrap(), 3);
    }

    #[test]
    fn test_window_scan_skips_suspension_at_cursor() {
        // back-to-back suspension operators: the one at the cursor executes
        // with the following window instead of suspending immediately
        let session = chain_session(&[
            "Identity",
            SUSPEND_OP_TYPE,
            SUSPEND_OP_TYPE,
            "Identity",
        ]);
        let executor = SequentialExecutor::new();
        assert_eq!(executor.window_end(&session, 0).unwrap(), 2);
        assert_eq!(executor.window_end(&session, 1).unwrap(), 3);
        assert_eq!(executor.window_end(&session, 2).unwrap(), 4);
    }
}
