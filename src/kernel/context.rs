//! Invocation context handed to a kernel's compute step
//!
//! The context scopes one node's slot bindings onto the run's execution
//! frame: input reads, output writes and fence lookups all go through it.
//! It lives only for the duration of one node visit.

use crate::error::PlanForgeError;
use crate::executor::CancelToken;
use crate::fence::FenceRef;
use crate::frame::ExecutionFrame;
use crate::kernel::{KernelError, KernelResult};
use crate::plan::NodeIo;
use crate::tensor::Value;

pub struct OpKernelContext<'a> {
    frame: &'a mut ExecutionFrame,
    io: &'a NodeIo,
    node_index: usize,
    cancel: &'a CancelToken,
}

impl<'a> OpKernelContext<'a> {
    pub fn new(
        frame: &'a mut ExecutionFrame,
        io: &'a NodeIo,
        node_index: usize,
        cancel: &'a CancelToken,
    ) -> Self {
        OpKernelContext {
            frame,
            io,
            node_index,
            cancel,
        }
    }

    pub fn node_index(&self) -> usize {
        self.node_index
    }

    pub fn input_count(&self) -> usize {
        self.io.inputs.len()
    }

    pub fn implicit_input_count(&self) -> usize {
        self.io.implicit_inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.io.outputs.len()
    }

    /// Read a required input. Fails if the position is unconnected or the
    /// slot holds no live value.
    pub fn input(&self, index: usize) -> KernelResult<&Value> {
        let slot = self
            .input_slot(index)
            .ok_or(KernelError::MissingInput(index))?;
        self.frame
            .value(slot)
            .map_err(|e| slot_error_to_kernel(index, e))
    }

    /// Read an optional input; `None` when unconnected or not yet produced
    pub fn try_input(&self, index: usize) -> Option<&Value> {
        let slot = self.input_slot(index)?;
        self.frame.value_opt(slot)
    }

    pub fn implicit_input(&self, index: usize) -> KernelResult<&Value> {
        let slot = self
            .io
            .implicit_inputs
            .get(index)
            .copied()
            .ok_or(KernelError::MissingInput(index))?;
        self.frame
            .value(slot)
            .map_err(|e| slot_error_to_kernel(index, e))
    }

    /// Produce an output value into its slot
    pub fn set_output(&mut self, index: usize, value: Value) -> KernelResult<()> {
        let slot = self
            .output_slot(index)
            .ok_or(KernelError::MissingOutput(index))?;
        self.frame
            .set_value(slot, value)
            .map_err(|e| KernelError::Failed(e.to_string()))
    }

    /// Already-produced output value, if any. Used by the executor for
    /// output size accounting after compute.
    pub fn output_value(&self, index: usize) -> Option<&Value> {
        let slot = self.output_slot(index)?;
        self.frame.value_opt(slot)
    }

    pub fn input_slot(&self, index: usize) -> Option<usize> {
        self.io.inputs.get(index).copied().flatten()
    }

    pub fn output_slot(&self, index: usize) -> Option<usize> {
        self.io.outputs.get(index).copied().flatten()
    }

    pub fn input_fence(&self, index: usize) -> Option<FenceRef> {
        self.input_slot(index).and_then(|slot| self.frame.fence(slot))
    }

    pub fn implicit_input_fence(&self, index: usize) -> Option<FenceRef> {
        self.io
            .implicit_inputs
            .get(index)
            .and_then(|slot| self.frame.fence(*slot))
    }

    pub fn output_fence(&self, index: usize) -> Option<FenceRef> {
        self.output_slot(index).and_then(|slot| self.frame.fence(slot))
    }

    /// Long-running kernels may poll this to honor cancellation mid-compute
    pub fn terminate_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn slot_error_to_kernel(index: usize, err: PlanForgeError) -> KernelError {
    match err {
        PlanForgeError::SlotUnset(_) | PlanForgeError::SlotReleased(_) => {
            KernelError::MissingInput(index)
        }
        other => KernelError::Failed(other.to_string()),
    }
}
