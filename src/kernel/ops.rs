//! Bundled host kernels
//!
//! The engine does not ship an operator library; these kernels exist so the
//! executor can be exercised end to end without an external backend. The
//! add kernel parallelizes across elements with rayon, which is opaque to
//! the executor: intra-op parallelism never affects inter-node ordering.

use rayon::prelude::*;

use crate::kernel::{
    KernelDef, KernelError, KernelResult, OpKernel, OpKernelContext, SUSPEND_OP_TYPE,
};
use crate::tensor::Tensor;

/// Element-wise f32 addition: output 0 = input 0 + input 1
pub struct ElementwiseAddKernel {
    def: KernelDef,
}

impl ElementwiseAddKernel {
    pub fn new() -> Self {
        ElementwiseAddKernel {
            def: KernelDef::cpu("Add"),
        }
    }
}

impl Default for ElementwiseAddKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl OpKernel for ElementwiseAddKernel {
    fn def(&self) -> &KernelDef {
        &self.def
    }

    fn compute(&self, ctx: &mut OpKernelContext<'_>) -> KernelResult<()> {
        let lhs = tensor_input(ctx, 0)?;
        let rhs = tensor_input(ctx, 1)?;
        if lhs.shape() != rhs.shape() {
            return Err(KernelError::ShapeMismatch(format!(
                "{:?} vs {:?}",
                lhs.shape(),
                rhs.shape()
            )));
        }
        let shape = lhs.shape().to_vec();
        let a = lhs.to_f32().map_err(|e| KernelError::TypeMismatch(e.to_string()))?;
        let b = rhs.to_f32().map_err(|e| KernelError::TypeMismatch(e.to_string()))?;

        let out: Vec<f32> = a.par_iter().zip(b.par_iter()).map(|(x, y)| x + y).collect();
        ctx.set_output(0, Tensor::from_f32(shape, &out).into())
    }
}

/// Pass-through: copies input i to output i for every connected pair
pub struct IdentityKernel {
    def: KernelDef,
}

impl IdentityKernel {
    pub fn new() -> Self {
        IdentityKernel {
            def: KernelDef::cpu("Identity"),
        }
    }
}

impl Default for IdentityKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl OpKernel for IdentityKernel {
    fn def(&self) -> &KernelDef {
        &self.def
    }

    fn compute(&self, ctx: &mut OpKernelContext<'_>) -> KernelResult<()> {
        let pairs = ctx.input_count().min(ctx.output_count());
        for i in 0..pairs {
            let value = ctx.input(i)?.clone();
            ctx.set_output(i, value)?;
        }
        Ok(())
    }
}

/// Suspension operator. Forwards its inputs so host code can observe them
/// at the window boundary; the executor ends the partial-execution window
/// just after this node.
pub struct SuspendKernel {
    def: KernelDef,
}

impl SuspendKernel {
    pub fn new() -> Self {
        SuspendKernel {
            def: KernelDef::cpu(SUSPEND_OP_TYPE),
        }
    }
}

impl Default for SuspendKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl OpKernel for SuspendKernel {
    fn def(&self) -> &KernelDef {
        &self.def
    }

    fn compute(&self, ctx: &mut OpKernelContext<'_>) -> KernelResult<()> {
        let pairs = ctx.input_count().min(ctx.output_count());
        for i in 0..pairs {
            let value = ctx.input(i)?.clone();
            ctx.set_output(i, value)?;
        }
        Ok(())
    }
}

fn tensor_input<'a>(ctx: &'a OpKernelContext<'_>, index: usize) -> KernelResult<&'a Tensor> {
    ctx.input(index)?
        .as_tensor()
        .ok_or_else(|| KernelError::TypeMismatch(format!("input {} is not a tensor", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CancelToken;
    use crate::frame::ExecutionFrame;
    use crate::plan::NodeIo;
    use crate::tensor::Value;

    fn frame_with_feeds(num_slots: usize, feeds: Vec<(usize, Value)>) -> ExecutionFrame {
        let (idxs, values): (Vec<usize>, Vec<Value>) = feeds.into_iter().unzip();
        let fences = vec![None; num_slots];
        ExecutionFrame::new(&idxs, values, &[], Default::default(), num_slots, &fences, false)
            .expect("frame construction")
    }

    #[test]
    fn test_add_kernel() {
        let mut frame = frame_with_feeds(
            3,
            vec![
                (0, Tensor::from_f32(vec![4], &[1.0, 2.0, 3.0, 4.0]).into()),
                (1, Tensor::from_f32(vec![4], &[10.0, 20.0, 30.0, 40.0]).into()),
            ],
        );
        let io = NodeIo::dense(&[0, 1], &[2]);
        let cancel = CancelToken::new();
        let mut ctx = OpKernelContext::new(&mut frame, &io, 0, &cancel);

        ElementwiseAddKernel::new().compute(&mut ctx).unwrap();

        let out = frame.value(2).unwrap().as_tensor().unwrap().to_f32().unwrap();
        assert_eq!(out, vec![11.0, 22.0, 33.0, 44.0]);
    }

    #[test]
    fn test_add_kernel_shape_mismatch() {
        let mut frame = frame_with_feeds(
            3,
            vec![
                (0, Tensor::from_f32(vec![2], &[1.0, 2.0]).into()),
                (1, Tensor::from_f32(vec![3], &[1.0, 2.0, 3.0]).into()),
            ],
        );
        let io = NodeIo::dense(&[0, 1], &[2]);
        let cancel = CancelToken::new();
        let mut ctx = OpKernelContext::new(&mut frame, &io, 0, &cancel);

        let err = ElementwiseAddKernel::new().compute(&mut ctx).unwrap_err();
        assert!(matches!(err, KernelError::ShapeMismatch(_)));
    }

    #[test]
    fn test_suspend_kernel_forwards_inputs() {
        let mut frame = frame_with_feeds(
            2,
            vec![(0, Tensor::scalar_f32(5.0).into())],
        );
        let io = NodeIo::dense(&[0], &[1]);
        let cancel = CancelToken::new();
        let mut ctx = OpKernelContext::new(&mut frame, &io, 0, &cancel);

        SuspendKernel::new().compute(&mut ctx).unwrap();
        assert!(frame.value(1).is_ok());
        assert!(SuspendKernel::new().def().is_suspension_point());
    }
}
