//! Shared fixtures for executor integration tests

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use planforge::{
    ExecutionPlan, GraphViewer, KernelDef, KernelError, KernelRegistry, KernelResult,
    NodeExecutionPlan, NodeInfo, NodeIo, OpKernel, OpKernelContext, ProviderType, QueueId,
    SessionConfig, SessionState, Tensor, Value, SUSPEND_OP_TYPE,
};

/// Node indices in the order their compute step ran
pub type ExecLog = Arc<Mutex<Vec<usize>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    /// Adds 1.0 to its scalar input
    Increment,
    /// Suspension operator; forwards its input unchanged
    Suspend,
    /// Fails with a kernel error
    Fail,
    /// Panics mid-compute
    Panic,
}

impl ChainOp {
    fn op_type(&self) -> &'static str {
        match self {
            ChainOp::Increment => "Increment",
            ChainOp::Suspend => SUSPEND_OP_TYPE,
            ChainOp::Fail => "Fail",
            ChainOp::Panic => "Panic",
        }
    }
}

pub struct ChainKernel {
    def: KernelDef,
    op: ChainOp,
    log: ExecLog,
}

impl ChainKernel {
    pub fn new(def: KernelDef, op: ChainOp, log: ExecLog) -> Self {
        ChainKernel { def, op, log }
    }
}

impl OpKernel for ChainKernel {
    fn def(&self) -> &KernelDef {
        &self.def
    }

    fn compute(&self, ctx: &mut OpKernelContext<'_>) -> KernelResult<()> {
        match self.op {
            ChainOp::Fail => return Err(KernelError::Failed("deliberate failure".to_string())),
            ChainOp::Panic => panic!("deliberate panic"),
            _ => {}
        }
        let input = ctx
            .input(0)?
            .as_tensor()
            .ok_or_else(|| KernelError::TypeMismatch("expected tensor".to_string()))?
            .to_f32()
            .map_err(|e| KernelError::TypeMismatch(e.to_string()))?;
        let delta = match self.op {
            ChainOp::Increment => 1.0,
            _ => 0.0,
        };
        ctx.set_output(0, Tensor::scalar_f32(input[0] + delta).into())?;
        self.log.lock().unwrap().push(ctx.node_index());
        Ok(())
    }
}

/// Build a linear chain: feed in slot 0, node i maps slot i to slot i + 1.
/// Returns the session and the shared compute log.
pub fn chain_session(ops: &[ChainOp], config: SessionConfig) -> (SessionState, ExecLog) {
    let log: ExecLog = Arc::new(Mutex::new(Vec::new()));
    let nodes = ops
        .iter()
        .enumerate()
        .map(|(i, op)| NodeInfo::new(format!("chain_{}", i), op.op_type()))
        .collect();
    let steps = (0..ops.len()).map(NodeExecutionPlan::new).collect();
    let node_io = (0..ops.len()).map(|i| NodeIo::dense(&[i], &[i + 1])).collect();
    let mut kernels = KernelRegistry::new();
    for (i, op) in ops.iter().enumerate() {
        kernels.insert(
            i,
            Arc::new(ChainKernel {
                def: KernelDef::cpu(op.op_type()),
                op: *op,
                log: log.clone(),
            }),
        );
    }
    let session = SessionState::builder()
        .plan(ExecutionPlan::new(steps, vec![], HashSet::new()))
        .graph(GraphViewer::new(nodes))
        .kernels(kernels)
        .node_io(node_io)
        .num_value_slots(ops.len() + 1)
        .fences(vec![None; ops.len() + 1])
        .config(config)
        .build()
        .expect("session construction");
    (session, log)
}

pub fn scalar(v: f32) -> Value {
    Tensor::scalar_f32(v).into()
}

pub fn scalar_of(value: &Value) -> f32 {
    value.as_tensor().unwrap().to_f32().unwrap()[0]
}

pub fn logged(log: &ExecLog) -> Vec<usize> {
    log.lock().unwrap().clone()
}

/// Fence hook call, in invocation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceCall {
    BeforeInput(ProviderType, QueueId),
    BeforeOutput(ProviderType, QueueId),
    AfterInput(QueueId),
    AfterOutput(QueueId),
}

#[derive(Default)]
pub struct RecordingFence {
    calls: Mutex<Vec<FenceCall>>,
}

impl RecordingFence {
    pub fn calls(&self) -> Vec<FenceCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl planforge::Fence for RecordingFence {
    fn before_using_as_input(&self, provider: ProviderType, queue_id: QueueId) {
        self.calls
            .lock()
            .unwrap()
            .push(FenceCall::BeforeInput(provider, queue_id));
    }

    fn before_using_as_output(&self, provider: ProviderType, queue_id: QueueId) {
        self.calls
            .lock()
            .unwrap()
            .push(FenceCall::BeforeOutput(provider, queue_id));
    }

    fn after_used_as_input(&self, queue_id: QueueId) {
        self.calls.lock().unwrap().push(FenceCall::AfterInput(queue_id));
    }

    fn after_used_as_output(&self, queue_id: QueueId) {
        self.calls.lock().unwrap().push(FenceCall::AfterOutput(queue_id));
    }
}
