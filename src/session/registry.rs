//! Registry of suspended partial runs
//!
//! A frame lives in the registry exactly while its run is suspended: it is
//! checked out for the duration of a window and checked back in only if the
//! run suspended again. Completed or failed runs are never re-inserted, so
//! resuming a finished id fails with [`PlanForgeError::UnknownRunId`].

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{ForgeResult, PlanForgeError};
use crate::frame::ExecutionFrame;

/// Identifier of one partial run, unique within a session
pub type RunId = i64;

struct RegistryInner {
    runs: HashMap<RunId, ExecutionFrame>,
    next_id: RunId,
}

pub struct RunRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for RunRegistry {
    fn default() -> Self {
        RunRegistry {
            inner: Mutex::new(RegistryInner {
                runs: HashMap::new(),
                next_id: 0,
            }),
        }
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a new partial run
    pub fn allocate_id(&self) -> ForgeResult<RunId> {
        let mut inner = self.inner.lock()?;
        if inner.next_id == RunId::MAX {
            return Err(PlanForgeError::RunIdsExhausted);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        Ok(id)
    }

    /// Take the suspended frame for `run_id` out of the registry. The caller
    /// owns it until [`checkin`](RunRegistry::checkin); a missing entry means
    /// the id was never issued, already completed, or is mid-execution.
    pub fn checkout(&self, run_id: RunId) -> ForgeResult<ExecutionFrame> {
        let mut inner = self.inner.lock()?;
        inner
            .runs
            .remove(&run_id)
            .ok_or(PlanForgeError::UnknownRunId(run_id))
    }

    /// Park a frame that suspended again
    pub fn checkin(&self, run_id: RunId, frame: ExecutionFrame) -> ForgeResult<()> {
        let mut inner = self.inner.lock()?;
        inner.runs.insert(run_id, frame);
        Ok(())
    }

    pub fn contains(&self, run_id: RunId) -> bool {
        match self.inner.lock() {
            Ok(inner) => inner.runs.contains_key(&run_id),
            Err(poisoned) => poisoned.into_inner().runs.contains_key(&run_id),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.runs.len(),
            Err(poisoned) => poisoned.into_inner().runs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
