//! Per-run execution frame: owner of all value lifetimes
//!
//! One frame exists per in-flight run. It holds the value-slot table,
//! translates feed/fetch indices into slots, tracks the resume cursor for
//! partial runs and optionally records produced-value sizes for
//! memory-pattern generation. Slots move through exactly three states:
//! unset, live, released — a released slot is never read again.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::error::{ForgeResult, PlanForgeError};
use crate::fence::FenceRef;
use crate::memory::{MemoryPatternGroup, MemoryPatternRecorder};
use crate::tensor::Value;

/// Copy-out hook for one fetch position: receives the produced value and
/// returns the caller-owned rendition (e.g. copied into pinned memory).
pub type FetchAllocator = Box<dyn Fn(&Value) -> Value + Send>;

enum SlotState {
    Unset,
    Live(Value),
    Released,
}

struct ValueSlot {
    state: SlotState,
    fence: Option<FenceRef>,
}

pub struct ExecutionFrame {
    slots: Vec<ValueSlot>,
    feed_slot_idxs: Vec<usize>,
    fetch_slot_idxs: Vec<usize>,
    fetch_allocators: HashMap<usize, FetchAllocator>,
    program_counter: usize,
    pattern_recorder: Option<MemoryPatternRecorder>,
    /// Shapes of the feeds, present only when every feed is a tensor
    feed_shapes: Option<Vec<Vec<i64>>>,
    static_sizes: HashMap<String, usize>,
    dynamic_sizes: HashMap<String, usize>,
}

impl ExecutionFrame {
    /// Create a frame for a new run. Feeds are moved into their slots;
    /// fences are attached per the planner's slot table.
    pub fn new(
        feed_idxs: &[usize],
        feeds: Vec<Value>,
        fetch_idxs: &[usize],
        fetch_allocators: HashMap<usize, FetchAllocator>,
        num_slots: usize,
        fences: &[Option<FenceRef>],
        record_memory_patterns: bool,
    ) -> ForgeResult<Self> {
        if feed_idxs.len() != feeds.len() {
            return Err(PlanForgeError::FeedCountMismatch {
                index_count: feed_idxs.len(),
                value_count: feeds.len(),
            });
        }

        let mut slots: Vec<ValueSlot> = (0..num_slots)
            .map(|i| ValueSlot {
                state: SlotState::Unset,
                fence: fences.get(i).cloned().flatten(),
            })
            .collect();

        let feed_shapes = collect_feed_shapes(&feeds);

        let mut static_sizes = HashMap::new();
        let mut feed_bytes = 0usize;
        for (idx, value) in feed_idxs.iter().zip(feeds) {
            let slot = slots
                .get_mut(*idx)
                .ok_or(PlanForgeError::SlotOutOfRange(*idx))?;
            feed_bytes += value.size_in_bytes();
            slot.state = SlotState::Live(value);
        }
        static_sizes.insert("feeds".to_string(), feed_bytes);

        Ok(ExecutionFrame {
            slots,
            feed_slot_idxs: feed_idxs.to_vec(),
            fetch_slot_idxs: fetch_idxs.to_vec(),
            fetch_allocators,
            program_counter: 0,
            pattern_recorder: record_memory_patterns.then(MemoryPatternRecorder::new),
            feed_shapes,
            static_sizes,
            dynamic_sizes: HashMap::new(),
        })
    }

    /// Rebind feeds and fetches for a resumed partial run. Idempotent, and
    /// touches only the slots named by the new feeds — intermediate values
    /// produced before the suspension stay live.
    pub fn update_feeds_and_fetches(
        &mut self,
        feed_idxs: &[usize],
        feeds: Vec<Value>,
        fetch_idxs: &[usize],
        fetch_allocators: HashMap<usize, FetchAllocator>,
    ) -> ForgeResult<()> {
        if feed_idxs.len() != feeds.len() {
            return Err(PlanForgeError::FeedCountMismatch {
                index_count: feed_idxs.len(),
                value_count: feeds.len(),
            });
        }

        self.feed_shapes = collect_feed_shapes(&feeds);

        let mut feed_bytes = 0usize;
        for (idx, value) in feed_idxs.iter().zip(feeds) {
            let slot = self
                .slots
                .get_mut(*idx)
                .ok_or(PlanForgeError::SlotOutOfRange(*idx))?;
            feed_bytes += value.size_in_bytes();
            slot.state = SlotState::Live(value);
        }
        // a rebind replaces the feed accounting rather than accumulating it
        self.static_sizes.insert("feeds".to_string(), feed_bytes);

        self.feed_slot_idxs = feed_idxs.to_vec();
        self.fetch_slot_idxs = fetch_idxs.to_vec();
        self.fetch_allocators = fetch_allocators;
        Ok(())
    }

    /// Live value in a slot; distinguishes never-produced from released
    pub fn value(&self, slot: usize) -> ForgeResult<&Value> {
        let entry = self
            .slots
            .get(slot)
            .ok_or(PlanForgeError::SlotOutOfRange(slot))?;
        match &entry.state {
            SlotState::Live(value) => Ok(value),
            SlotState::Unset => Err(PlanForgeError::SlotUnset(slot)),
            SlotState::Released => Err(PlanForgeError::SlotReleased(slot)),
        }
    }

    pub fn value_opt(&self, slot: usize) -> Option<&Value> {
        match &self.slots.get(slot)?.state {
            SlotState::Live(value) => Some(value),
            _ => None,
        }
    }

    /// Produce a value into a slot, recording its size for memory
    /// accounting and (when enabled) pattern generation
    pub fn set_value(&mut self, slot: usize, value: Value) -> ForgeResult<()> {
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(PlanForgeError::SlotOutOfRange(slot))?;
        let bytes = value.size_in_bytes();
        if let Some(recorder) = &mut self.pattern_recorder {
            recorder.record(slot, bytes);
        }
        *self
            .dynamic_sizes
            .entry("activations".to_string())
            .or_insert(0) += bytes;
        entry.state = SlotState::Live(value);
        Ok(())
    }

    pub fn fence(&self, slot: usize) -> Option<FenceRef> {
        self.slots.get(slot)?.fence.clone()
    }

    /// Release a slot back to the allocator. The plan guarantees each slot
    /// is freed exactly once, after its last consumer; only the bounds are
    /// checked here.
    pub fn release_value(&mut self, slot: usize) -> ForgeResult<()> {
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(PlanForgeError::SlotOutOfRange(slot))?;
        debug!(slot, "releasing value");
        entry.state = SlotState::Released;
        Ok(())
    }

    /// Extract the requested fetches into caller-owned storage.
    ///
    /// With `transfer_ownership` the value is moved out and the slot
    /// released — the engine will not touch it again. Otherwise the value
    /// is cloned and stays live. A fetch-specific allocator, when present,
    /// always produces the caller's copy.
    pub fn get_outputs(&mut self, transfer_ownership: bool) -> ForgeResult<Vec<Value>> {
        let fetch_slots = self.fetch_slot_idxs.clone();
        let mut fetches = Vec::with_capacity(fetch_slots.len());
        for (pos, slot) in fetch_slots.iter().enumerate() {
            if let Some(allocator) = self.fetch_allocators.get(&pos) {
                let value = self.value(*slot)?;
                fetches.push(allocator(value));
                continue;
            }
            if transfer_ownership {
                let entry = self
                    .slots
                    .get_mut(*slot)
                    .ok_or(PlanForgeError::SlotOutOfRange(*slot))?;
                match std::mem::replace(&mut entry.state, SlotState::Released) {
                    SlotState::Live(value) => fetches.push(value),
                    SlotState::Unset => return Err(PlanForgeError::SlotUnset(*slot)),
                    SlotState::Released => return Err(PlanForgeError::SlotReleased(*slot)),
                }
            } else {
                fetches.push(self.value(*slot)?.clone());
            }
        }
        Ok(fetches)
    }

    pub fn program_counter(&self) -> usize {
        self.program_counter
    }

    pub fn set_program_counter(&mut self, pc: usize) {
        self.program_counter = pc;
    }

    pub fn has_memory_pattern_planner(&self) -> bool {
        self.pattern_recorder.is_some()
    }

    /// Feed shapes for pattern-cache keying; `None` when any feed was a
    /// non-tensor
    pub fn feed_shapes(&self) -> Option<&[Vec<i64>]> {
        self.feed_shapes.as_deref()
    }

    /// Build a memory-pattern record from the sizes observed this run
    pub fn generate_patterns(&self) -> ForgeResult<MemoryPatternGroup> {
        let recorder = self.pattern_recorder.as_ref().ok_or_else(|| {
            PlanForgeError::Internal("frame has no memory pattern recorder".to_string())
        })?;
        Ok(recorder.generate())
    }

    pub fn static_memory_size_info(&self) -> &HashMap<String, usize> {
        &self.static_sizes
    }

    pub fn dynamic_memory_size_info(&self) -> &HashMap<String, usize> {
        &self.dynamic_sizes
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }
}

// The fetch allocators are opaque closures, so Debug summarizes the frame
// instead of deriving.
impl fmt::Debug for ExecutionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionFrame")
            .field("num_slots", &self.slots.len())
            .field("feed_slot_idxs", &self.feed_slot_idxs)
            .field("fetch_slot_idxs", &self.fetch_slot_idxs)
            .field("program_counter", &self.program_counter)
            .field("records_memory_patterns", &self.pattern_recorder.is_some())
            .finish_non_exhaustive()
    }
}

fn collect_feed_shapes(feeds: &[Value]) -> Option<Vec<Vec<i64>>> {
    feeds
        .iter()
        .map(|v| v.as_tensor().map(|t| t.shape().to_vec()))
        .collect()
}
