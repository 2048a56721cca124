//! Memory-pattern records and the session-level pattern cache
//!
//! Repeated runs with identical feed shapes allocate the same intermediate
//! sizes. The frame records produced-value sizes during a run; at the end
//! of a range the executor turns them into a [`MemoryPatternGroup`] — a
//! packed arena layout — and publishes it into the shared
//! [`MemoryPatternCache`] keyed by feed shapes, so later runs can
//! pre-reserve one block instead of allocating per value.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Arena placement for one value slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPattern {
    pub slot_index: usize,
    pub offset: usize,
    pub bytes: usize,
}

/// Packed layout of every value produced during one run
#[derive(Debug, Clone, Default)]
pub struct MemoryPatternGroup {
    total_size: usize,
    patterns: Vec<SlotPattern>,
}

impl MemoryPatternGroup {
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn patterns(&self) -> &[SlotPattern] {
        &self.patterns
    }

    pub fn pattern_for_slot(&self, slot_index: usize) -> Option<&SlotPattern> {
        self.patterns.iter().find(|p| p.slot_index == slot_index)
    }
}

/// Accumulates produced-value sizes during a run
#[derive(Debug, Default)]
pub struct MemoryPatternRecorder {
    // BTreeMap keeps the generated layout deterministic across runs
    sizes: BTreeMap<usize, usize>,
}

const ARENA_ALIGNMENT: usize = 256;

impl MemoryPatternRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the size of a value produced into `slot`. Re-produced slots
    /// keep the largest observed size.
    pub fn record(&mut self, slot: usize, bytes: usize) {
        let entry = self.sizes.entry(slot).or_insert(0);
        *entry = (*entry).max(bytes);
    }

    /// Lay the recorded slots out back to back, aligned for device access
    pub fn generate(&self) -> MemoryPatternGroup {
        let mut patterns = Vec::with_capacity(self.sizes.len());
        let mut offset = 0usize;
        for (slot_index, bytes) in &self.sizes {
            patterns.push(SlotPattern {
                slot_index: *slot_index,
                offset,
                bytes: *bytes,
            });
            offset += align_up(*bytes, ARENA_ALIGNMENT);
        }
        MemoryPatternGroup {
            total_size: offset,
            patterns,
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Shared cache of pattern groups keyed by feed shapes. First writer wins;
/// repeat publications for the same shapes are ignored.
#[derive(Default)]
pub struct MemoryPatternCache {
    inner: Mutex<HashMap<Vec<Vec<i64>>, Arc<MemoryPatternGroup>>>,
}

impl MemoryPatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, feed_shapes: Vec<Vec<i64>>, group: MemoryPatternGroup) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.entry(feed_shapes).or_insert_with(|| Arc::new(group));
    }

    pub fn get(&self, feed_shapes: &[Vec<i64>]) -> Option<Arc<MemoryPatternGroup>> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.get(feed_shapes).cloned()
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_packs_aligned() {
        let mut recorder = MemoryPatternRecorder::new();
        recorder.record(3, 100);
        recorder.record(7, 300);
        let group = recorder.generate();

        assert_eq!(group.patterns().len(), 2);
        assert_eq!(group.pattern_for_slot(3).unwrap().offset, 0);
        assert_eq!(group.pattern_for_slot(7).unwrap().offset, 256);
        assert_eq!(group.total_size(), 256 + 512);
    }

    #[test]
    fn test_recorder_keeps_max_size() {
        let mut recorder = MemoryPatternRecorder::new();
        recorder.record(0, 64);
        recorder.record(0, 32);
        assert_eq!(recorder.generate().pattern_for_slot(0).unwrap().bytes, 64);
    }

    #[test]
    fn test_cache_first_writer_wins() {
        let cache = MemoryPatternCache::new();
        let shapes = vec![vec![1i64, 4]];

        let mut r1 = MemoryPatternRecorder::new();
        r1.record(0, 16);
        cache.insert(shapes.clone(), r1.generate());

        let mut r2 = MemoryPatternRecorder::new();
        r2.record(0, 9999);
        cache.insert(shapes.clone(), r2.generate());

        let cached = cache.get(&shapes).unwrap();
        assert_eq!(cached.pattern_for_slot(0).unwrap().bytes, 16);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_miss_on_different_shapes() {
        let cache = MemoryPatternCache::new();
        cache.insert(vec![vec![2i64]], MemoryPatternGroup::default());
        assert!(cache.get(&[vec![3i64]]).is_none());
    }
}
