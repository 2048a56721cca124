//! Injectable profiler for node and session timing
//!
//! The profiler is side-effect only: the executor records events through it
//! but never reads them back, and a disabled profiler costs one branch per
//! call site. Events follow the runtime's trace convention — per node,
//! `<name>_fence_before`, `<name>_kernel_time` and `<name>_fence_after`,
//! plus one session-level event per execute call — and can be exported as
//! chrome-trace JSON.

use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::error::{ForgeResult, PlanForgeError};

/// Event category, matching the chrome-trace `cat` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventCategory {
    Session,
    Node,
}

/// One recorded profile event
#[derive(Debug, Clone, Serialize)]
pub struct ProfileEvent {
    pub category: EventCategory,
    pub name: String,
    /// Microseconds since profiler creation
    pub timestamp_us: u64,
    pub duration_us: u64,
    pub args: Vec<(String, String)>,
}

/// Collects timing events when enabled; inert otherwise
pub struct Profiler {
    enabled: bool,
    epoch: Instant,
    events: Mutex<Vec<ProfileEvent>>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Profiler {
            enabled,
            epoch: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Timestamp for a region about to be measured
    pub fn start(&self) -> Instant {
        Instant::now()
    }

    /// Close a region opened with [`start`](Profiler::start) and record it
    pub fn end_and_record(
        &self,
        category: EventCategory,
        name: impl Into<String>,
        start: Instant,
        args: Vec<(String, String)>,
    ) {
        if !self.enabled {
            return;
        }
        let event = ProfileEvent {
            category,
            name: name.into(),
            timestamp_us: start.duration_since(self.epoch).as_micros() as u64,
            duration_us: start.elapsed().as_micros() as u64,
            args,
        };
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event);
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<ProfileEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Serialize all recorded events as a JSON array
    pub fn export_json(&self) -> ForgeResult<String> {
        let events = self.events();
        serde_json::to_string_pretty(&events)
            .map_err(|e| PlanForgeError::Internal(format!("profile export failed: {}", e)))
    }
}

/// Timer that logs its elapsed time when dropped
#[derive(Debug)]
pub struct ScopedTimer {
    name: String,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(name: impl Into<String>) -> Self {
        ScopedTimer {
            name: name.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f32 {
        self.start.elapsed().as_secs_f64() as f32 * 1000.0
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        debug!("ScopedTimer '{}': {:.3} ms", self.name, self.elapsed_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_profiler_records_nothing() {
        let profiler = Profiler::new(false);
        let start = profiler.start();
        profiler.end_and_record(EventCategory::Node, "add_kernel_time", start, vec![]);
        assert!(profiler.events().is_empty());
    }

    #[test]
    fn test_enabled_profiler_records_events() {
        let profiler = Profiler::new(true);
        let start = profiler.start();
        std::thread::sleep(std::time::Duration::from_millis(2));
        profiler.end_and_record(
            EventCategory::Node,
            "add_kernel_time",
            start,
            vec![("op_name".to_string(), "Add".to_string())],
        );

        let events = profiler.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "add_kernel_time");
        assert_eq!(events[0].category, EventCategory::Node);
        assert!(events[0].duration_us >= 1000);
        assert_eq!(events[0].args[0].0, "op_name");
    }

    #[test]
    fn test_export_json() {
        let profiler = Profiler::new(true);
        let start = profiler.start();
        profiler.end_and_record(EventCategory::Session, "execute", start, vec![]);
        let json = profiler.export_json().unwrap();
        assert!(json.contains("\"execute\""));
        assert!(json.contains("Session"));
    }

    #[test]
    fn test_scoped_timer_elapsed() {
        let timer = ScopedTimer::new("scope");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
        assert_eq!(timer.name(), "scope");
    }
}
