//! Configuration for one inference session

/// Behavior toggles shared by every run of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hand ownership of fetched intermediate tensors to the caller.
    /// Skips the defensive copy at the window boundary and advances the
    /// resume cursor one extra node past a suspension point.
    pub transfer_intermediate_ownership: bool,

    /// Skip nodes that cannot influence the requested fetches
    pub only_execute_path_to_fetches: bool,

    /// Record produced-value sizes and publish memory patterns keyed by
    /// feed shapes
    pub enable_memory_patterns: bool,

    /// Record node and session timing events
    pub enable_profiling: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            transfer_intermediate_ownership: false,
            only_execute_path_to_fetches: false,
            enable_memory_patterns: false,
            enable_profiling: false,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transfer_intermediate_ownership(mut self, transfer: bool) -> Self {
        self.transfer_intermediate_ownership = transfer;
        self
    }

    pub fn with_path_pruning(mut self, prune: bool) -> Self {
        self.only_execute_path_to_fetches = prune;
        self
    }

    pub fn with_memory_patterns(mut self, enable: bool) -> Self {
        self.enable_memory_patterns = enable;
        self
    }

    pub fn with_profiling(mut self, enable: bool) -> Self {
        self.enable_profiling = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_conservative() {
        let config = SessionConfig::default();
        assert!(!config.transfer_intermediate_ownership);
        assert!(!config.only_execute_path_to_fetches);
        assert!(!config.enable_memory_patterns);
        assert!(!config.enable_profiling);
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .with_transfer_intermediate_ownership(true)
            .with_path_pruning(true)
            .with_memory_patterns(true)
            .with_profiling(true);
        assert!(config.transfer_intermediate_ownership);
        assert!(config.only_execute_path_to_fetches);
        assert!(config.enable_memory_patterns);
        assert!(config.enable_profiling);
    }
}
