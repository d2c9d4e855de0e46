//! Local store configuration.

/// Entity types that are bookkeeping tables themselves and never captured.
pub const ALWAYS_EXCLUDED: [&str; 2] = ["transaction_log", "audit_log"];

/// Configuration for a [`crate::LocalStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Sync the journal to disk on every commit.
    pub sync_on_commit: bool,
    /// Extra entity types written locally but never captured for sync.
    pub excluded_entity_types: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            excluded_entity_types: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether each commit is synced to disk.
    #[must_use]
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Excludes an additional entity type from capture.
    #[must_use]
    pub fn exclude_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.excluded_entity_types.push(entity_type.into());
        self
    }

    /// Returns true if the entity type is never captured.
    pub fn is_excluded(&self, entity_type: &str) -> bool {
        ALWAYS_EXCLUDED.contains(&entity_type)
            || self.excluded_entity_types.iter().any(|t| t == entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_tables_always_excluded() {
        let config = StoreConfig::new().exclude_entity_type("session");
        assert!(config.is_excluded("transaction_log"));
        assert!(config.is_excluded("audit_log"));
        assert!(config.is_excluded("session"));
        assert!(!config.is_excluded("product"));
        assert!(config.sync_on_commit);
    }
}
