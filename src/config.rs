use crate::logic::{DiffOptions, ResolverConfig};
use crate::model::SyncStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub diff: DiffSettings,
    pub sync: SyncSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffSettings {
    pub detect_renames: bool,
    /// Minimum similarity (0.0 to 1.0) for a removed/added pair to count as a rename
    pub rename_similarity_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub shards: usize,
    pub orphan_timeout_secs: u64,
    pub orphan_queue_capacity: usize,
    pub sweep_interval_ms: u64,
    pub default_strategy: SyncStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory of the file-backed version log
    pub path: String,
}

impl Default for DiffSettings {
    fn default() -> Self {
        Self {
            detect_renames: true,
            rename_similarity_threshold: 0.80,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            shards: 16,
            orphan_timeout_secs: 300,
            orphan_queue_capacity: 10_000,
            sweep_interval_ms: 1000,
            default_strategy: SyncStrategy::default(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "schemasync-history".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional `schemasync` config file
    /// and `SCHEMASYNC_` environment variables, in that order
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&EngineConfig::default())?);

        config = config.add_source(config::File::with_name("schemasync").required(false));

        // e.g. SCHEMASYNC_SYNC_SHARDS=32
        config = config.add_source(
            config::Environment::with_prefix("SCHEMASYNC")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let engine_config: EngineConfig = config.try_deserialize()?;

        Ok(engine_config)
    }

    pub fn diff_options(&self) -> DiffOptions {
        let mut options = DiffOptions::with_threshold(self.diff.rename_similarity_threshold);
        options.detect_renames = self.diff.detect_renames;
        options
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            shards: self.sync.shards.max(1),
            orphan_timeout: Duration::from_secs(self.sync.orphan_timeout_secs),
            orphan_capacity: self.sync.orphan_queue_capacity,
            default_strategy: self.sync.default_strategy.clone(),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sync.sweep_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_onto_engine_options() {
        let config = EngineConfig::default();
        let options = config.diff_options();
        assert!(options.detect_renames);
        assert_eq!(options.rename_threshold, 800);

        let resolver = config.resolver_config();
        assert_eq!(resolver.shards, 16);
        assert_eq!(resolver.orphan_timeout, Duration::from_secs(300));
        assert_eq!(resolver.orphan_capacity, 10_000);
    }

    #[test]
    fn test_load_without_file_or_environment_uses_defaults() {
        let config = EngineConfig::load().unwrap();
        assert_eq!(config.diff.rename_similarity_threshold, 0.80);
        assert_eq!(config.store.path, "schemasync-history");
    }
}
