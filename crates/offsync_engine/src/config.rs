//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::{ConflictPolicy, ConflictResolver, FieldMapping, MappingTable};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Per entity type scheduling knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeConfig {
    /// Entity type name.
    pub name: String,
    /// Lower numbers sync first.
    #[serde(default)]
    pub priority: i32,
    /// Age after which the type is pulled even without local changes.
    #[serde(rename = "staleness_threshold_ms", with = "duration_ms")]
    pub staleness_threshold: Duration,
    /// Overrides the default conflict policy for this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_policy: Option<ConflictPolicy>,
}

impl EntityTypeConfig {
    /// Creates an entity type config.
    pub fn new(name: impl Into<String>, priority: i32, staleness_threshold: Duration) -> Self {
        Self {
            name: name.into(),
            priority,
            staleness_threshold,
            conflict_policy: None,
        }
    }

    /// Sets the conflict policy for this type.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = Some(policy);
        self
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum records per pull page.
    pub batch_size: u32,
    /// Timeout applied to each individual network call.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Minimum time between two non-forced runs.
    #[serde(rename = "min_sync_interval_ms", with = "duration_ms")]
    pub min_sync_interval: Duration,
    /// Interval of the periodic timer; `None` disables it.
    #[serde(rename = "periodic_sync_interval_ms", with = "option_duration_ms")]
    pub periodic_sync_interval: Option<Duration>,
    /// Settle delay after a connectivity change.
    #[serde(rename = "reconnect_debounce_ms", with = "duration_ms")]
    pub reconnect_debounce: Duration,
    /// Maximum queue items pushed concurrently.
    pub queue_concurrency: usize,
    /// Attempts after which a queue item is parked.
    pub max_retry: u32,
    /// Backoff curve between attempts of a failed item.
    pub retry: RetryConfig,
    /// Age after which completed queue items are garbage collected.
    #[serde(rename = "completed_retention_ms", with = "duration_ms")]
    pub completed_retention: Duration,
    /// Conflict policy for types without an override.
    pub default_conflict_policy: ConflictPolicy,
    /// Synchronized entity types.
    pub entity_types: Vec<EntityTypeConfig>,
    /// Wire/local field mappings.
    pub field_mappings: Vec<FieldMapping>,
}

impl SyncConfig {
    /// Creates a configuration with defaults and no entity types.
    pub fn new() -> Self {
        Self {
            batch_size: 100,
            timeout: Duration::from_secs(30),
            min_sync_interval: Duration::from_secs(30),
            periodic_sync_interval: Some(Duration::from_secs(15 * 60)),
            reconnect_debounce: Duration::from_secs(2),
            queue_concurrency: 3,
            max_retry: 5,
            retry: RetryConfig::default(),
            completed_retention: Duration::from_secs(24 * 60 * 60),
            default_conflict_policy: ConflictPolicy::LastWriteWins,
            entity_types: Vec::new(),
            field_mappings: Vec::new(),
        }
    }

    /// Sets the pull page size.
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the throttle interval.
    pub fn with_min_sync_interval(mut self, interval: Duration) -> Self {
        self.min_sync_interval = interval;
        self
    }

    /// Sets the periodic timer interval.
    pub fn with_periodic_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.periodic_sync_interval = interval;
        self
    }

    /// Sets the reconnect settle delay.
    pub fn with_reconnect_debounce(mut self, delay: Duration) -> Self {
        self.reconnect_debounce = delay;
        self
    }

    /// Sets the queue concurrency window.
    pub fn with_queue_concurrency(mut self, concurrency: usize) -> Self {
        self.queue_concurrency = concurrency;
        self
    }

    /// Sets the retry bound.
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets how long completed queue items are kept.
    pub fn with_completed_retention(mut self, retention: Duration) -> Self {
        self.completed_retention = retention;
        self
    }

    /// Sets the default conflict policy.
    pub fn with_default_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.default_conflict_policy = policy;
        self
    }

    /// Adds an entity type.
    pub fn with_entity_type(mut self, entity_type: EntityTypeConfig) -> Self {
        self.entity_types.push(entity_type);
        self
    }

    /// Adds a field mapping.
    pub fn with_field_mapping(mut self, mapping: FieldMapping) -> Self {
        self.field_mappings.push(mapping);
        self
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.queue_concurrency == 0 {
            return Err(SyncError::InvalidConfig("queue_concurrency must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.max_retry == 0 {
            return Err(SyncError::InvalidConfig("max_retry must be > 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(SyncError::InvalidConfig("timeout must be > 0".into()));
        }
        if self.periodic_sync_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(SyncError::InvalidConfig(
                "periodic_sync_interval must be > 0 when set".into(),
            ));
        }

        let mut seen = HashSet::new();
        for entity_type in &self.entity_types {
            if entity_type.name.is_empty() {
                return Err(SyncError::InvalidConfig("entity type name is empty".into()));
            }
            if !seen.insert(entity_type.name.as_str()) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate entity type '{}'",
                    entity_type.name
                )));
            }
        }

        Ok(())
    }

    /// Looks up an entity type.
    pub fn entity_type(&self, name: &str) -> Option<&EntityTypeConfig> {
        self.entity_types.iter().find(|t| t.name == name)
    }

    /// Returns entity types ordered by ascending priority, then name.
    pub fn sorted_entity_types(&self) -> Vec<&EntityTypeConfig> {
        let mut types: Vec<_> = self.entity_types.iter().collect();
        types.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        types
    }

    /// Builds the conflict resolver described by this configuration.
    pub fn resolver(&self) -> ConflictResolver {
        self.entity_types
            .iter()
            .filter_map(|t| t.conflict_policy.map(|p| (t.name.clone(), p)))
            .fold(
                ConflictResolver::new().with_default(self.default_conflict_policy),
                |resolver, (name, policy)| resolver.with_override(name, policy),
            )
    }

    /// Compiles the field mappings.
    pub fn mapping_table(&self) -> SyncResult<MappingTable> {
        Ok(MappingTable::from_mappings(&self.field_mappings)?)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates the default backoff curve.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a curve without any delay between attempts.
    pub fn no_backoff() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay after `attempt` failed attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% on top.
            let jitter = delay_secs * rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::duration_ms::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SyncConfig {
        SyncConfig::new()
            .with_entity_type(EntityTypeConfig::new("artists", 5, Duration::from_secs(3600)))
            .with_entity_type(
                EntityTypeConfig::new("balance", 0, Duration::from_secs(60))
                    .with_conflict_policy(ConflictPolicy::RemoteAuthoritative),
            )
            .with_entity_type(EntityTypeConfig::new("tickets", 1, Duration::from_secs(300)))
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_batch_size(50)
            .with_timeout(Duration::from_secs(60))
            .with_queue_concurrency(2)
            .with_max_retry(7);

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.queue_concurrency, 2);
        assert_eq!(config.max_retry, 7);
        assert_eq!(SyncConfig::default().queue_concurrency, 3);
    }

    #[test]
    fn entity_types_sorted_by_priority() {
        let config = config();
        let names: Vec<_> = config.sorted_entity_types().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["balance", "tickets", "artists"]);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(config().validate().is_ok());
        assert!(config().with_queue_concurrency(0).validate().is_err());
        assert!(config().with_batch_size(0).validate().is_err());
        assert!(config().with_max_retry(0).validate().is_err());

        let dup = config().with_entity_type(EntityTypeConfig::new("artists", 9, Duration::ZERO));
        let err = dup.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate entity type 'artists'"));
    }

    #[test]
    fn resolver_uses_overrides() {
        let resolver = config().resolver();
        assert_eq!(resolver.policy_for("balance"), ConflictPolicy::RemoteAuthoritative);
        assert_eq!(resolver.policy_for("artists"), ConflictPolicy::LastWriteWins);
    }

    #[test]
    fn deserializes_from_json_with_millis() {
        let config: SyncConfig = serde_json::from_value(json!({
            "batch_size": 25,
            "min_sync_interval_ms": 10000,
            "periodic_sync_interval_ms": null,
            "entity_types": [
                {"name": "balance", "priority": 0, "staleness_threshold_ms": 60000,
                 "conflict_policy": "remote_authoritative"}
            ]
        }))
        .unwrap();

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.min_sync_interval, Duration::from_secs(10));
        assert_eq!(config.periodic_sync_interval, None);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(
            config.entity_type("balance").unwrap().conflict_policy,
            Some(ConflictPolicy::RemoteAuthoritative)
        );
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(RetryConfig::no_backoff().delay_for_attempt(3), Duration::ZERO);
    }
}
