//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};

/// How the context store resolves a write to a key that already holds a live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Overwrite unconditionally
    #[default]
    LastWriteWins,
    /// Overwrite only when the writer names the current version
    VersionCheck,
    /// Combine old and new values
    Merge,
}

impl ConflictStrategy {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last_write_wins",
            ConflictStrategy::VersionCheck => "version_check",
            ConflictStrategy::Merge => "merge",
        }
    }
}

/// Agent directory settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct DirectoryConfig {
    /// Agents silent for longer than this are reported stale.
    pub heartbeat_timeout_ms: DurationMs,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 60_000,
        }
    }
}

/// Message router settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct RouterConfig {
    /// Maximum queued messages per inbox; further sends are dead-lettered.
    pub inbox_capacity: usize,
    /// Oldest dead letters are dropped past this bound.
    pub dead_letter_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 10_000,
            dead_letter_capacity: 1_000,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct EventBusConfig {
    pub failure_log_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            failure_log_capacity: 100,
        }
    }
}

/// Context store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct ContextConfig {
    pub conflict_strategy: ConflictStrategy,
    /// Previous versions retained per key.
    pub max_history: usize,
    /// TTL applied to writes that do not name one.
    pub default_ttl_ms: Option<DurationMs>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            conflict_strategy: ConflictStrategy::LastWriteWins,
            max_history: 10,
            default_ttl_ms: None,
        }
    }
}

/// Automatic goal status changes driven by progress calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct ProgressPolicy {
    /// pending/planned goal moves to in_progress once any task has started
    pub auto_start: bool,
    /// goal moves to completed once every task has completed
    pub auto_complete: bool,
    /// in_progress goal moves to blocked while every unfinished task is blocked
    pub auto_block: bool,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self {
            auto_start: true,
            auto_complete: true,
            auto_block: false,
        }
    }
}

/// Goal orchestrator settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct GoalsConfig {
    pub progress_policy: ProgressPolicy,
}

/// Master configuration struct.
///
/// Every section has defaults, so an empty TOML document is a valid
/// configuration. Always call [`ConcordConfig::validate`] after building one
/// by hand; [`ConcordConfig::from_toml_str`] does so itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct ConcordConfig {
    pub directory: DirectoryConfig,
    pub router: RouterConfig,
    pub events: EventBusConfig,
    pub context: ContextConfig,
    pub goals: GoalsConfig,
}

impl ConcordConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(source: &str) -> ConcordResult<Self> {
        let config: ConcordConfig = toml::from_str(source).map_err(|e| {
            ConcordError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Heartbeat timeout as a chrono duration.
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        millis(self.directory.heartbeat_timeout_ms)
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(ConcordError::Config) if invalid.
    ///
    /// Validates:
    /// - directory.heartbeat_timeout_ms > 0
    /// - router capacities > 0
    /// - events.failure_log_capacity > 0
    /// - context.max_history > 0
    /// - context.default_ttl_ms, when set, > 0
    pub fn validate(&self) -> ConcordResult<()> {
        if self.directory.heartbeat_timeout_ms <= 0 {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "directory.heartbeat_timeout_ms".to_string(),
                value: self.directory.heartbeat_timeout_ms.to_string(),
                reason: "heartbeat_timeout_ms must be greater than 0".to_string(),
            }));
        }

        if self.router.inbox_capacity == 0 {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "router.inbox_capacity".to_string(),
                value: "0".to_string(),
                reason: "inbox_capacity must be greater than 0".to_string(),
            }));
        }

        if self.router.dead_letter_capacity == 0 {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "router.dead_letter_capacity".to_string(),
                value: "0".to_string(),
                reason: "dead_letter_capacity must be greater than 0".to_string(),
            }));
        }

        if self.events.failure_log_capacity == 0 {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "events.failure_log_capacity".to_string(),
                value: "0".to_string(),
                reason: "failure_log_capacity must be greater than 0".to_string(),
            }));
        }

        if self.context.max_history == 0 {
            return Err(ConcordError::Config(ConfigError::InvalidValue {
                field: "context.max_history".to_string(),
                value: "0".to_string(),
                reason: "max_history must be greater than 0".to_string(),
            }));
        }

        if let Some(ttl) = self.context.default_ttl_ms {
            if ttl <= 0 {
                return Err(ConcordError::Config(ConfigError::InvalidValue {
                    field: "context.default_ttl_ms".to_string(),
                    value: ttl.to_string(),
                    reason: "default_ttl_ms must be positive".to_string(),
                }));
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() -> ConcordResult<()> {
        let config = ConcordConfig::default();
        config.validate()?;
        assert_eq!(config.directory.heartbeat_timeout_ms, 60_000);
        assert_eq!(config.router.inbox_capacity, 10_000);
        assert_eq!(config.context.max_history, 10);
        assert_eq!(config.context.conflict_strategy, ConflictStrategy::LastWriteWins);
        assert!(config.goals.progress_policy.auto_start);
        assert!(config.goals.progress_policy.auto_complete);
        assert!(!config.goals.progress_policy.auto_block);
        Ok(())
    }

    #[test]
    fn test_empty_toml_uses_defaults() -> ConcordResult<()> {
        let config = ConcordConfig::from_toml_str("")?;
        assert_eq!(config, ConcordConfig::default());
        Ok(())
    }

    #[test]
    fn test_toml_overrides_sections() -> ConcordResult<()> {
        let config = ConcordConfig::from_toml_str(
            r#"
            [directory]
            heartbeat_timeout_ms = 5000

            [context]
            conflict_strategy = "version_check"
            max_history = 3
            default_ttl_ms = 250

            [goals.progress_policy]
            auto_block = true
            "#,
        )?;
        assert_eq!(config.directory.heartbeat_timeout_ms, 5000);
        assert_eq!(config.context.conflict_strategy, ConflictStrategy::VersionCheck);
        assert_eq!(config.context.max_history, 3);
        assert_eq!(config.context.default_ttl_ms, Some(250));
        assert!(config.goals.progress_policy.auto_block);
        assert!(config.goals.progress_policy.auto_start);
        assert_eq!(config.heartbeat_timeout().num_milliseconds(), 5000);
        Ok(())
    }

    #[test]
    fn test_toml_parse_failure_is_config_error() {
        let err = ConcordConfig::from_toml_str("[context]\nconflict_strategy = \"coin_flip\"")
            .unwrap_err();
        assert!(matches!(err, ConcordError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_heartbeat_timeout() {
        let mut config = ConcordConfig::default();
        config.directory.heartbeat_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        match err {
            ConcordError::Config(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "directory.heartbeat_timeout_ms");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_capacities() {
        let mut config = ConcordConfig::default();
        config.router.inbox_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = ConcordConfig::default();
        config.router.dead_letter_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = ConcordConfig::default();
        config.events.failure_log_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = ConcordConfig::default();
        config.context.max_history = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_default_ttl() {
        let mut config = ConcordConfig::default();
        config.context.default_ttl_ms = Some(0);
        assert!(config.validate().is_err());
        config.context.default_ttl_ms = Some(-5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_values_in_toml_fail_validation() {
        let err = ConcordConfig::from_toml_str("[router]\ninbox_capacity = 0").unwrap_err();
        assert!(matches!(
            err,
            ConcordError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_conflict_strategy_db_str_matches_serde() -> Result<(), serde_json::Error> {
        for strategy in [
            ConflictStrategy::LastWriteWins,
            ConflictStrategy::VersionCheck,
            ConflictStrategy::Merge,
        ] {
            let json = serde_json::to_string(&strategy)?;
            assert_eq!(json, format!("\"{}\"", strategy.as_db_str()));
        }
        Ok(())
    }
}
