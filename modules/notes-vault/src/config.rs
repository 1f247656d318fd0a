//! Vault configuration.
//!
//! Layers, later ones winning: built-in defaults, an optional YAML file, then
//! environment variables prefixed with `VAULT__` where `__` separates nesting
//! levels (`VAULT__RETENTION__RETENTION_DAYS=7`).

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vault_db::DbConfig;
use vault_security::DenialDisclosure;
use vault_security::audit::DEFAULT_AUDIT_CAPACITY;

use crate::infra::storage::migrations::StepSettings;
use crate::infra::storage::soft_delete::SoftDeleteLifecycle;

pub const ENV_PREFIX: &str = "VAULT__";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VaultConfig {
    pub database: DbConfig,
    pub retention: RetentionConfig,
    pub authorization: AuthorizationConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// How long a soft-deleted row stays restorable.
    pub retention_days: u32,
    /// Period of the background purge job.
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl RetentionConfig {
    #[must_use]
    pub fn retention(&self) -> Duration {
        DAY * self.retention_days
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorizationConfig {
    pub disclosure: DenialDisclosure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub channel_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Owner assigned to legacy rows that cannot be attributed otherwise.
    /// Falls back to the signed-in user; with neither, such rows are deleted
    /// when ownership becomes mandatory.
    pub bootstrap_owner: Option<String>,
}

impl VaultConfig {
    /// Load defaults, then `file` if given, then the environment.
    ///
    /// # Errors
    /// [`ConfigError::Load`] for unreadable or malformed sources,
    /// [`ConfigError::Invalid`] when values fail validation.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            figment = figment.merge(Yaml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate from a prepared figment.
    ///
    /// # Errors
    /// Same as [`Self::load`].
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let cfg: Self = figment.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention.retention_days == 0 {
            return Err(ConfigError::Invalid("retention.retention_days must be at least 1".to_owned()));
        }
        if self.retention.purge_interval.is_zero() {
            return Err(ConfigError::Invalid("retention.purge_interval must be positive".to_owned()));
        }
        if self.audit.channel_capacity == 0 {
            return Err(ConfigError::Invalid("audit.channel_capacity must be at least 1".to_owned()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be at least 1".to_owned()));
        }
        if self
            .migration
            .bootstrap_owner
            .as_deref()
            .is_some_and(|o| o.trim().is_empty())
        {
            return Err(ConfigError::Invalid("migration.bootstrap_owner must not be blank".to_owned()));
        }
        Ok(())
    }

    #[must_use]
    pub fn lifecycle(&self) -> SoftDeleteLifecycle {
        SoftDeleteLifecycle::new(self.retention.retention())
    }

    #[must_use]
    pub fn step_settings(&self) -> StepSettings {
        StepSettings {
            retention: self.retention.retention(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let cfg = VaultConfig::default();
        assert_eq!(cfg.retention.retention(), Duration::from_secs(30 * 24 * 60 * 60));
        assert_eq!(cfg.authorization.disclosure, DenialDisclosure::Forbidden);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn yaml_and_env_layers_override_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "vault.yaml",
                r"
database:
  dsn: sqlite://data/vault.db
retention:
  retention_days: 7
  purge_interval: 15m
authorization:
  disclosure: not_found
",
            )?;
            jail.set_env("VAULT__RETENTION__RETENTION_DAYS", "14");
            jail.set_env("VAULT__MIGRATION__BOOTSTRAP_OWNER", "u-legacy");

            let cfg = VaultConfig::load(Some(Path::new("vault.yaml"))).map_err(|e| e.to_string())?;
            assert_eq!(cfg.database.dsn, "sqlite://data/vault.db");
            assert_eq!(cfg.retention.retention_days, 14);
            assert_eq!(cfg.retention.purge_interval, Duration::from_secs(15 * 60));
            assert_eq!(cfg.authorization.disclosure, DenialDisclosure::NotFound);
            assert_eq!(cfg.migration.bootstrap_owner.as_deref(), Some("u-legacy"));
            Ok(())
        });
    }

    #[test]
    fn zero_retention_is_rejected() {
        let figment = Figment::from(Serialized::defaults(VaultConfig::default()))
            .merge(Serialized::default("retention.retention_days", 0));
        assert!(matches!(VaultConfig::extract(figment), Err(ConfigError::Invalid(_))));
    }
}
