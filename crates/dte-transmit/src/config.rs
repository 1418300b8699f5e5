//! # Transmission Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DTE_UPSTREAM_URL=https://reception.example/api                     │
//! │     DTE_BRANCH_ID=branch-01                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/dte/dte.toml (Linux)                                     │
//! │     ~/Library/Application Support/com.dte.issuer/dte.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [issuer]
//! nit = "06142803901121"
//! nrc = "1234567"
//! name = "Comercial Ejemplo S.A. de C.V."
//! branch_id = "branch-01"
//! establishment_code = "M001"
//! pos_code = "P001"
//!
//! [database]
//! path = "/var/lib/dte/dte.db"
//! max_connections = 5
//!
//! [upstream]
//! base_url = "https://reception.example/api"
//! timeout_secs = 8
//!
//! [breaker]
//! failure_threshold = 5
//! reset_timeout_secs = 60
//!
//! [contingency]
//! poll_interval_secs = 30
//! batch_size = 100
//! max_attempts = 10
//! stranded_after_secs = 300
//!
//! [allocation]
//! include_year = false
//! ```

use std::path::PathBuf;
use std::time::Duration;

use dte_core::Issuer;
use dte_db::{DbConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{TransmitError, TransmitResult};

/// Largest batch the reception service accepts.
pub const MAX_BATCH_SIZE: usize = 100;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `dte.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for the lock (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl DatabaseSettings {
    /// Builds the pool configuration.
    pub fn db_config(&self) -> TransmitResult<DbConfig> {
        let path = self
            .path
            .clone()
            .or_else(default_database_path)
            .ok_or_else(|| TransmitError::InvalidConfig("No database path available".into()))?;

        Ok(DbConfig::new(path)
            .max_connections(self.max_connections)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms)))
    }
}

fn default_database_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("dte.db"))
}

// =============================================================================
// Upstream Settings
// =============================================================================

/// Tax authority reception endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the single-document reception endpoint.
    #[serde(default = "default_document_path")]
    pub document_path: String,

    /// Path of the batch reception endpoint.
    #[serde(default = "default_batch_path")]
    pub batch_path: String,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_document_path() -> String {
    "/reception/document".to_string()
}

fn default_batch_path() -> String {
    "/reception/batch".to_string()
}

fn default_timeout() -> u64 {
    8
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        UpstreamSettings {
            base_url: default_base_url(),
            document_path: default_document_path(),
            batch_path: default_batch_path(),
            token: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl UpstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn document_url(&self) -> TransmitResult<Url> {
        Ok(Url::parse(&self.base_url)?.join(&self.document_path)?)
    }

    pub fn batch_url(&self) -> TransmitResult<Url> {
        Ok(Url::parse(&self.base_url)?.join(&self.batch_path)?)
    }
}

// =============================================================================
// Breaker Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is let through (seconds).
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> u64 {
    60
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerSettings {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout(),
        }
    }
}

impl BreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

// =============================================================================
// Contingency Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContingencySettings {
    /// Interval between queue sweeps (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Documents per batch submission.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failed submissions after which a document is skipped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Age after which a pending document that never reached the queue
    /// (interrupted issuance) is moved to contingency (seconds). Must exceed
    /// the upstream timeout.
    #[serde(default = "default_stranded_after")]
    pub stranded_after_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_max_attempts() -> u32 {
    10
}

fn default_stranded_after() -> u64 {
    300
}

impl Default for ContingencySettings {
    fn default() -> Self {
        ContingencySettings {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            stranded_after_secs: default_stranded_after(),
        }
    }
}

impl ContingencySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stranded_after(&self) -> Duration {
        Duration::from_secs(self.stranded_after_secs)
    }
}

// =============================================================================
// Allocation Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSettings {
    /// Embed the four-digit year in the control number tail.
    #[serde(default)]
    pub include_year: bool,

    #[serde(default = "default_retry_initial")]
    pub retry_initial_ms: u64,

    #[serde(default = "default_retry_max")]
    pub retry_max_ms: u64,

    /// Give up retrying a busy issuance after this long (seconds).
    #[serde(default = "default_retry_elapsed")]
    pub retry_max_elapsed_secs: u64,
}

fn default_retry_initial() -> u64 {
    20
}

fn default_retry_max() -> u64 {
    500
}

fn default_retry_elapsed() -> u64 {
    10
}

impl Default for AllocationSettings {
    fn default() -> Self {
        AllocationSettings {
            include_year: false,
            retry_initial_ms: default_retry_initial(),
            retry_max_ms: default_retry_max(),
            retry_max_elapsed_secs: default_retry_elapsed(),
        }
    }
}

impl AllocationSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(self.retry_initial_ms),
            max_interval: Duration::from_millis(self.retry_max_ms),
            max_elapsed: Duration::from_secs(self.retry_max_elapsed_secs),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete configuration of the issuance engine and its worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DteConfig {
    /// Issuer and branch this instance issues for.
    #[serde(default)]
    pub issuer: Issuer,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub upstream: UpstreamSettings,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub contingency: ContingencySettings,

    #[serde(default)]
    pub allocation: AllocationSettings,
}

impl DteConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (dte.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> TransmitResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading DTE config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> TransmitResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| TransmitError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TransmitError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| TransmitError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "DTE config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> TransmitResult<()> {
        if self.issuer.branch_id.trim().is_empty() {
            return Err(TransmitError::InvalidConfig("issuer.branch_id must be set".into()));
        }

        let url = Url::parse(&self.upstream.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransmitError::InvalidUrl(format!(
                "Upstream URL must start with http:// or https://, got: {}",
                self.upstream.base_url
            )));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(TransmitError::InvalidConfig(
                "upstream.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(TransmitError::InvalidConfig(
                "breaker.failure_threshold must be greater than 0".into(),
            ));
        }

        if self.contingency.batch_size == 0 || self.contingency.batch_size > MAX_BATCH_SIZE {
            return Err(TransmitError::InvalidConfig(format!(
                "contingency.batch_size must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }

        if self.contingency.max_attempts == 0 {
            return Err(TransmitError::InvalidConfig(
                "contingency.max_attempts must be greater than 0".into(),
            ));
        }

        if self.contingency.poll_interval_secs == 0 {
            return Err(TransmitError::InvalidConfig(
                "contingency.poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.contingency.stranded_after_secs <= self.upstream.timeout_secs {
            return Err(TransmitError::InvalidConfig(
                "contingency.stranded_after_secs must exceed upstream.timeout_secs".into(),
            ));
        }

        Ok(())
    }

    /// Applies `DTE_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(branch) = lookup("DTE_BRANCH_ID") {
            debug!(branch_id = %branch, "Overriding branch from environment");
            self.issuer.branch_id = branch;
        }

        if let Some(path) = lookup("DTE_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("DTE_UPSTREAM_URL") {
            debug!(url = %url, "Overriding upstream URL from environment");
            self.upstream.base_url = url;
        }

        if let Some(token) = lookup("DTE_UPSTREAM_TOKEN") {
            self.upstream.token = Some(token);
        }

        override_number(&lookup, "DTE_UPSTREAM_TIMEOUT_SECS", &mut self.upstream.timeout_secs);
        override_number(&lookup, "DTE_BREAKER_THRESHOLD", &mut self.breaker.failure_threshold);
        override_number(&lookup, "DTE_BREAKER_RESET_SECS", &mut self.breaker.reset_timeout_secs);
        override_number(&lookup, "DTE_CONTINGENCY_INTERVAL_SECS", &mut self.contingency.poll_interval_secs);
        override_number(&lookup, "DTE_CONTINGENCY_BATCH_SIZE", &mut self.contingency.batch_size);
        override_number(&lookup, "DTE_CONTINGENCY_MAX_ATTEMPTS", &mut self.contingency.max_attempts);
        override_number(
            &lookup,
            "DTE_CONTINGENCY_STRANDED_AFTER_SECS",
            &mut self.contingency.stranded_after_secs,
        );

        if let Some(flag) = lookup("DTE_INCLUDE_YEAR") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.allocation.include_year = true,
                "0" | "false" | "no" => self.allocation.include_year = false,
                _ => warn!(value = %flag, "Unknown DTE_INCLUDE_YEAR value in environment"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("dte.toml"))
    }

    pub fn branch_id(&self) -> &str {
        &self.issuer.branch_id
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring non-numeric environment override"),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "dte", "issuer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> DteConfig {
        let mut config = DteConfig::default();
        config.issuer.branch_id = "branch-01".into();
        config
    }

    #[test]
    fn test_default_values() {
        let config = DteConfig::default();
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.contingency.batch_size, 100);
        assert!(!config.allocation.include_year);
        // The default issuer has no branch yet
        assert!(config.validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = valid();
        config.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.contingency.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.contingency.batch_size = MAX_BATCH_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.contingency.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.contingency.stranded_after_secs = config.upstream.timeout_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_non_http_url() {
        let mut config = valid();
        config.upstream.base_url = "ftp://reception.example".into();
        assert!(matches!(config.validate(), Err(TransmitError::InvalidUrl(_))));

        config.upstream.base_url = "not a url".into();
        assert!(matches!(config.validate(), Err(TransmitError::InvalidUrl(_))));

        config.upstream.base_url = "https://reception.example/api/".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("DTE_BRANCH_ID", "branch-09"),
            ("DTE_UPSTREAM_URL", "https://upstream.example"),
            ("DTE_BREAKER_THRESHOLD", "3"),
            ("DTE_CONTINGENCY_BATCH_SIZE", "not-a-number"),
            ("DTE_INCLUDE_YEAR", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = DteConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.branch_id(), "branch-09");
        assert_eq!(config.upstream.base_url, "https://upstream.example");
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.contingency.batch_size, MAX_BATCH_SIZE);
        assert!(config.allocation.include_year);
    }

    #[test]
    fn test_endpoint_urls() {
        let mut upstream = UpstreamSettings::default();
        upstream.base_url = "https://reception.example".into();
        assert_eq!(
            upstream.document_url().unwrap().as_str(),
            "https://reception.example/reception/document"
        );
        assert_eq!(
            upstream.batch_url().unwrap().as_str(),
            "https://reception.example/reception/batch"
        );
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
            [issuer]
            nit = "06142803901121"
            nrc = "1234567"
            name = "Comercial Ejemplo"
            branch_id = "branch-01"
            establishment_code = "M001"

            [breaker]
            failure_threshold = 3

            [allocation]
            include_year = true
        "#;
        let config: DteConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.issuer.establishment_code.as_deref(), Some("M001"));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.reset_timeout_secs, 60);
        assert!(config.allocation.include_year);
        assert!(config.validate().is_ok());

        let saved = toml::to_string_pretty(&config).unwrap();
        assert!(saved.contains("[upstream]"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dte.toml");

        let mut config = valid();
        config.contingency.max_attempts = 4;
        config.save(Some(path.clone())).unwrap();

        let loaded = DteConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.contingency.max_attempts, 4);
    }
}
