//! Worker configuration

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

use core_kernel::Quantity;
use domain_inventory::{ReconcileMode, ReconcileOptions};
use infra_db::DatabaseConfig;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Worker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Database URL
    pub database_url: String,
    /// Log level, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Pool size
    pub max_connections: u32,
    /// Seconds between reconciliation sweeps
    pub reconcile_interval_secs: u64,
    /// Comparison tolerance as a decimal string
    pub reconcile_tolerance: String,
    /// Mode of the scheduled sweep
    pub reconcile_mode: ReconcileMode,
    /// In strict mode, repair drift before deciding whether the pass fails
    pub strict_repair: bool,
    /// Rows one pass may rewrite; 0 means uncapped
    pub max_repair_rows: usize,
    /// Mismatches kept per report
    pub max_reported_mismatches: usize,
    /// Seconds between reservation expiry scans
    pub reservation_expiry_interval_secs: u64,
    /// Reservations expired per scan
    pub reservation_expiry_batch: usize,
    /// Age after which an in-progress idempotency key counts as stuck
    pub idempotency_ttl_secs: u64,
    /// Seconds between idempotency cleanup runs
    pub idempotency_cleanup_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/inventory".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            max_connections: 10,
            reconcile_interval_secs: 300,
            reconcile_tolerance: "0.000001".to_string(),
            reconcile_mode: ReconcileMode::Report,
            strict_repair: false,
            max_repair_rows: 1_000,
            max_reported_mismatches: 50,
            reservation_expiry_interval_secs: 60,
            reservation_expiry_batch: 500,
            idempotency_ttl_secs: 900,
            idempotency_cleanup_interval_secs: 300,
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from `WORKER_*` environment variables
    ///
    /// A plain `DATABASE_URL` is used when `WORKER_DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_default("database_url", url)?;
        }
        Self::from_builder(builder.add_source(Environment::with_prefix("WORKER")))
    }

    /// Builds and validates a configuration from prepared sources
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.tolerance()?;
        Ok(config)
    }

    /// The reconcile tolerance as a quantity
    pub fn tolerance(&self) -> Result<Quantity, ConfigError> {
        let tolerance = Quantity::parse(&self.reconcile_tolerance).map_err(|err| {
            ConfigError::Message(format!(
                "invalid reconcile_tolerance '{}': {}",
                self.reconcile_tolerance, err
            ))
        })?;
        if tolerance.is_negative() {
            return Err(ConfigError::Message("reconcile_tolerance must not be negative".to_string()));
        }
        Ok(tolerance)
    }

    /// Options for a reconciliation pass, optionally overriding the mode
    pub fn reconcile_options(&self, mode: Option<ReconcileMode>, actor: &str) -> Result<ReconcileOptions, ConfigError> {
        Ok(ReconcileOptions {
            mode: mode.unwrap_or(self.reconcile_mode),
            tolerance: self.tolerance()?,
            max_repair_rows: (self.max_repair_rows > 0).then_some(self.max_repair_rows),
            max_reported: self.max_reported_mismatches,
            repair_before_strict: self.strict_repair,
            actor: actor.to_string(),
        })
    }

    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig::new(&self.database_url)
            .max_connections(self.max_connections)
            .application_name("inventory-worker")
            .run_migrations(true)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn reservation_expiry_interval(&self) -> Duration {
        Duration::from_secs(self.reservation_expiry_interval_secs.max(1))
    }

    pub fn idempotency_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.idempotency_cleanup_interval_secs.max(1))
    }

    /// Stuck-key TTL, capped at ten years
    pub fn idempotency_ttl(&self) -> chrono::Duration {
        let cap = chrono::Duration::days(3_650);
        i64::try_from(self.idempotency_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .map_or(cap, |ttl| ttl.min(cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_when_nothing_is_set() {
        let config = WorkerConfig::from_builder(Config::builder()).unwrap();

        assert_eq!(config.database_url, "postgres://localhost/inventory");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.reconcile_mode, ReconcileMode::Report);
        assert_eq!(config.reconcile_interval(), Duration::from_secs(300));
        assert_eq!(config.idempotency_ttl(), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_overrides_are_deserialized() {
        let builder = Config::builder()
            .set_override("reconcile_mode", "repair")
            .unwrap()
            .set_override("log_format", "json")
            .unwrap()
            .set_override("max_repair_rows", 25_i64)
            .unwrap()
            .set_override("reconcile_tolerance", "0.01")
            .unwrap();

        let config = WorkerConfig::from_builder(builder).unwrap();
        let options = config.reconcile_options(None, "worker").unwrap();

        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(options.mode, ReconcileMode::Repair);
        assert_eq!(options.max_repair_rows, Some(25));
        assert_eq!(options.tolerance, Quantity::parse("0.01").unwrap());
        assert_eq!(options.actor, "worker");
    }

    #[test]
    fn test_zero_repair_cap_means_uncapped() {
        let config = WorkerConfig {
            max_repair_rows: 0,
            ..WorkerConfig::default()
        };

        let options = config.reconcile_options(Some(ReconcileMode::Strict), "cli").unwrap();
        assert_eq!(options.max_repair_rows, None);
        assert_eq!(options.mode, ReconcileMode::Strict);
    }

    #[test]
    fn test_strict_repair_reaches_reconcile_options() {
        assert!(!WorkerConfig::default().reconcile_options(None, "worker").unwrap().repair_before_strict);

        let builder = Config::builder()
            .set_override("reconcile_mode", "strict")
            .unwrap()
            .set_override("strict_repair", true)
            .unwrap();
        let options = WorkerConfig::from_builder(builder)
            .unwrap()
            .reconcile_options(None, "worker")
            .unwrap();

        assert_eq!(options.mode, ReconcileMode::Strict);
        assert!(options.repair_before_strict);
    }

    #[test]
    fn test_invalid_tolerance_is_rejected() {
        let builder = Config::builder().set_override("reconcile_tolerance", "lots").unwrap();
        assert!(WorkerConfig::from_builder(builder).is_err());

        let negative = WorkerConfig {
            reconcile_tolerance: "-1".to_string(),
            ..WorkerConfig::default()
        };
        assert!(negative.tolerance().is_err());
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let builder = Config::builder().set_override("reconcile_mode", "sometimes").unwrap();
        assert!(WorkerConfig::from_builder(builder).is_err());
    }

    #[test]
    fn test_database_config_carries_pool_size() {
        let config = WorkerConfig {
            max_connections: 3,
            ..WorkerConfig::default()
        };
        let database = config.database();

        assert_eq!(database.max_connections, 3);
        assert_eq!(database.application_name.as_deref(), Some("inventory-worker"));
        assert!(database.run_migrations);
    }
}
