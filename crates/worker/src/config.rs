//! Worker configuration loaded from environment variables.

use std::str::FromStr;

use chrono::Duration;
use progress::IdempotencyMode;

/// Upper bound for any configured period, in seconds (ten years).
pub const MAX_PERIOD_SECS: i64 = 10 * 365 * 86_400;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL URL; in-memory stores when unset
/// - `DB_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `IDEMPOTENCY_MODE`: `atomic` or `check-then-record` (default: `atomic`)
/// - `CLAIM_LEASE_SECS`: ledger claim lease (default: `300`)
/// - `SAGA_PENDING_TIMEOUT_SECS`: age at which a waiting saga is failed (default: `86400`)
/// - `PARKED_DECISION_TTL_SECS`: lifetime of a parked decision (default: `3600`)
/// - `RECONCILE_INTERVAL_SECS`: reconciliation period (default: `60`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub idempotency_mode: IdempotencyMode,
    pub claim_lease_secs: i64,
    pub saga_pending_timeout_secs: i64,
    pub parked_decision_ttl_secs: i64,
    pub reconcile_interval_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// Unparseable values fall back to their defaults, and so do periods
    /// outside `1..=MAX_PERIOD_SECS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            db_max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS")
                .unwrap_or(defaults.db_max_connections),
            idempotency_mode: lookup("IDEMPOTENCY_MODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.idempotency_mode),
            claim_lease_secs: parse_period(&lookup, "CLAIM_LEASE_SECS")
                .unwrap_or(defaults.claim_lease_secs),
            saga_pending_timeout_secs: parse_period(&lookup, "SAGA_PENDING_TIMEOUT_SECS")
                .unwrap_or(defaults.saga_pending_timeout_secs),
            parked_decision_ttl_secs: parse_period(&lookup, "PARKED_DECISION_TTL_SECS")
                .unwrap_or(defaults.parked_decision_ttl_secs),
            reconcile_interval_secs: parse_var(&lookup, "RECONCILE_INTERVAL_SECS")
                .unwrap_or(defaults.reconcile_interval_secs),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn claim_lease(&self) -> Duration {
        period(self.claim_lease_secs)
    }

    pub fn saga_pending_timeout(&self) -> Duration {
        period(self.saga_pending_timeout_secs)
    }

    pub fn parked_decision_ttl(&self) -> Duration {
        period(self.parked_decision_ttl_secs)
    }
}

fn period(secs: i64) -> Duration {
    Duration::seconds(secs.clamp(1, MAX_PERIOD_SECS))
}

fn parse_period(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<i64> {
    parse_var(lookup, key).filter(|secs| (1..=MAX_PERIOD_SECS).contains(secs))
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            db_max_connections: 5,
            idempotency_mode: IdempotencyMode::AtomicClaim,
            claim_lease_secs: 300,
            saga_pending_timeout_secs: 86_400,
            parked_decision_ttl_secs: 3_600,
            reconcile_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert_eq!(config.idempotency_mode, IdempotencyMode::AtomicClaim);
        assert_eq!(config.saga_pending_timeout_secs, 86_400);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "json"),
            ("DATABASE_URL", "postgres://localhost/quests"),
            ("IDEMPOTENCY_MODE", "check-then-record"),
            ("CLAIM_LEASE_SECS", "30"),
            ("RECONCILE_INTERVAL_SECS", "5"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/quests")
        );
        assert_eq!(config.idempotency_mode, IdempotencyMode::CheckThenRecord);
        assert_eq!(config.claim_lease_secs, 30);
        assert_eq!(config.reconcile_interval_secs, 5);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("IDEMPOTENCY_MODE", "sometimes"),
            ("DATABASE_URL", ""),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.idempotency_mode, IdempotencyMode::AtomicClaim);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_out_of_range_periods_fall_back() {
        let config = from_pairs(&[
            ("CLAIM_LEASE_SECS", "9223372036854775807"),
            ("SAGA_PENDING_TIMEOUT_SECS", "-5"),
            ("PARKED_DECISION_TTL_SECS", "0"),
        ]);
        assert_eq!(config.claim_lease_secs, 300);
        assert_eq!(config.saga_pending_timeout_secs, 86_400);
        assert_eq!(config.parked_decision_ttl_secs, 3_600);
        assert_eq!(config.claim_lease(), Duration::seconds(300));
    }

    #[test]
    fn test_periods_are_clamped_when_set_directly() {
        let config = Config {
            claim_lease_secs: -30,
            saga_pending_timeout_secs: i64::MAX,
            ..Default::default()
        };
        assert_eq!(config.claim_lease(), Duration::seconds(1));
        assert_eq!(
            config.saga_pending_timeout(),
            Duration::seconds(MAX_PERIOD_SECS)
        );
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
