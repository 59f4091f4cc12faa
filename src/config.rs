//! Engine configuration loaded from the environment
use crate::commission::{CommissionRates, DEFAULT_COMMISSION_BPS, DEFAULT_TAX_BPS};
use crate::otc::{DEFAULT_OTC_MAX_ATTEMPTS, DEFAULT_OTC_TTL_MINUTES, OtcPolicy};
use chrono::Duration;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_FEE_DUE_DAYS: i64 = 30;
pub const MAX_OTC_TTL_MINUTES: i64 = 7 * 24 * 60;
pub const MAX_FEE_DUE_DAYS: i64 = 10 * 365;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{key} must be greater than zero")]
    NotPositive { key: &'static str },
    #[error("{key} is {value}, the maximum is {max}")]
    TooLarge {
        key: &'static str,
        value: i64,
        max: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory of the sled database
    pub db_path: PathBuf,
    pub rates: CommissionRates,
    pub otc: OtcPolicy,
    /// How long a provider has to pay the platform fee after a cash settlement
    pub fee_due: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("market.db"),
            rates: CommissionRates::default(),
            otc: OtcPolicy::default(),
            fee_due: Duration::days(DEFAULT_FEE_DUE_DAYS),
        }
    }
}

impl EngineConfig {
    /// Reads `.env` if present, then the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("MARKET_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let commission_bps = parse(&lookup, "MARKET_COMMISSION_BPS", DEFAULT_COMMISSION_BPS)?;
        let tax_bps = parse(&lookup, "MARKET_TAX_BPS", DEFAULT_TAX_BPS)?;
        let ttl_minutes = parse(&lookup, "MARKET_OTC_TTL_MINUTES", DEFAULT_OTC_TTL_MINUTES)?;
        let max_attempts = parse(&lookup, "MARKET_OTC_MAX_ATTEMPTS", DEFAULT_OTC_MAX_ATTEMPTS)?;
        let fee_due_days = parse(&lookup, "MARKET_FEE_DUE_DAYS", DEFAULT_FEE_DUE_DAYS)?;

        if max_attempts == 0 {
            return Err(ConfigError::NotPositive {
                key: "MARKET_OTC_MAX_ATTEMPTS",
            });
        }
        let ttl = bounded(
            "MARKET_OTC_TTL_MINUTES",
            ttl_minutes,
            MAX_OTC_TTL_MINUTES,
            Duration::try_minutes,
        )?;
        let fee_due = bounded(
            "MARKET_FEE_DUE_DAYS",
            fee_due_days,
            MAX_FEE_DUE_DAYS,
            Duration::try_days,
        )?;

        Ok(Self {
            db_path,
            rates: CommissionRates {
                commission_bps,
                tax_bps,
            },
            otc: OtcPolicy { ttl, max_attempts },
            fee_due,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

/// Positive and no larger than `max`, then converted to a duration
fn bounded(
    key: &'static str,
    value: i64,
    max: i64,
    to_duration: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::NotPositive { key });
    }
    if value > max {
        return Err(ConfigError::TooLarge { key, value, max });
    }
    to_duration(value).ok_or(ConfigError::TooLarge { key, value, max })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.rates, CommissionRates::default());
        assert_eq!(config.otc.max_attempts, DEFAULT_OTC_MAX_ATTEMPTS);
        assert_eq!(config.fee_due, Duration::days(DEFAULT_FEE_DUE_DAYS));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("MARKET_COMMISSION_BPS", "1000"),
            ("MARKET_OTC_MAX_ATTEMPTS", " 3 "),
            ("MARKET_DB_PATH", "/tmp/market"),
        ]))
        .unwrap();

        assert_eq!(config.rates.commission_bps, 1_000);
        assert_eq!(config.otc.max_attempts, 3);
        assert_eq!(config.db_path, PathBuf::from("/tmp/market"));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("MARKET_TAX_BPS", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "MARKET_TAX_BPS", .. }));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err =
            EngineConfig::from_lookup(lookup(&[("MARKET_OTC_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::NotPositive { .. }));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("MARKET_OTC_TTL_MINUTES", "1000000000000")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooLarge {
                key: "MARKET_OTC_TTL_MINUTES",
                ..
            }
        ));

        let err =
            EngineConfig::from_lookup(lookup(&[("MARKET_FEE_DUE_DAYS", "9223372036854775807")]))
                .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooLarge {
                key: "MARKET_FEE_DUE_DAYS",
                ..
            }
        ));
    }

    #[test]
    fn longest_allowed_durations_load() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("MARKET_OTC_TTL_MINUTES", "10080"),
            ("MARKET_FEE_DUE_DAYS", "3650"),
        ]))
        .unwrap();
        assert_eq!(config.otc.ttl, Duration::weeks(1));
        assert_eq!(config.fee_due, Duration::days(MAX_FEE_DUE_DAYS));
    }
}
