use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub dispatch: DispatchConfig,
}

/// Business parameters of the dispatch engine.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub acceptance_timeout: Duration,
    pub scan_interval: Duration,
    pub max_concurrent_orders: u32,
    pub cash_debt_ceiling: f64,
    pub max_reasonable_distance_km: f64,
    /// Upper bound on any single collaborator call.
    pub collaborator_timeout: Duration,
    pub signal_queue_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            acceptance_timeout: Duration::from_secs(120),
            scan_interval: Duration::from_secs(30),
            max_concurrent_orders: 3,
            cash_debt_ceiling: 300.0,
            max_reasonable_distance_km: 10.0,
            collaborator_timeout: Duration::from_millis(2_000),
            signal_queue_size: 1024,
        }
    }
}

impl DispatchConfig {
    pub fn acceptance_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.acceptance_timeout).unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_attempts == 0 {
            return Err(AppError::Internal(
                "DISPATCH_MAX_ATTEMPTS must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_orders == 0 {
            return Err(AppError::Internal(
                "DISPATCH_MAX_CONCURRENT_ORDERS must be > 0".to_string(),
            ));
        }
        if self.scan_interval.is_zero() {
            return Err(AppError::Internal(
                "DISPATCH_SCAN_INTERVAL_SECS must be > 0".to_string(),
            ));
        }
        if !(self.max_reasonable_distance_km > 0.0) {
            return Err(AppError::Internal(
                "DISPATCH_MAX_DISTANCE_KM must be > 0".to_string(),
            ));
        }
        if !(self.cash_debt_ceiling >= 0.0) {
            return Err(AppError::Internal(
                "DISPATCH_CASH_DEBT_CEILING must be >= 0".to_string(),
            ));
        }
        if self.signal_queue_size == 0 {
            return Err(AppError::Internal(
                "SIGNAL_QUEUE_SIZE must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            max_attempts: parse_or_default("DISPATCH_MAX_ATTEMPTS", defaults.max_attempts)?,
            acceptance_timeout: Duration::from_secs(parse_or_default(
                "DISPATCH_ACCEPT_TIMEOUT_SECS",
                defaults.acceptance_timeout.as_secs(),
            )?),
            scan_interval: Duration::from_secs(parse_or_default(
                "DISPATCH_SCAN_INTERVAL_SECS",
                defaults.scan_interval.as_secs(),
            )?),
            max_concurrent_orders: parse_or_default(
                "DISPATCH_MAX_CONCURRENT_ORDERS",
                defaults.max_concurrent_orders,
            )?,
            cash_debt_ceiling: parse_or_default(
                "DISPATCH_CASH_DEBT_CEILING",
                defaults.cash_debt_ceiling,
            )?,
            max_reasonable_distance_km: parse_or_default(
                "DISPATCH_MAX_DISTANCE_KM",
                defaults.max_reasonable_distance_km,
            )?,
            collaborator_timeout: Duration::from_millis(parse_or_default(
                "COLLABORATOR_TIMEOUT_MS",
                defaults.collaborator_timeout.as_millis() as u64,
            )?),
            signal_queue_size: parse_or_default("SIGNAL_QUEUE_SIZE", defaults.signal_queue_size)?,
        };
        dispatch.validate()?;

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact/json"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            dispatch,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::DispatchConfig;

    #[test]
    fn defaults_match_business_parameters() {
        let config = DispatchConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.acceptance_timeout, Duration::from_secs(120));
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_orders, 3);
        assert_eq!(config.cash_debt_ceiling, 300.0);
        assert_eq!(config.max_reasonable_distance_km, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = DispatchConfig {
            max_attempts: 0,
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_distance_is_rejected() {
        let config = DispatchConfig {
            max_reasonable_distance_km: 0.0,
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
