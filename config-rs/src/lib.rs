//! config-rs/lib.rs
//! Startup configuration for the fake service node
//! Everything is read once from the environment (optionally seeded from a `.env` file)
//! and treated as immutable for the lifetime of the process.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default bind address when `LISTEN_ADDR` is not set
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9090";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid duration for {key}: '{value}': {source}")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
}

/// Which inbound transport the node serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    Http,
    Grpc,
}

impl FromStr for ServerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ServerType::Http),
            "grpc" => Ok(ServerType::Grpc),
            other => Err(format!("unknown server type '{}', expected http or grpc", other)),
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerType::Http => write!(f, "http"),
            ServerType::Grpc => write!(f, "grpc"),
        }
    }
}

/// Shape of the target-duration distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingDistribution {
    /// Always the 50th percentile value
    Fixed,
    /// Uniform between the 50th and 99th percentile values
    Uniform,
    /// Normal around the 50th percentile, variance percent as standard deviation
    Normal,
    /// Percentile buckets with variance
    Percentile,
}

impl FromStr for TimingDistribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(TimingDistribution::Fixed),
            "uniform" => Ok(TimingDistribution::Uniform),
            "normal" => Ok(TimingDistribution::Normal),
            "percentile" => Ok(TimingDistribution::Percentile),
            other => Err(format!("unknown timing distribution '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingConfig {
    pub distribution: TimingDistribution,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
    /// Percentage applied as +/- jitter (or standard deviation for `Normal`)
    pub variance: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            distribution: TimingDistribution::Percentile,
            p50: Duration::ZERO,
            p90: Duration::ZERO,
            p99: Duration::ZERO,
            variance: 0.0,
        }
    }
}

/// What an injected fault does to the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Short-circuit with a synthetic error code
    HttpError,
    /// Sleep `delay` and then continue normally
    Delay,
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http_error" | "error" => Ok(ErrorType::HttpError),
            "delay" => Ok(ErrorType::Delay),
            other => Err(format!("unknown error type '{}', expected http_error or delay", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInjectionConfig {
    /// Fraction of requests to fault, 0.0 to 1.0
    pub rate: f64,
    pub error_type: ErrorType,
    /// One error definition per code; an injected request picks exactly one
    pub codes: Vec<i32>,
    pub delay: Duration,
}

impl Default for ErrorInjectionConfig {
    fn default() -> Self {
        Self {
            rate: 0.0,
            error_type: ErrorType::HttpError,
            codes: vec![500],
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadConfig {
    /// Number of cores to burn; 0 disables CPU load, -1 uses every core
    pub cpu_cores: i32,
    /// Busy share of each core, 0 to 100
    pub cpu_percentage: f64,
    /// Bytes held for the life of a request
    pub memory_bytes: usize,
    /// Percentage jitter applied to `memory_bytes`
    pub memory_variance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub http_keep_alives: bool,
    pub http_request_timeout: Duration,
    pub grpc_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_keep_alives: true,
            http_request_timeout: Duration::from_secs(30),
            grpc_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Prometheus scrape listener; timings are not exported when unset
    pub prometheus_addr: Option<SocketAddr>,
    pub environment: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus_addr: None,
            environment: "production".to_string(),
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    pub message: String,
    pub listen_addr: SocketAddr,
    pub server_type: ServerType,
    /// Raw upstream addresses in configuration order
    pub upstream_uris: Vec<String>,
    pub upstream_workers: usize,
    pub timing: TimingConfig,
    pub errors: ErrorInjectionConfig,
    pub load: LoadConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl ServiceConfig {
    /// Load configuration from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            log::debug!("Loaded environment overrides from {}", path.display());
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup: &lookup };

        let timing = TimingConfig {
            distribution: source.parse("TIMING_DISTRIBUTION", TimingDistribution::Percentile)?,
            p50: source.duration("TIMING_50_PERCENTILE", Duration::ZERO)?,
            p90: source.duration("TIMING_90_PERCENTILE", Duration::ZERO)?,
            p99: source.duration("TIMING_99_PERCENTILE", Duration::ZERO)?,
            variance: source.non_negative("TIMING_VARIANCE", 0.0)?,
        };

        let rate: f64 = source.parse("ERROR_RATE", 0.0)?;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::InvalidValue {
                key: "ERROR_RATE",
                value: rate.to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }

        let errors = ErrorInjectionConfig {
            rate,
            error_type: source.parse("ERROR_TYPE", ErrorType::HttpError)?,
            codes: source.list("ERROR_CODE", vec![500])?,
            delay: source.duration("ERROR_DELAY", Duration::ZERO)?,
        };

        let load = LoadConfig {
            cpu_cores: source.parse("LOAD_CPU_CORES", 0)?,
            cpu_percentage: source.non_negative("LOAD_CPU_PERCENTAGE", 0.0)?,
            memory_bytes: source.parse("LOAD_MEMORY_ALLOCATED", 0)?,
            memory_variance: source.non_negative("LOAD_MEMORY_VARIANCE", 0.0)?,
        };

        let client = ClientConfig {
            http_keep_alives: source.parse("HTTP_CLIENT_KEEP_ALIVES", true)?,
            http_request_timeout: source
                .duration("HTTP_CLIENT_REQUEST_TIMEOUT", Duration::from_secs(30))?,
            grpc_timeout: source.duration("GRPC_CLIENT_TIMEOUT", Duration::from_secs(30))?,
        };

        let logging = LoggingConfig {
            level: source.string("LOG_LEVEL", "info"),
            format: match source.string("LOG_FORMAT", "text").to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "LOG_FORMAT",
                        value: other.to_string(),
                        reason: "expected text or json".to_string(),
                    })
                }
            },
        };

        let metrics = MetricsConfig {
            prometheus_addr: source.parse_optional("METRICS_PROMETHEUS_ADDR")?,
            environment: source.string("ENVIRONMENT", "production"),
        };

        let upstream_uris = source
            .optional("UPSTREAM_URIS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name: source.string("NAME", "Service"),
            message: source.string("MESSAGE", "Hello World"),
            listen_addr: source.parse("LISTEN_ADDR", default_listen_addr())?,
            server_type: source.parse("SERVER_TYPE", ServerType::Http)?,
            upstream_uris,
            upstream_workers: source.parse::<usize>("UPSTREAM_WORKERS", 1)?.max(1),
            timing,
            errors,
            load,
            client,
            logging,
            metrics,
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "Service".to_string(),
            message: "Hello World".to_string(),
            listen_addr: default_listen_addr(),
            server_type: ServerType::Http,
            upstream_uris: Vec::new(),
            upstream_workers: 1,
            timing: TimingConfig::default(),
            errors: ErrorInjectionConfig::default(),
            load: LoadConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

struct Source<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Source<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn parse_optional<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            None => Ok(None),
            Some(value) => value.parse::<T>().map(Some).map_err(|e| ConfigError::InvalidValue {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    /// A finite, non-negative number; `NaN` and `inf` parse as `f64` but are rejected
    fn non_negative(&self, key: &'static str, default: f64) -> Result<f64, ConfigError> {
        let value: f64 = self.parse(key, default)?;
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::InvalidValue {
                key,
                value: value.to_string(),
                reason: "must be a finite number of at least 0".to_string(),
            });
        }
        Ok(value)
    }

    fn duration(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => humantime::parse_duration(&value)
                .map_err(|source| ConfigError::InvalidDuration { key, value, source }),
        }
    }

    fn list<T>(&self, key: &'static str, default: Vec<T>) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(raw) = self.optional(key) else {
            return Ok(default);
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|item| {
                item.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    key,
                    value: item.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert!(config.upstream_uris.is_empty());
        assert_eq!(config.errors.codes, vec![500]);
    }

    #[test]
    fn test_upstreams_and_timing() {
        let config = config_from(&[
            ("NAME", "web"),
            ("UPSTREAM_URIS", "http://api:9090, grpc://payments:9091,,"),
            ("UPSTREAM_WORKERS", "4"),
            ("TIMING_50_PERCENTILE", "20ms"),
            ("TIMING_90_PERCENTILE", "1s"),
            ("TIMING_VARIANCE", "10"),
            ("SERVER_TYPE", "gRPC"),
        ])
        .unwrap();

        assert_eq!(config.name, "web");
        assert_eq!(
            config.upstream_uris,
            vec!["http://api:9090".to_string(), "grpc://payments:9091".to_string()]
        );
        assert_eq!(config.upstream_workers, 4);
        assert_eq!(config.timing.p50, Duration::from_millis(20));
        assert_eq!(config.timing.p90, Duration::from_secs(1));
        assert_eq!(config.timing.variance, 10.0);
        assert_eq!(config.server_type, ServerType::Grpc);
    }

    #[test]
    fn test_zero_workers_clamped() {
        let config = config_from(&[("UPSTREAM_WORKERS", "0")]).unwrap();
        assert_eq!(config.upstream_workers, 1);
    }

    #[test]
    fn test_error_injection() {
        let config = config_from(&[
            ("ERROR_RATE", "0.25"),
            ("ERROR_CODE", "503, 429"),
            ("ERROR_TYPE", "delay"),
            ("ERROR_DELAY", "2s"),
        ])
        .unwrap();
        assert_eq!(config.errors.rate, 0.25);
        assert_eq!(config.errors.codes, vec![503, 429]);
        assert_eq!(config.errors.error_type, ErrorType::Delay);
        assert_eq!(config.errors.delay, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            config_from(&[("ERROR_RATE", "1.5")]),
            Err(ConfigError::InvalidValue { key: "ERROR_RATE", .. })
        ));
        assert!(matches!(
            config_from(&[("TIMING_50_PERCENTILE", "fast")]),
            Err(ConfigError::InvalidDuration { key: "TIMING_50_PERCENTILE", .. })
        ));
        assert!(config_from(&[("SERVER_TYPE", "udp")]).is_err());
        assert!(config_from(&[("ERROR_CODE", "500,abc")]).is_err());
        assert!(config_from(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn test_non_finite_percentages_rejected() {
        for value in ["NaN", "inf", "-inf", "-5"] {
            for key in ["TIMING_VARIANCE", "LOAD_CPU_PERCENTAGE", "LOAD_MEMORY_VARIANCE"] {
                match config_from(&[("TIMING_50_PERCENTILE", "100ms"), (key, value)]) {
                    Err(ConfigError::InvalidValue { key: rejected, .. }) => {
                        assert_eq!(rejected, key)
                    }
                    other => panic!("{}={} should be rejected, got {:?}", key, value, other),
                }
            }
        }
        assert_eq!(config_from(&[("TIMING_VARIANCE", "12.5")]).unwrap().timing.variance, 12.5);
    }

    #[test]
    fn test_prometheus_addr() {
        let config = config_from(&[("METRICS_PROMETHEUS_ADDR", "127.0.0.1:9102")]).unwrap();
        assert_eq!(config.metrics.prometheus_addr, Some("127.0.0.1:9102".parse().unwrap()));
        assert!(config_from(&[("METRICS_PROMETHEUS_ADDR", "nowhere")]).is_err());
    }
}
