use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub lookup: LookupConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            lookup: LookupConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

pub const DEFAULT_CENSUS_GEOCODER_URL: &str =
    "https://geocoding.geo.census.gov/geocoder/geographies/onelineaddress";
pub const DEFAULT_CENSUS_COORDINATES_URL: &str =
    "https://geocoding.geo.census.gov/geocoder/geographies/coordinates";
pub const DEFAULT_GOOGLE_GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
pub const DEFAULT_ACS_URL_PREFIX: &str = "https://api.census.gov/data";

/// Reference files tried, in order, when no explicit path is configured.
pub const DEFAULT_REFERENCE_CANDIDATES: [&str; 3] = [
    "data/CensusTractList2025_0.xlsx",
    "data/FFIEC_Census_Tract_List.xlsx",
    "data/FFIEC_Census_Tract_List.csv",
];

/// External endpoints, credentials and pacing for the lookup pipeline.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    pub census_geocoder_url: String,
    pub census_coordinates_url: String,
    pub census_benchmark: String,
    pub census_vintage: String,
    pub google_geocode_url: String,
    pub google_maps_api_key: Option<String>,
    pub acs_url: String,
    pub acs_year: String,
    pub census_api_key: Option<String>,
    pub reference_paths: Vec<PathBuf>,
    pub http_timeout: Duration,
    pub concurrency: usize,
    pub batch_delay: Duration,
    /// Largest address list one HTTP batch request may carry.
    pub max_batch_addresses: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        let acs_year = "2022".to_string();
        Self {
            census_geocoder_url: DEFAULT_CENSUS_GEOCODER_URL.to_string(),
            census_coordinates_url: DEFAULT_CENSUS_COORDINATES_URL.to_string(),
            census_benchmark: "2020".to_string(),
            census_vintage: "2020".to_string(),
            google_geocode_url: DEFAULT_GOOGLE_GEOCODE_URL.to_string(),
            google_maps_api_key: None,
            acs_url: format!("{DEFAULT_ACS_URL_PREFIX}/{acs_year}/acs/acs5"),
            acs_year,
            census_api_key: None,
            reference_paths: DEFAULT_REFERENCE_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .collect(),
            http_timeout: Duration::from_secs(10),
            concurrency: 1,
            batch_delay: Duration::from_millis(500),
            max_batch_addresses: 100,
        }
    }
}

impl LookupConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let acs_year = env::var("ACS_YEAR").unwrap_or(defaults.acs_year);
        let acs_url = env::var("ACS_URL")
            .unwrap_or_else(|_| format!("{DEFAULT_ACS_URL_PREFIX}/{acs_year}/acs/acs5"));

        let reference_paths = match non_empty_var("LOOKUP_REFERENCE_PATH") {
            Some(path) => vec![PathBuf::from(path)],
            None => defaults.reference_paths,
        };

        let timeout_secs = parse_var("LOOKUP_HTTP_TIMEOUT_SECS", 10u64)
            .ok_or(ConfigError::InvalidTimeout)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        let concurrency =
            parse_var("LOOKUP_CONCURRENCY", 1usize).ok_or(ConfigError::InvalidConcurrency)?;
        if concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        let delay_ms =
            parse_var("LOOKUP_BATCH_DELAY_MS", 500u64).ok_or(ConfigError::InvalidBatchDelay)?;

        let max_batch_addresses = parse_var("LOOKUP_MAX_BATCH_ADDRESSES", 100usize)
            .filter(|max| *max > 0)
            .ok_or(ConfigError::InvalidMaxBatch)?;

        Ok(Self {
            census_geocoder_url: env::var("CENSUS_GEOCODER_URL")
                .unwrap_or(defaults.census_geocoder_url),
            census_coordinates_url: env::var("CENSUS_COORDINATES_URL")
                .unwrap_or(defaults.census_coordinates_url),
            census_benchmark: env::var("CENSUS_BENCHMARK").unwrap_or(defaults.census_benchmark),
            census_vintage: env::var("CENSUS_VINTAGE").unwrap_or(defaults.census_vintage),
            google_geocode_url: env::var("GOOGLE_GEOCODE_URL")
                .unwrap_or(defaults.google_geocode_url),
            google_maps_api_key: non_empty_var("GOOGLE_MAPS_API_KEY"),
            acs_url,
            acs_year,
            census_api_key: non_empty_var("CENSUS_API_KEY"),
            reference_paths,
            http_timeout: Duration::from_secs(timeout_secs),
            concurrency,
            batch_delay: Duration::from_millis(delay_ms),
            max_batch_addresses,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Returns `None` when the variable is set but does not parse.
fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Option<T> {
    match non_empty_var(key) {
        Some(raw) => raw.parse().ok(),
        None => Some(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidTimeout,
    InvalidConcurrency,
    InvalidBatchDelay,
    InvalidMaxBatch,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidTimeout => {
                write!(f, "LOOKUP_HTTP_TIMEOUT_SECS must be a positive integer")
            }
            ConfigError::InvalidConcurrency => {
                write!(f, "LOOKUP_CONCURRENCY must be a positive integer")
            }
            ConfigError::InvalidBatchDelay => {
                write!(f, "LOOKUP_BATCH_DELAY_MS must be a non-negative integer")
            }
            ConfigError::InvalidMaxBatch => {
                write!(f, "LOOKUP_MAX_BATCH_ADDRESSES must be a positive integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
