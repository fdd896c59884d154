use std::{env, fmt, net::SocketAddr, str::FromStr, time::Duration};

use url::Url;

use super::{non_blank_var, server_bind_address};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://domain-watch.db?mode=rwc";
pub const DEFAULT_MAILER_BASE_URL: &str = "https://api.resend.com/";
pub const DEFAULT_NOTIFY_FROM: &str = "Domain Watch <alerts@domain-watch.dev>";
pub const DEFAULT_ORACLE_REQUESTS_PER_MINUTE: u32 = 60;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
///
/// Secrets are optional here: the service boots without them and reports the
/// gaps through [`AppConfig::missing_reconcile_vars`] when a pass is requested.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub cron_secret: Option<String>,
    pub oracle_api_key: Option<String>,
    pub oracle_base_url: Option<Url>,
    pub oracle_requests_per_minute: u32,
    pub mailer_api_key: Option<String>,
    pub mailer_base_url: Url,
    pub notify_email: Option<String>,
    pub notify_from: String,
    pub reconcile_interval: Option<Duration>,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        let database_url =
            non_blank_var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let oracle_base_url = non_blank_var("ORACLE_BASE_URL")
            .map(|raw| parse_url("ORACLE_BASE_URL", &raw))
            .transpose()?;
        let mailer_base_url = parse_url(
            "MAILER_BASE_URL",
            &non_blank_var("MAILER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MAILER_BASE_URL.to_string()),
        )?;

        let oracle_requests_per_minute = match non_blank_var("ORACLE_REQUESTS_PER_MINUTE") {
            Some(raw) => parse_positive::<u32>("ORACLE_REQUESTS_PER_MINUTE", &raw)?,
            None => DEFAULT_ORACLE_REQUESTS_PER_MINUTE,
        };
        let reconcile_interval = non_blank_var("RECONCILE_INTERVAL_SECS")
            .map(|raw| {
                parse_positive::<u64>("RECONCILE_INTERVAL_SECS", &raw).map(Duration::from_secs)
            })
            .transpose()?;

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            cron_secret: non_blank_var("CRON_SECRET"),
            oracle_api_key: non_blank_var("ORACLE_API_KEY"),
            oracle_base_url,
            oracle_requests_per_minute,
            mailer_api_key: non_blank_var("MAILER_API_KEY"),
            mailer_base_url,
            notify_email: non_blank_var("NOTIFY_EMAIL"),
            notify_from: non_blank_var("NOTIFY_FROM")
                .unwrap_or_else(|| DEFAULT_NOTIFY_FROM.to_string()),
            reconcile_interval,
        })
    }

    /// Names of the variables a reconciliation pass needs but that are unset.
    pub fn missing_reconcile_vars(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.cron_secret.is_none() {
            missing.push("CRON_SECRET");
        }
        if self.oracle_api_key.is_none() {
            missing.push("ORACLE_API_KEY");
        }
        if self.oracle_base_url.is_none() {
            missing.push("ORACLE_BASE_URL");
        }
        if self.mailer_api_key.is_none() {
            missing.push("MAILER_API_KEY");
        }
        if self.notify_email.is_none() {
            missing.push("NOTIFY_EMAIL");
        }
        missing
    }
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|err| ConfigError::InvalidUrl {
        name,
        reason: err.to_string(),
    })
}

/// Parses a non-zero integer that fits `T`; out-of-range input is rejected, not wrapped.
fn parse_positive<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            name,
            value: raw.to_string(),
        }),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidUrl { name: &'static str, reason: String },
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidUrl { name, reason } => write!(f, "invalid {name} value: {reason}"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
