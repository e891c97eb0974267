//!
//! Configuration structures and utilities for wiring up the admission layer.
//!
//! A configuration can be created in many ways:
//! - From an environment-specific TOML file via `Config::from_rust_env` or `Config::from_toml_file`
//! - From a TOML string via `Config::from_toml` or `str::parse`
//! - Constructed programmatically via the builder methods on `Config`
//!
//! In both TOML-based methods, environment variables can be referenced using the
//! `{{ VAR_NAME }}` syntax. This keeps the Redis URL and the payment provider secret
//! out of the TOML files.
//!
//! Configuration is split into logical sections:
//!
//! - `HttpConfig` for HTTP server settings
//! - `AdmissionConfig` for protected routes, identity derivation, rate limiting and idempotency
//! - `PaymentsConfig` for the payment confirmation collaborator
//! - `LoggingConfig` for logging and tracing settings
//!
mod admission;
mod http;
mod logging;
mod payments;

pub use admission::*;
pub use http::*;
pub use logging::*;
pub use payments::*;

use {
    crate::{Error, Result, utils::replace_handlebars_with_env},
    serde::Deserialize,
    std::{env, fs, str::FromStr, time::Duration},
};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    ///
    /// Loads the configuration from `config/{RUST_ENV}.toml`.
    ///
    pub fn from_rust_env() -> Result<Config> {
        Self::from_toml_file(env::var("RUST_ENV")?)
    }

    ///
    /// Given an environment name, loads `config/{env}.toml`, substitutes any
    /// environment variables, and returns a Config struct.
    ///
    pub fn from_toml_file(env: impl AsRef<str>) -> Result<Config> {
        let path = format!("config/{}.toml", env.as_ref());
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    ///
    /// Parses a configuration string in TOML format into a Config struct.
    ///
    pub fn from_toml(toml_str: &str) -> Result<Config> {
        toml_str.parse()
    }

    /// Loads from `RUST_ENV` when available, otherwise falls back to defaults.
    pub fn from_rust_env_or_default() -> Config {
        match Self::from_rust_env() {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(error = %err, "No environment config found, using defaults");
                Config::default()
            }
        }
    }

    /// Sets the HTTP server bind address of the HttpConfig.
    pub fn with_bind_addr<S: AsRef<str>>(mut self, addr: S) -> Self {
        self.http.bind_addr = addr.as_ref().into();
        self
    }

    /// Sets the HTTP server bind port of the HttpConfig.
    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.http.bind_port = port;
        self
    }

    /// Sets the request timeout duration of the HttpConfig.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.http.request_timeout = Some(timeout);
        self
    }

    /// Replaces the set of route patterns guarded by the admission middleware.
    pub fn with_protected_routes<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admission.protected_routes = routes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the sliding window size of the rate limiter.
    pub fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.admission.rate_limit.window = window;
        self
    }

    /// Sets the number of admissions allowed per key per window.
    pub fn with_rate_limit_max_requests(mut self, max_requests: u32) -> Self {
        self.admission.rate_limit.max_requests = max_requests;
        self
    }

    /// Sets the behavior of the admission middleware when the backend fails.
    pub fn with_on_backend_error(mut self, policy: OnBackendError) -> Self {
        self.admission.on_backend_error = policy;
        self
    }

    /// Sets the default TTL of the duplicate-request guard.
    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.admission.idempotency.ttl = ttl;
        self
    }

    /// Sets the log format of the LoggingConfig.
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.logging.format = format;
        self
    }

    /// Activates only the specified middlewares.
    pub fn with_included_middlewares(mut self, middlewares: Vec<HttpMiddleware>) -> Self {
        self.http.middleware = Some(HttpMiddlewareConfig::Include(middlewares));
        self
    }

    /// Activates all middlewares except the specified ones.
    pub fn with_excluded_middlewares(mut self, middlewares: Vec<HttpMiddleware>) -> Self {
        self.http.middleware = Some(HttpMiddlewareConfig::Exclude(middlewares));
        self
    }

    /// Ensures that the configuration is valid.
    pub fn validate(&self) -> Result<()> {
        self.http.validate()?;
        self.admission.validate()?;
        self.payments.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    ///
    /// Sets up the tracing subscriber for logging based on the LoggingConfig.
    ///
    /// NOTE: This should be called early during startup to ensure logging is configured
    ///       before any log messages are emitted.
    ///
    pub fn setup_tracing(&self) {
        use tracing_subscriber::{EnvFilter, prelude::*};
        let env_filter = EnvFilter::from_default_env();
        match self.logging.format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().json())
                    .with(env_filter)
                    .try_init();
            }
            LogFormat::Default => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer())
                    .with(env_filter)
                    .try_init();
            }
            LogFormat::Compact => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().compact())
                    .with(env_filter)
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .with(env_filter)
                    .try_init();
            }
        }
    }
}

///
/// Parses a configuration string with references to environment variables
/// into a Config struct by substituting the environment variables and then
/// parsing the resulting TOML.
///
impl FromStr for Config {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let config_file = replace_handlebars_with_env(s);
        let config = toml::from_str::<Config>(&config_file)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_config_from_str_empty_uses_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.http.bind_port, 3000);
        assert_eq!(config.admission.rate_limit.window, Duration::from_secs(19));
        assert_eq!(config.admission.rate_limit.max_requests, 1);
        assert_eq!(config.admission.idempotency.ttl, Duration::from_secs(120));
        assert_eq!(config.admission.on_backend_error, OnBackendError::AllowAndTag);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_str_full() {
        let config: Config = r#"
[http]
bind_addr = "0.0.0.0"
bind_port = 8080
request_timeout = "30s"

[admission]
protected_routes = ["/api/generate-plan", "/api/plans/*/export"]
identity_header = "x-authenticated-user"
identity_sources = ["identity-header", "real-ip", "connection"]
on_backend_error = "deny"

[admission.rate_limit]
backend = "memory"
window = "1m"
max_requests = 5

[admission.idempotency]
ttl = "2m"
max_entries = 500

[logging]
format = "json"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.http.bind_addr, "0.0.0.0");
        assert_eq!(config.http.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.admission.protected_routes.len(), 2);
        assert_eq!(config.admission.identity_header, "x-authenticated-user");
        assert_eq!(
            config.admission.identity_sources,
            vec![
                IdentitySourceConfig::IdentityHeader,
                IdentitySourceConfig::RealIp,
                IdentitySourceConfig::Connection,
            ]
        );
        assert_eq!(config.admission.on_backend_error, OnBackendError::Deny);
        assert_eq!(config.admission.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.admission.rate_limit.max_requests, 5);
        assert_eq!(config.admission.idempotency.max_entries, 500);
        assert!(matches!(config.logging.format, LogFormat::Json));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_str_invalid_toml() {
        let result: Result<Config> = "[http\nbind_port = ".parse();
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_config_substitutes_env_vars() {
        unsafe {
            env::set_var("BOUNCER_CONFIG_TEST_SECRET", "s3cr3t");
        }
        let config: Config = r#"
[payments]
razorpay_key_secret = "{{ BOUNCER_CONFIG_TEST_SECRET }}"
        "#
        .parse()
        .unwrap();
        assert_eq!(
            config.payments.razorpay_key_secret.as_ref().map(|s| s.0.as_str()),
            Some("s3cr3t")
        );
        unsafe {
            env::remove_var("BOUNCER_CONFIG_TEST_SECRET");
        }
    }

    #[test]
    fn test_config_builder_matches_toml_equivalent() {
        let built = Config::default()
            .with_bind_port(4000)
            .with_protected_routes(["/api/generate-plan"])
            .with_rate_limit_window(Duration::from_secs(10))
            .with_rate_limit_max_requests(3)
            .with_on_backend_error(OnBackendError::Deny)
            .with_idempotency_ttl(Duration::from_secs(30));

        let parsed: Config = r#"
[http]
bind_port = 4000

[admission]
protected_routes = ["/api/generate-plan"]
on_backend_error = "deny"

[admission.rate_limit]
window = "10s"
max_requests = 3

[admission.idempotency]
ttl = "30s"
        "#
        .parse()
        .unwrap();

        assert_eq!(built.http.bind_port, parsed.http.bind_port);
        assert_eq!(built.admission.protected_routes, parsed.admission.protected_routes);
        assert_eq!(built.admission.rate_limit.window, parsed.admission.rate_limit.window);
        assert_eq!(
            built.admission.rate_limit.max_requests,
            parsed.admission.rate_limit.max_requests
        );
        assert_eq!(built.admission.on_backend_error, parsed.admission.on_backend_error);
        assert_eq!(built.admission.idempotency.ttl, parsed.admission.idempotency.ttl);
    }

    #[test]
    fn test_validate_rejects_zero_quota() {
        let config = Config::default().with_rate_limit_max_requests(0);
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("max_requests"));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = Config::default().with_rate_limit_window(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_invalid_bind_addr() {
        let config = Config::default().with_bind_addr("not-an-ip");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_is_io_error() {
        let err = Config::from_toml_file("definitely-not-an-env").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
