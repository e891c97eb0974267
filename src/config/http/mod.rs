mod middleware;

pub use middleware::*;

use {crate::Result, serde::Deserialize, std::time::Duration};

///
/// Configuration for the HTTP server
///
/// This configuration controls the binding address and port, the overall
/// request timeout, the health probe routes and which of the built-in
/// middlewares are installed by `FluentRouter::setup_middleware`.
///
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// IP address to bind the HTTP server to
    /// The default `bind_addr` is "127.0.0.1".
    #[serde(default = "HttpConfig::default_bind_addr")]
    pub bind_addr: String,

    /// Port to bind the HTTP server to
    /// The default `bind_port` is 3000.
    #[serde(default = "HttpConfig::default_bind_port")]
    pub bind_port: u16,

    /// Maximum allowed time for a request to complete before timing out.
    /// This bounds the whole request, including the admission check against
    /// the shared store. Requests that take longer are aborted with a
    /// 408 Request Timeout response. By default `request_timeout` is None.
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Route for liveness checks.
    /// By default `liveness` is "/live".
    #[serde(default = "HttpConfig::default_liveness_route")]
    pub liveness_route: String,

    /// Route for readiness checks.
    /// By default `readiness` is set to "/ready".
    #[serde(default = "HttpConfig::default_readiness_route")]
    pub readiness_route: String,

    /// Maximum time to wait for graceful shutdown to complete.
    /// After this timeout, the server will force shutdown.
    /// By default `shutdown_timeout` is set to 30 seconds.
    #[serde(
        default = "HttpConfig::default_shutdown_timeout",
        with = "humantime_serde"
    )]
    pub shutdown_timeout: Duration,

    #[serde(flatten)]
    pub middleware: Option<HttpMiddlewareConfig>,
}

impl HttpConfig {
    ///
    /// Returns the full bind address as a string in the format "IP:PORT".
    ///
    pub fn full_bind_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }

    /// Returns true unless the middleware was excluded (or not included).
    pub fn is_middleware_enabled(&self, middleware: HttpMiddleware) -> bool {
        self.middleware
            .as_ref()
            .is_none_or(|config| config.is_enabled(middleware))
    }

    fn default_bind_addr() -> String {
        "127.0.0.1".into()
    }

    fn default_bind_port() -> u16 {
        3000
    }

    fn default_liveness_route() -> String {
        "/live".into()
    }

    fn default_readiness_route() -> String {
        "/ready".into()
    }

    fn default_shutdown_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.trim().is_empty() {
            return Err(crate::Error::invalid_input(
                "HTTP bind_addr is required. Set [http] bind_addr = \"0.0.0.0\" or \"127.0.0.1\" in config.",
            ));
        }

        if self.bind_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(crate::Error::invalid_input(
                "HTTP bind_addr must be a valid IP address. Examples: \"127.0.0.1\", \"0.0.0.0\", \"::1\"",
            ));
        }

        for route in [&self.liveness_route, &self.readiness_route] {
            if !route.starts_with('/') {
                return Err(crate::Error::invalid_input(format!(
                    "HTTP probe route '{route}' must start with '/'"
                )));
            }
        }

        if let Some(middleware_config) = &self.middleware {
            middleware_config.validate()?;
        }

        Ok(())
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            bind_addr: Self::default_bind_addr(),
            bind_port: Self::default_bind_port(),
            request_timeout: None,
            liveness_route: Self::default_liveness_route(),
            readiness_route: Self::default_readiness_route(),
            shutdown_timeout: Self::default_shutdown_timeout(),
            middleware: None,
        }
    }
}
