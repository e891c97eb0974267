use crate::{Error, Result};
use serde::Deserialize;

/// Selects which built-in middlewares are installed, either as an allow list
/// (`include = [...]`) or as a deny list (`exclude = [...]`) under `[http]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMiddlewareConfig {
    Include(Vec<HttpMiddleware>),
    Exclude(Vec<HttpMiddleware>),
}

impl HttpMiddlewareConfig {
    pub fn is_enabled(&self, middleware: HttpMiddleware) -> bool {
        match self {
            HttpMiddlewareConfig::Include(list) => list.contains(&middleware),
            HttpMiddlewareConfig::Exclude(list) => !list.contains(&middleware),
        }
    }

    /// Validates middleware dependencies are satisfied.
    ///
    /// # Dependencies
    ///
    /// - `Logging` requires `RequestId` (the request span records the `x-request-id` header)
    pub fn validate(&self) -> Result<()> {
        if self.is_enabled(HttpMiddleware::Logging) && !self.is_enabled(HttpMiddleware::RequestId)
        {
            return Err(Error::invalid_input(
                "Logging requires RequestId. Remove 'request-id' from the exclude list or add both to the include list.",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HttpMiddleware {
    Admission,
    RequestId,
    Logging,
    Timeout,
    Liveness,
    Readiness,
    CatchPanic,
}
