//!
//! Utility types and functions shared across the crate.
//!
//! - [`Sensitive`] - hides secrets (such as the payment provider key secret) from debug output
//! - [`RequestIdGenerator`] - generates or preserves request IDs for log correlation
//! - [`replace_handlebars_with_env`] - template substitution for environment variables
//! - [`epoch_millis_now`] - wall-clock time in Unix epoch milliseconds
//!

use {
    http::{HeaderValue, Request},
    regex::{Captures, Regex},
    serde::Deserialize,
    std::{
        env,
        sync::LazyLock,
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
    tower_http::request_id::{MakeRequestId, RequestId},
    uuid::{ContextV7, Timestamp, Uuid},
    zeroize::{Zeroize, ZeroizeOnDrop},
};

/// Matches `{{ VAR_NAME }}` with optional whitespace around the variable name.
static HANDLEBAR_REGEXP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Z0-9_]+)\s*\}\}").expect("valid handlebar regex"));

/// A wrapper type for sensitive data that obscures the value in debug output
/// and securely zeros memory when dropped.
///
/// ```
/// use axum_bouncer::Sensitive;
///
/// let secret = Sensitive::from("rzp_secret_12345");
/// assert_eq!(format!("{:?}", secret), "Sensitive(****)");
/// assert_eq!(secret.0, "rzp_secret_12345");
/// ```
#[derive(Clone, Deserialize, Default, Zeroize, ZeroizeOnDrop)]
pub struct Sensitive<T: Default + Zeroize>(pub T);

impl Sensitive<String> {
    /// Creates a new `Sensitive<String>` from a string slice.
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<T: Default + Zeroize + PartialEq> PartialEq for Sensitive<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Default + Zeroize> std::fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sensitive(****)")
    }
}

/// Request ID generator for log correlation.
///
/// Preserves an incoming `x-request-id` header, otherwise generates a UUIDv7
/// so that IDs sort by creation time.
#[derive(Debug, Clone, Copy)]
pub struct RequestIdGenerator;

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, req: &Request<B>) -> Option<RequestId> {
        match req.headers().get("x-request-id") {
            Some(value) => Some(RequestId::new(value.clone())),
            None => {
                let cx = ContextV7::new().with_additional_precision();
                let uuid = Uuid::new_v7(Timestamp::now(cx));
                let value = HeaderValue::from_str(&uuid.to_string()).ok()?;
                Some(RequestId::new(value))
            }
        }
    }
}

/// Replaces `{{ VAR_NAME }}` placeholders with environment variable values.
///
/// Missing variables are replaced with an empty string and a warning is logged.
///
/// ```
/// use axum_bouncer::replace_handlebars_with_env;
///
/// let result = replace_handlebars_with_env("secret = \"{{ BOUNCER_DOC_MISSING_VAR }}\"");
/// assert_eq!(result, "secret = \"\"");
/// ```
pub fn replace_handlebars_with_env(input: &str) -> String {
    HANDLEBAR_REGEXP
        .replace_all(input, |caps: &Captures| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| {
                tracing::warn!(
                    variable = %var_name,
                    "Environment variable not found, substituting with empty string"
                );
                String::new()
            })
        })
        .to_string()
}

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn epoch_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Formats an epoch-milliseconds timestamp as an RFC 3339 (ISO-8601) string.
pub fn format_epoch_millis(epoch_ms: u64) -> String {
    let at = UNIX_EPOCH + Duration::from_millis(epoch_ms);
    humantime::format_rfc3339_millis(at).to_string()
}
