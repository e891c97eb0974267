use {
    crate::{Result, utils::Sensitive},
    serde::Deserialize,
};

///
/// Configuration of the payment confirmation endpoint.
///
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PaymentsConfig {
    /// Key secret used to verify the provider's HMAC-SHA256 signature.
    /// When absent, signatures are not verified (development only).
    #[serde(default)]
    pub razorpay_key_secret: Option<Sensitive<String>>,
}

impl PaymentsConfig {
    pub fn validate(&self) -> Result<()> {
        match &self.razorpay_key_secret {
            Some(secret) if secret.0.trim().is_empty() => {
                tracing::warn!(
                    "payments.razorpay_key_secret is empty, payment signatures will not be verified"
                );
            }
            None => {
                tracing::warn!(
                    "payments.razorpay_key_secret is not configured, payment signatures will not be verified"
                );
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns the key secret when one is configured and non-empty.
    pub fn key_secret(&self) -> Option<&str> {
        self.razorpay_key_secret
            .as_ref()
            .map(|s| s.0.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}
