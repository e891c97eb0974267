//! Payment confirmation endpoint.
//!
//! After checkout the client posts the provider's order id, payment id and
//! signature. The handler verifies the signature, then uses the
//! [`IdempotencyGuard`] keyed by the payment id to short-circuit webhook
//! retries and double submissions. The [`PaymentLedger`] enforces uniqueness
//! on the payment id and stays the source of truth when the guard misses
//! (another instance, restart, store outage).

use {
    crate::{
        Error, Result,
        idempotency::IdempotencyGuard,
        utils::{Sensitive, epoch_millis_now},
    },
    async_trait::async_trait,
    axum::{Json, Router, extract::State, routing::post},
    dashmap::{DashMap, mapref::entry::Entry},
    hmac::{Hmac, Mac},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
    std::sync::Arc,
};

type HmacSha256 = Hmac<Sha256>;

pub const CONFIRM_PAYMENT_ROUTE: &str = "/api/payments/confirm";

/// Body posted by the checkout page once the provider reports success.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentConfirmation {
    pub razorpay_order_id: String,
    pub razorpay_payment_id: String,
    pub razorpay_signature: String,
    #[serde(default)]
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfirmationResponse {
    pub ok: bool,
    pub duplicate: bool,
}

/// Hex encoded HMAC-SHA256 of `"{order_id}|{payment_id}"`.
pub fn sign_payment(secret: &str, order_id: &str, payment_id: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::internal(e.to_string()))?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a provider signature in constant time.
pub fn verify_signature(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    AlreadyRecorded,
}

/// Durable record of confirmed payments, unique on the payment id.
#[async_trait]
pub trait PaymentLedger: Send + Sync + 'static {
    async fn record(&self, payment: &PaymentConfirmation) -> Result<RecordOutcome>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub order_id: String,
    pub payment_id: String,
    pub plan_id: Option<String>,
    pub recorded_at_ms: u64,
}

/// Ledger kept in memory. Suitable for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    rows: Arc<DashMap<String, PaymentRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, payment_id: &str) -> Option<PaymentRecord> {
        self.rows.get(payment_id).map(|row| row.clone())
    }
}

#[async_trait]
impl PaymentLedger for InMemoryLedger {
    async fn record(&self, payment: &PaymentConfirmation) -> Result<RecordOutcome> {
        match self.rows.entry(payment.razorpay_payment_id.clone()) {
            Entry::Occupied(_) => Ok(RecordOutcome::AlreadyRecorded),
            Entry::Vacant(slot) => {
                slot.insert(PaymentRecord {
                    order_id: payment.razorpay_order_id.clone(),
                    payment_id: payment.razorpay_payment_id.clone(),
                    plan_id: payment.plan_id.clone(),
                    recorded_at_ms: epoch_millis_now(),
                });
                Ok(RecordOutcome::Inserted)
            }
        }
    }
}

#[derive(Clone)]
pub struct PaymentState {
    guard: IdempotencyGuard,
    ledger: Arc<dyn PaymentLedger>,
    key_secret: Option<Arc<Sensitive<String>>>,
}

impl PaymentState {
    pub fn new(
        guard: IdempotencyGuard,
        ledger: Arc<dyn PaymentLedger>,
        key_secret: Option<&str>,
    ) -> Self {
        if key_secret.is_none() {
            tracing::warn!("No payment key secret configured, signatures will not be verified");
        }
        Self {
            guard,
            ledger,
            key_secret: key_secret.map(|secret| Arc::new(Sensitive::from(secret))),
        }
    }
}

impl PaymentConfirmation {
    /// Trims the provider ids so that the guard, the signature check and the
    /// ledger all see the same values.
    fn normalized(mut self) -> Self {
        self.razorpay_order_id = self.razorpay_order_id.trim().to_string();
        self.razorpay_payment_id = self.razorpay_payment_id.trim().to_string();
        self.razorpay_signature = self.razorpay_signature.trim().to_string();
        self
    }
}

fn guard_key(payment_id: &str) -> String {
    format!("razorpay:{payment_id}")
}

/// A key freshly marked in the guard that is released again unless kept.
///
/// Dropping it armed (the handler was cancelled before the ledger answered)
/// spawns the release, so a retry is not mistaken for a duplicate.
struct MarkedKey {
    guard: IdempotencyGuard,
    key: Option<String>,
}

impl MarkedKey {
    fn new(guard: &IdempotencyGuard, key: String) -> Self {
        Self {
            guard: guard.clone(),
            key: Some(key),
        }
    }

    fn keep(mut self) {
        self.key = None;
    }

    async fn release(mut self) {
        if let Some(key) = self.key.take() {
            self.guard.forget(&key).await;
        }
    }
}

impl Drop for MarkedKey {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        tracing::debug!(key = %key, "Payment confirmation abandoned, releasing key");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let guard = self.guard.clone();
                handle.spawn(async move { guard.forget(&key).await });
            }
            Err(_) => tracing::warn!(key = %key, "No runtime to release idempotency key"),
        }
    }
}

/// `POST /api/payments/confirm`
pub async fn confirm_payment(
    State(state): State<PaymentState>,
    Json(payment): Json<PaymentConfirmation>,
) -> Result<Json<ConfirmationResponse>> {
    let payment = payment.normalized();
    let order_id = payment.razorpay_order_id.as_str();
    let payment_id = payment.razorpay_payment_id.as_str();
    if order_id.is_empty() || payment_id.is_empty() {
        return Err(Error::invalid_input(
            "razorpay_order_id and razorpay_payment_id are required",
        ));
    }

    if let Some(secret) = &state.key_secret
        && !verify_signature(&secret.0, order_id, payment_id, &payment.razorpay_signature)
    {
        tracing::warn!(payment_id, order_id, "Payment signature mismatch");
        return Err(Error::authentication("Invalid payment signature"));
    }

    let key = guard_key(payment_id);
    if state.guard.seen_recently(&key, None).await {
        return Ok(Json(ConfirmationResponse {
            ok: true,
            duplicate: true,
        }));
    }
    let marked = MarkedKey::new(&state.guard, key);

    let outcome = match state.ledger.record(&payment).await {
        Ok(outcome) => outcome,
        Err(err) => {
            marked.release().await;
            return Err(err);
        }
    };
    marked.keep();

    let duplicate = outcome == RecordOutcome::AlreadyRecorded;
    if duplicate {
        tracing::info!(payment_id, "Payment already recorded");
    } else {
        tracing::info!(payment_id, order_id, plan_id = ?payment.plan_id, "Payment recorded");
    }
    Ok(Json(ConfirmationResponse {
        ok: true,
        duplicate,
    }))
}

/// Router exposing [`confirm_payment`], mergeable into a router of any state.
pub fn payment_routes<S>(state: PaymentState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route(CONFIRM_PAYMENT_ROUTE, post(confirm_payment))
        .with_state(state)
}
