//! Payment confirmation endpoint mounted through FluentRouter.

use super::{create_base_config, create_config_with_toml, create_payment_router, get_body_json, post_json};
use crate::{CONFIRM_PAYMENT_ROUTE, Config, InMemoryLedger, sign_payment};
use axum::http::StatusCode;
use serde_json::{Value, json};
use tower::ServiceExt;

const SECRET: &str = "rzp_test_secret";

fn config_with_secret() -> Config {
    create_config_with_toml(&format!(
        r#"
[payments]
razorpay_key_secret = "{SECRET}"
"#
    ))
}

fn signed_confirmation(order_id: &str, payment_id: &str) -> Value {
    json!({
        "razorpay_order_id": order_id,
        "razorpay_payment_id": payment_id,
        "razorpay_signature": sign_payment(SECRET, order_id, payment_id).unwrap(),
        "plan_id": "plan_123",
    })
}

#[tokio::test]
async fn test_webhook_retry_is_reported_as_duplicate() {
    let ledger = InMemoryLedger::new();
    let app = create_payment_router(config_with_secret(), ledger.clone());
    let body = signed_confirmation("order_1", "pay_1");

    let response = app
        .clone()
        .oneshot(post_json(CONFIRM_PAYMENT_ROUTE, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        get_body_json(response).await,
        json!({ "ok": true, "duplicate": false })
    );

    let response = app
        .oneshot(post_json(CONFIRM_PAYMENT_ROUTE, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        get_body_json(response).await,
        json!({ "ok": true, "duplicate": true })
    );

    assert_eq!(ledger.len(), 1);
    assert_eq!(
        ledger.get("pay_1").unwrap().plan_id.as_deref(),
        Some("plan_123")
    );
}

#[tokio::test]
async fn test_ledger_catches_duplicates_the_guard_missed() {
    // Two instances with their own in-memory guards share one ledger.
    let ledger = InMemoryLedger::new();
    let first = create_payment_router(config_with_secret(), ledger.clone());
    let second = create_payment_router(config_with_secret(), ledger.clone());
    let body = signed_confirmation("order_2", "pay_2");

    first
        .oneshot(post_json(CONFIRM_PAYMENT_ROUTE, &body))
        .await
        .unwrap();
    let response = second
        .oneshot(post_json(CONFIRM_PAYMENT_ROUTE, &body))
        .await
        .unwrap();

    assert_eq!(
        get_body_json(response).await,
        json!({ "ok": true, "duplicate": true })
    );
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn test_padded_payment_id_does_not_add_a_row() {
    let ledger = InMemoryLedger::new();
    let first = create_payment_router(config_with_secret(), ledger.clone());
    let second = create_payment_router(config_with_secret(), ledger.clone());
    let body = signed_confirmation("order_6", "pay_6");
    let mut padded = body.clone();
    padded["razorpay_payment_id"] = json!(" pay_6");

    first
        .oneshot(post_json(CONFIRM_PAYMENT_ROUTE, &body))
        .await
        .unwrap();
    let response = second
        .oneshot(post_json(CONFIRM_PAYMENT_ROUTE, &padded))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        get_body_json(response).await,
        json!({ "ok": true, "duplicate": true })
    );
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn test_invalid_signature_is_rejected() {
    let ledger = InMemoryLedger::new();
    let app = create_payment_router(config_with_secret(), ledger.clone());
    let mut body = signed_confirmation("order_3", "pay_3");
    body["razorpay_payment_id"] = json!("pay_other");

    let response = app
        .oneshot(post_json(CONFIRM_PAYMENT_ROUTE, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(get_body_json(response).await["error_code"], "AUTH_ERROR");
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn test_missing_ids_are_rejected() {
    let ledger = InMemoryLedger::new();
    let app = create_payment_router(config_with_secret(), ledger.clone());
    let body = json!({
        "razorpay_order_id": "order_4",
        "razorpay_payment_id": "  ",
        "razorpay_signature": "",
    });

    let response = app
        .oneshot(post_json(CONFIRM_PAYMENT_ROUTE, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(get_body_json(response).await["error_code"], "INVALID_INPUT");
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn test_signature_not_checked_without_secret() {
    let ledger = InMemoryLedger::new();
    let app = create_payment_router(create_base_config(), ledger.clone());
    let body = json!({
        "razorpay_order_id": "order_5",
        "razorpay_payment_id": "pay_5",
        "razorpay_signature": "unchecked",
    });

    let response = app
        .oneshot(post_json(CONFIRM_PAYMENT_ROUTE, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ledger.len(), 1);
}
