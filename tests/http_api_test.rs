//! HTTP surface tests: the three billing endpoints driven through the router.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

use stoicaf_billing::{
    BillingConfig, BillingState, EntitlementStore, InMemoryEntitlementStore, MockStripeGateway,
    SubscriptionTier,
};

const WEBHOOK_SECRET: &str = "whsec_test_secret";

fn test_config() -> BillingConfig {
    BillingConfig::new()
        .webhook_secret(WEBHOOK_SECRET)
        .price("price_pro", SubscriptionTier::Pro)
        .price("price_workbook", SubscriptionTier::Workbook)
        .default_price("price_pro")
        .success_url("https://app.stoicaf.example/billing/success")
        .cancel_url("https://app.stoicaf.example/billing/cancel")
        .portal_return_url("https://app.stoicaf.example/settings")
}

fn test_app(store: InMemoryEntitlementStore, gateway: MockStripeGateway) -> Router {
    let state = BillingState::from_config(store, gateway, test_config());
    stoicaf_billing::routes::router(state)
}

fn sign_payload(payload: &[u8], timestamp: i64) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let signed = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac = HmacSha256::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(signed.as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn checkout_returns_session() {
    let app = test_app(InMemoryEntitlementStore::new(), MockStripeGateway::new());

    let (status, body) = post_json(
        app,
        "/billing/checkout",
        serde_json::json!({"user_id": "user_1"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["session_id"].as_str().unwrap().starts_with("cs_test_"));
    assert!(body["url"].as_str().unwrap().contains("checkout.stripe.com"));
}

#[tokio::test]
async fn checkout_requires_user_id() {
    let app = test_app(InMemoryEntitlementStore::new(), MockStripeGateway::new());

    let (status, _) = post_json(app, "/billing/checkout", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_rejects_price_outside_allow_list() {
    let app = test_app(InMemoryEntitlementStore::new(), MockStripeGateway::new());

    let (status, _) = post_json(
        app,
        "/billing/checkout",
        serde_json::json!({"user_id": "user_1", "price_id": "price_not_ours"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_unconfigured_returns_503() {
    let config = BillingConfig::new(); // no prices, no URLs
    let state = BillingState::from_config(
        InMemoryEntitlementStore::new(),
        MockStripeGateway::new(),
        config,
    );
    let app = stoicaf_billing::routes::router(state);

    let (status, _) = post_json(
        app,
        "/billing/checkout",
        serde_json::json!({"user_id": "user_1"}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn portal_returns_404_for_unknown_customer() {
    let app = test_app(InMemoryEntitlementStore::new(), MockStripeGateway::new());

    let (status, _) = post_json(
        app,
        "/billing/portal",
        serde_json::json!({"user_id": "never_subscribed"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn portal_returns_url_for_subscribed_user() {
    let store = InMemoryEntitlementStore::new();
    let app = test_app(store.clone(), MockStripeGateway::new());

    // Checkout links the customer first
    let (status, _) = post_json(
        app.clone(),
        "/billing/checkout",
        serde_json::json!({"user_id": "user_1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(
        app,
        "/billing/portal",
        serde_json::json!({"user_id": "user_1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["url"].as_str().unwrap().contains("billing.stripe.com"));
}

fn subscription_payload(user_id: &str, price_id: &str, status: &str) -> Vec<u8> {
    serde_json::json!({
        "id": "evt_http_1",
        "type": "customer.subscription.updated",
        "created": 1_700_000_000u64,
        "data": {
            "object": {
                "id": "sub_123",
                "customer": "cus_123",
                "status": status,
                "current_period_end": 1_702_592_000u64,
                "cancel_at_period_end": false,
                "items": {"data": [{"price": {"id": price_id}}]},
                "metadata": {"user_id": user_id},
            }
        }
    })
    .to_string()
    .into_bytes()
}

async fn post_webhook(app: Router, payload: &[u8], signature: Option<&str>) -> StatusCode {
    let mut request = Request::builder()
        .method(Method::POST)
        .uri("/billing/webhook");
    if let Some(signature) = signature {
        request = request.header("stripe-signature", signature);
    }
    let response = app
        .oneshot(request.body(Body::from(payload.to_vec())).unwrap())
        .await
        .unwrap();
    response.status()
}

#[tokio::test]
async fn webhook_applies_subscription_and_returns_received() {
    let store = InMemoryEntitlementStore::new();
    let app = test_app(store.clone(), MockStripeGateway::new());

    let payload = subscription_payload("user_1", "price_pro", "active");
    let signature = sign_payload(&payload, unix_now());

    let status = post_webhook(app, &payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);

    let ent = store.get_or_create_entitlement("user_1").await.unwrap();
    assert_eq!(ent.tier, SubscriptionTier::Pro);
    assert_eq!(ent.subscription_id.as_deref(), Some("sub_123"));
}

#[tokio::test]
async fn webhook_rejects_bad_signature_without_writing() {
    let store = InMemoryEntitlementStore::new();
    let app = test_app(store.clone(), MockStripeGateway::new());

    let payload = subscription_payload("user_1", "price_pro", "active");

    // Tampered signature
    let status = post_webhook(app.clone(), &payload, Some("t=123,v1=deadbeef")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing header
    let status = post_webhook(app, &payload, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // No entitlement was written either way
    assert!(store.all_entitlements().is_empty());
}

#[tokio::test]
async fn webhook_signature_covers_raw_body() {
    let store = InMemoryEntitlementStore::new();
    let app = test_app(store.clone(), MockStripeGateway::new());

    let payload = subscription_payload("user_1", "price_pro", "active");
    let signature = sign_payload(&payload, unix_now());

    // Same JSON, different bytes: signature no longer matches
    let mut tampered = String::from_utf8(payload.clone()).unwrap();
    tampered.push(' ');

    let status = post_webhook(app, tampered.as_bytes(), Some(&signature)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(store.all_entitlements().is_empty());
}

#[tokio::test]
async fn webhook_accepts_unrecognized_event_types() {
    let app = test_app(InMemoryEntitlementStore::new(), MockStripeGateway::new());

    let payload = serde_json::json!({
        "id": "evt_mystery",
        "type": "entitlements.active_entitlement_summary.updated",
        "created": 1_700_000_000u64,
        "data": {"object": {}}
    })
    .to_string()
    .into_bytes();
    let signature = sign_payload(&payload, unix_now());

    let status = post_webhook(app, &payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn webhook_unconfigured_secret_returns_503() {
    let config = BillingConfig::new()
        .price("price_pro", SubscriptionTier::Pro)
        .default_price("price_pro");
    let state = BillingState::from_config(
        InMemoryEntitlementStore::new(),
        MockStripeGateway::new(),
        config,
    );
    let app = stoicaf_billing::routes::router(state);

    let payload = subscription_payload("user_1", "price_pro", "active");
    let signature = sign_payload(&payload, unix_now());

    let status = post_webhook(app, &payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
