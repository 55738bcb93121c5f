//! Axum HTTP surface for the billing pipeline.
//!
//! Three endpoints: checkout session creation, portal session creation, and
//! the webhook receiver. The webhook handler takes the raw body — signature
//! verification happens before any parsing.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};

use crate::checkout::{CheckoutConfig, CheckoutManager, CheckoutRequest};
use crate::client::FullStripeClient;
use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::portal::{PortalConfig, PortalManager};
use crate::storage::EntitlementStore;
use crate::webhook::WebhookProcessor;

/// Shared state for the billing routes.
pub struct BillingState<S: EntitlementStore, C: FullStripeClient> {
    checkout: Arc<CheckoutManager<S, C>>,
    portal: Arc<PortalManager<S, C>>,
    webhook: Arc<WebhookProcessor<S, C>>,
}

impl<S: EntitlementStore, C: FullStripeClient> Clone for BillingState<S, C> {
    fn clone(&self) -> Self {
        Self {
            checkout: Arc::clone(&self.checkout),
            portal: Arc::clone(&self.portal),
            webhook: Arc::clone(&self.webhook),
        }
    }
}

impl<S, C> BillingState<S, C>
where
    S: EntitlementStore + Clone,
    C: FullStripeClient + Clone,
{
    /// Wire the managers from a store, a gateway client, and configuration.
    #[must_use]
    pub fn from_config(store: S, client: C, config: BillingConfig) -> Self {
        let checkout_config = CheckoutConfig {
            default_price_id: config.default_price_id,
            success_url: config.success_url,
            cancel_url: config.cancel_url,
            allowed_redirect_domains: config.allowed_redirect_domains,
        };

        Self {
            checkout: Arc::new(CheckoutManager::new(
                store.clone(),
                client.clone(),
                config.prices.clone(),
                checkout_config,
            )),
            portal: Arc::new(PortalManager::new(
                store.clone(),
                client.clone(),
                PortalConfig {
                    return_url: config.portal_return_url,
                },
            )),
            webhook: Arc::new(WebhookProcessor::new(
                store,
                client,
                config.webhook_secret,
                config.prices,
            )),
        }
    }
}

/// Build the billing router.
pub fn router<S, C>(state: BillingState<S, C>) -> Router
where
    S: EntitlementStore + Clone + 'static,
    C: FullStripeClient + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/billing/checkout", post(create_checkout_session::<S, C>))
        .route("/billing/portal", post(create_portal_session::<S, C>))
        .route("/billing/webhook", post(handle_webhook::<S, C>))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CheckoutBody {
    user_id: Option<String>,
    price_id: Option<String>,
    success_url: Option<String>,
    cancel_url: Option<String>,
    email: Option<String>,
}

#[derive(Serialize)]
struct CheckoutResponse {
    session_id: String,
    url: String,
}

async fn create_checkout_session<S, C>(
    State(state): State<BillingState<S, C>>,
    Json(body): Json<CheckoutBody>,
) -> Result<impl IntoResponse>
where
    S: EntitlementStore + Clone,
    C: FullStripeClient + Clone,
{
    let user_id = require_user_id(body.user_id)?;

    let session = state
        .checkout
        .create_checkout_session(
            &user_id,
            CheckoutRequest {
                price_id: body.price_id,
                success_url: body.success_url,
                cancel_url: body.cancel_url,
                email: body.email,
            },
        )
        .await?;

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

#[derive(Debug, Deserialize)]
struct PortalBody {
    user_id: Option<String>,
    return_url: Option<String>,
}

#[derive(Serialize)]
struct PortalResponse {
    url: String,
}

async fn create_portal_session<S, C>(
    State(state): State<BillingState<S, C>>,
    Json(body): Json<PortalBody>,
) -> Result<impl IntoResponse>
where
    S: EntitlementStore + Clone,
    C: FullStripeClient + Clone,
{
    let user_id = require_user_id(body.user_id)?;

    let session = state
        .portal
        .create_portal_session(&user_id, body.return_url)
        .await?;

    Ok(Json(PortalResponse { url: session.url }))
}

#[derive(Serialize)]
struct WebhookResponse {
    received: bool,
}

async fn handle_webhook<S, C>(
    State(state): State<BillingState<S, C>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse>
where
    S: EntitlementStore + Clone,
    C: FullStripeClient + Clone,
{
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| BillingError::signature("Missing Stripe-Signature header"))?;

    let event = state.webhook.verify_signature(&body, signature)?;
    let outcome = state.webhook.process(event).await?;

    tracing::debug!(
        target: "stoicaf::billing::http",
        outcome = ?outcome,
        "Webhook handled"
    );

    Ok(Json(WebhookResponse { received: true }))
}

fn require_user_id(user_id: Option<String>) -> Result<String> {
    match user_id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(BillingError::validation("user_id is required")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_user_id() {
        assert!(require_user_id(None).is_err());
        assert!(require_user_id(Some(String::new())).is_err());
        assert!(require_user_id(Some("   ".to_string())).is_err());
        assert_eq!(require_user_id(Some("user_1".to_string())).unwrap(), "user_1");
    }
}
