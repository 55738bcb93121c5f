//! Stripe webhook handling.
//!
//! Handles signature verification, payload normalization, and applying
//! subscription state to the entitlement store. Delivery is at-least-once
//! and unordered, so processing is idempotent (event-id dedup) and
//! last-write-wins (event-timestamp comparison).

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, Result};
use crate::storage::EntitlementStore;
use crate::subscription::{
    cancellation_update, StripeSubscriptionClient, SubscriptionSnapshot,
};
use crate::tiers::PriceMap;

/// Metadata key carrying the internal user id on billing objects.
const META_USER_ID: &str = "user_id";

/// Maximum age of a webhook signature timestamp, in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook processor for billing events.
///
/// The signing secret is held as a [`SecretString`] so it can't leak through
/// debug output.
pub struct WebhookProcessor<S: EntitlementStore, C: StripeSubscriptionClient> {
    store: S,
    gateway: C,
    secret: Option<SecretString>,
    prices: PriceMap,
}

impl<S: EntitlementStore, C: StripeSubscriptionClient> WebhookProcessor<S, C> {
    #[must_use]
    pub fn new(
        store: S,
        gateway: C,
        secret: Option<SecretString>,
        prices: PriceMap,
    ) -> Self {
        Self {
            store,
            gateway,
            secret,
            prices,
        }
    }

    /// Verify the webhook signature and parse the event envelope.
    ///
    /// `payload` must be the raw, unparsed request body — parsing and
    /// re-serializing invalidates the signature.
    ///
    /// # Errors
    /// `Configuration` when no signing secret is configured, `Signature` when
    /// verification fails, `Validation` when the verified payload is not a
    /// well-formed event.
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| BillingError::configuration("No webhook signing secret configured"))?;

        let sig_parts = parse_signature_header(signature)?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0) as i64;

        if (now - sig_parts.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(BillingError::signature("Webhook timestamp too old"));
        }

        let signed_payload = format!(
            "{}.{}",
            sig_parts.timestamp,
            String::from_utf8_lossy(payload)
        );
        let expected = compute_signature(secret.expose_secret(), signed_payload.as_bytes())?;

        let expected_bytes = hex::decode(&expected)
            .map_err(|_| BillingError::internal("Hex encode produced invalid output"))?;
        let provided_bytes = hex::decode(&sig_parts.signature)
            .map_err(|_| BillingError::signature("Signature is not valid hex"))?;

        if expected_bytes.ct_eq(&provided_bytes).unwrap_u8() != 1 {
            return Err(BillingError::signature("Signature mismatch"));
        }

        let event: WebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(
                target: "stoicaf::billing::webhook",
                error = %e,
                "Failed to parse webhook payload"
            );
            BillingError::validation("Malformed webhook payload")
        })?;

        Ok(event)
    }

    /// Process a verified webhook event.
    ///
    /// Re-delivery of an already-applied event id returns
    /// [`WebhookOutcome::AlreadyProcessed`] without touching state; an event
    /// older than the applied subscription snapshot is discarded as
    /// [`WebhookOutcome::Stale`].
    pub async fn process(&self, event: WebhookEvent) -> Result<WebhookOutcome> {
        if self.store.is_event_processed(&event.id).await? {
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let decoded = BillingEvent::decode(&event)?;
        let outcome = match decoded {
            BillingEvent::CheckoutCompleted {
                subscription_id,
                user_id,
            } => {
                self.handle_checkout_completed(&event, subscription_id, user_id)
                    .await?
            }
            BillingEvent::SubscriptionUpserted(snapshot) => {
                self.apply_snapshot(&event, snapshot).await?
            }
            BillingEvent::SubscriptionDeleted {
                subscription_id,
                user_id,
            } => {
                self.handle_subscription_deleted(&event, &subscription_id, user_id)
                    .await?
            }
            BillingEvent::InvoicePaymentSucceeded { subscription_id } => {
                tracing::info!(
                    target: "stoicaf::billing::webhook",
                    event_id = %event.id,
                    subscription_id = subscription_id.as_deref().unwrap_or("-"),
                    "Invoice payment succeeded"
                );
                WebhookOutcome::Processed
            }
            BillingEvent::InvoicePaymentFailed { subscription_id } => {
                // Hook for future dunning notifications; the subscription
                // status change arrives through its own event.
                tracing::warn!(
                    target: "stoicaf::billing::webhook",
                    event_id = %event.id,
                    subscription_id = subscription_id.as_deref().unwrap_or("-"),
                    "Invoice payment failed"
                );
                WebhookOutcome::Processed
            }
            BillingEvent::Unrecognized => WebhookOutcome::Ignored,
        };

        if !matches!(outcome, WebhookOutcome::Ignored) {
            self.store.mark_event_processed(&event.id).await?;
        }

        Ok(outcome)
    }

    /// Handle `checkout.session.completed`: the session itself carries no
    /// subscription detail, so fetch the subscription from the gateway and
    /// apply it as an upsert.
    async fn handle_checkout_completed(
        &self,
        event: &WebhookEvent,
        subscription_id: Option<String>,
        session_user_id: Option<String>,
    ) -> Result<WebhookOutcome> {
        let Some(subscription_id) = subscription_id else {
            // One-time payment checkout, nothing to sync
            return Ok(WebhookOutcome::Ignored);
        };

        let mut snapshot = self.gateway.get_subscription(&subscription_id).await?;
        if snapshot.user_id.is_none() {
            snapshot.user_id = session_user_id;
        }

        self.apply_snapshot(event, snapshot).await
    }

    /// Apply a subscription snapshot as an entitlement upsert.
    async fn apply_snapshot(
        &self,
        event: &WebhookEvent,
        snapshot: SubscriptionSnapshot,
    ) -> Result<WebhookOutcome> {
        let Some(user_id) = self.attribute(snapshot.user_id.clone(), &snapshot.id).await? else {
            return Ok(self.unattributed(event, &snapshot.id));
        };

        let update = snapshot.to_update(&self.prices, event.created);
        let applied = self.store.apply_subscription(&user_id, &update).await?;

        if !applied {
            tracing::info!(
                target: "stoicaf::billing::webhook",
                event_id = %event.id,
                user_id = %user_id,
                "Discarded stale subscription event"
            );
            return Ok(WebhookOutcome::Stale);
        }

        tracing::info!(
            target: "stoicaf::billing::webhook",
            event_id = %event.id,
            event_type = %event.event_type,
            user_id = %user_id,
            subscription_id = %snapshot.id,
            tier = %update.tier,
            status = %update.status,
            "Applied subscription update"
        );

        Ok(WebhookOutcome::Processed)
    }

    /// Handle `customer.subscription.deleted`: reset the entitlement to the
    /// free tier and clear provider identifiers.
    async fn handle_subscription_deleted(
        &self,
        event: &WebhookEvent,
        subscription_id: &str,
        user_id: Option<String>,
    ) -> Result<WebhookOutcome> {
        let Some(user_id) = self.attribute(user_id, subscription_id).await? else {
            return Ok(self.unattributed(event, subscription_id));
        };

        let update = cancellation_update(event.created);
        let applied = self.store.apply_subscription(&user_id, &update).await?;

        if !applied {
            return Ok(WebhookOutcome::Stale);
        }

        tracing::info!(
            target: "stoicaf::billing::webhook",
            event_id = %event.id,
            user_id = %user_id,
            subscription_id = %subscription_id,
            "Subscription deleted, entitlement reset to free"
        );

        Ok(WebhookOutcome::Processed)
    }

    /// Resolve which user an event belongs to: the correlation tag when
    /// present, otherwise a reverse lookup by subscription id.
    async fn attribute(
        &self,
        tagged_user_id: Option<String>,
        subscription_id: &str,
    ) -> Result<Option<String>> {
        if let Some(user_id) = tagged_user_id {
            return Ok(Some(user_id));
        }
        self.store.find_user_by_subscription(subscription_id).await
    }

    /// An event we could not attribute to a user is accepted as a no-op so
    /// the provider doesn't keep redelivering it.
    fn unattributed(&self, event: &WebhookEvent, subscription_id: &str) -> WebhookOutcome {
        tracing::warn!(
            target: "stoicaf::billing::webhook",
            event_id = %event.id,
            event_type = %event.event_type,
            subscription_id = %subscription_id,
            "Event has no user correlation tag and no known subscription; ignoring"
        );
        WebhookOutcome::Ignored
    }
}

/// Parsed webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event id, used for idempotency.
    pub id: String,
    /// Event type (e.g. `"customer.subscription.updated"`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Provider timestamp of the event (Unix seconds).
    pub created: u64,
    /// Event payload.
    pub data: WebhookEventData,
}

/// Webhook event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The provider object that triggered the event.
    pub object: serde_json::Value,
}

/// Provider event shapes normalized into an internal type before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted {
        subscription_id: Option<String>,
        user_id: Option<String>,
    },
    SubscriptionUpserted(SubscriptionSnapshot),
    SubscriptionDeleted {
        subscription_id: String,
        user_id: Option<String>,
    },
    InvoicePaymentSucceeded {
        subscription_id: Option<String>,
    },
    InvoicePaymentFailed {
        subscription_id: Option<String>,
    },
    /// An event type this app doesn't handle; accepted and ignored for
    /// forward compatibility.
    Unrecognized,
}

impl BillingEvent {
    /// Decode and validate a raw event into its normalized form.
    pub fn decode(event: &WebhookEvent) -> Result<Self> {
        match event.event_type.as_str() {
            "checkout.session.completed" => {
                let session: CheckoutSessionObject = decode_object(&event.data.object)?;
                Ok(Self::CheckoutCompleted {
                    subscription_id: session.subscription,
                    user_id: session.metadata.and_then(|mut m| m.remove(META_USER_ID)),
                })
            }
            "customer.subscription.created" | "customer.subscription.updated" => {
                let sub: SubscriptionObject = decode_object(&event.data.object)?;
                Ok(Self::SubscriptionUpserted(sub.into_snapshot()))
            }
            "customer.subscription.deleted" => {
                let sub: SubscriptionObject = decode_object(&event.data.object)?;
                let snapshot = sub.into_snapshot();
                Ok(Self::SubscriptionDeleted {
                    subscription_id: snapshot.id,
                    user_id: snapshot.user_id,
                })
            }
            "invoice.payment_succeeded" | "invoice.paid" => {
                let invoice: InvoiceObject = decode_object(&event.data.object)?;
                Ok(Self::InvoicePaymentSucceeded {
                    subscription_id: invoice.subscription,
                })
            }
            "invoice.payment_failed" => {
                let invoice: InvoiceObject = decode_object(&event.data.object)?;
                Ok(Self::InvoicePaymentFailed {
                    subscription_id: invoice.subscription,
                })
            }
            _ => Ok(Self::Unrecognized),
        }
    }
}

fn decode_object<T: serde::de::DeserializeOwned>(object: &serde_json::Value) -> Result<T> {
    serde_json::from_value(object.clone())
        .map_err(|e| BillingError::validation(format!("Malformed event object: {}", e)))
}

/// Wire shape of a checkout session, reduced to the fields this app reads.
#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    subscription: Option<String>,
    metadata: Option<std::collections::HashMap<String, String>>,
}

/// Wire shape of a subscription.
#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: String,
    #[serde(default)]
    status: Option<String>,
    current_period_end: Option<u64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    items: Option<SubscriptionItems>,
    metadata: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItems {
    #[serde(default)]
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    price: Option<SubscriptionPrice>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPrice {
    id: String,
}

/// Wire shape of an invoice, reduced to the subscription reference.
#[derive(Debug, Deserialize)]
struct InvoiceObject {
    subscription: Option<String>,
}

impl SubscriptionObject {
    fn into_snapshot(mut self) -> SubscriptionSnapshot {
        let price_id = self
            .items
            .and_then(|items| items.data.into_iter().next())
            .and_then(|item| item.price)
            .map(|price| price.id);
        let user_id = self.metadata.as_mut().and_then(|m| m.remove(META_USER_ID));

        SubscriptionSnapshot {
            id: self.id,
            customer_id: self.customer,
            price_id,
            status: self.status.unwrap_or_else(|| "canceled".to_string()),
            current_period_end: self.current_period_end,
            cancel_at_period_end: self.cancel_at_period_end,
            user_id,
        }
    }
}

/// Outcome of webhook processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event was applied.
    Processed,
    /// Event was not relevant (unrecognized type, unattributable, or a
    /// non-subscription checkout).
    Ignored,
    /// Event id was already processed.
    AlreadyProcessed,
    /// Event was older than the applied subscription state.
    Stale,
}

/// Parsed signature header parts.
struct SignatureParts {
    timestamp: i64,
    signature: String,
}

/// Parse the `Stripe-Signature` header (`t=...,v1=...`).
fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            return Err(BillingError::signature("Invalid signature header format"));
        };
        match key.trim() {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value.to_string()),
            _ => {} // Ignore other signature versions
        }
    }

    Ok(SignatureParts {
        timestamp: timestamp
            .ok_or_else(|| BillingError::signature("Missing timestamp in signature header"))?,
        signature: signature
            .ok_or_else(|| BillingError::signature("Missing v1 signature in header"))?,
    })
}

/// Compute HMAC-SHA256 over the signed payload.
fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::internal("HMAC key error"))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
