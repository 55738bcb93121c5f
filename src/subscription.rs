//! Normalized subscription snapshots from the billing provider.
//!
//! Both webhook payloads and gateway fetches are reduced to a
//! [`SubscriptionSnapshot`] before anything touches the entitlement store, so
//! there is exactly one place where provider state maps onto local state.

use crate::entitlement::SubscriptionStatus;
use crate::error::Result;
use crate::storage::SubscriptionUpdate;
use crate::tiers::{PriceMap, SubscriptionTier};

/// A subscription as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    /// Provider subscription id.
    pub id: String,
    /// Provider customer id.
    pub customer_id: String,
    /// Price id of the subscription's item.
    pub price_id: Option<String>,
    /// Raw provider status string.
    pub status: String,
    /// End of the current billing period (Unix seconds).
    pub current_period_end: Option<u64>,
    /// Whether the subscription cancels at period end.
    pub cancel_at_period_end: bool,
    /// Correlation tag from subscription metadata, when present.
    pub user_id: Option<String>,
}

impl SubscriptionSnapshot {
    /// Map this snapshot to an entitlement write.
    ///
    /// Tier derivation is the price map lookup; a price the app doesn't
    /// recognize yields `Free` so an unknown price can never grant paid
    /// access. The stored tier is `Free` whenever the status doesn't grant
    /// access — the price id stays on the record, so a later recovery event
    /// re-derives the paid tier. `event_at` is the provider timestamp of the
    /// event that carried this snapshot and drives last-write-wins ordering.
    #[must_use]
    pub fn to_update(&self, prices: &PriceMap, event_at: u64) -> SubscriptionUpdate {
        let status = SubscriptionStatus::from_stripe(&self.status);
        let tier = if status.grants_access() {
            self.price_id
                .as_deref()
                .and_then(|price| prices.tier_for(price))
                .unwrap_or(SubscriptionTier::Free)
        } else {
            SubscriptionTier::Free
        };

        SubscriptionUpdate {
            tier,
            status,
            subscription_id: Some(self.id.clone()),
            price_id: self.price_id.clone(),
            current_period_end: self.current_period_end,
            cancel_at_period_end: self.cancel_at_period_end,
            customer_id: Some(self.customer_id.clone()),
            event_at,
        }
    }
}

/// The entitlement write for a deleted subscription: back to free, canceled,
/// provider identifiers cleared.
#[must_use]
pub fn cancellation_update(event_at: u64) -> SubscriptionUpdate {
    SubscriptionUpdate {
        tier: SubscriptionTier::Free,
        status: SubscriptionStatus::Canceled,
        subscription_id: None,
        price_id: None,
        current_period_end: None,
        cancel_at_period_end: false,
        customer_id: None,
        event_at,
    }
}

/// Trait for Stripe subscription operations.
#[allow(async_fn_in_trait)]
pub trait StripeSubscriptionClient: Send + Sync {
    /// Fetch a subscription by id.
    fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> impl std::future::Future<Output = Result<SubscriptionSnapshot>> + Send;
}

/// Mock Stripe subscription client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use crate::error::BillingError;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// Mock subscription client backed by a registry of snapshots.
    #[derive(Default)]
    pub struct MockStripeSubscriptionClient {
        subscriptions: RwLock<HashMap<String, SubscriptionSnapshot>>,
    }

    impl MockStripeSubscriptionClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a snapshot to be returned by `get_subscription`.
        pub fn add_subscription(&self, snapshot: SubscriptionSnapshot) {
            self.subscriptions
                .write()
                .unwrap()
                .insert(snapshot.id.clone(), snapshot);
        }
    }

    impl StripeSubscriptionClient for MockStripeSubscriptionClient {
        async fn get_subscription(
            &self,
            subscription_id: &str,
        ) -> Result<SubscriptionSnapshot> {
            self.subscriptions
                .read()
                .unwrap()
                .get(subscription_id)
                .cloned()
                .ok_or_else(|| {
                    BillingError::Upstream {
                        operation: "get_subscription".to_string(),
                        message: format!("No such subscription: '{}'", subscription_id),
                        code: Some("resource_missing".to_string()),
                        http_status: Some(404),
                    }
                })
        }
    }
}
