//! Stripe Customer Portal session management.
//!
//! The portal is where users change plans, update payment methods, and
//! cancel. Only users who have subscribed before have a billing customer to
//! open a portal for.

use crate::error::{BillingError, Result};
use crate::storage::EntitlementStore;

/// Customer portal session management.
pub struct PortalManager<S: EntitlementStore, C: StripePortalClient> {
    store: S,
    client: C,
    config: PortalConfig,
}

impl<S: EntitlementStore, C: StripePortalClient> PortalManager<S, C> {
    #[must_use]
    pub fn new(store: S, client: C, config: PortalConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    /// Create a portal session for a user.
    ///
    /// Fails with `NotFound` if the user has never subscribed (no billing
    /// customer on file).
    pub async fn create_portal_session(
        &self,
        user_id: &str,
        return_url: Option<String>,
    ) -> Result<PortalSession> {
        let customer_id = self
            .store
            .get_customer_id(user_id)
            .await?
            .ok_or_else(|| BillingError::not_found("No billing customer for user"))?;

        let return_url = return_url
            .or_else(|| self.config.return_url.clone())
            .ok_or_else(|| BillingError::configuration("No portal return URL configured"))?;

        let session = self
            .client
            .create_portal_session(CreatePortalSessionRequest {
                customer_id,
                return_url,
            })
            .await?;

        tracing::info!(
            target: "stoicaf::billing::portal",
            user_id = %user_id,
            session_id = %session.id,
            "Created portal session"
        );

        Ok(session)
    }
}

/// Configuration for the customer portal.
#[derive(Debug, Clone, Default)]
pub struct PortalConfig {
    /// Default URL to return to after the portal.
    pub return_url: Option<String>,
}

/// Portal session response.
#[derive(Debug, Clone)]
#[must_use]
pub struct PortalSession {
    /// Provider portal session id.
    pub id: String,
    /// URL to redirect the user to.
    pub url: String,
}

/// Request to create a portal session.
#[derive(Debug, Clone)]
pub struct CreatePortalSessionRequest {
    pub customer_id: String,
    pub return_url: String,
}

/// Trait for Stripe customer portal operations.
#[allow(async_fn_in_trait)]
pub trait StripePortalClient: Send + Sync {
    /// Create a customer portal session.
    fn create_portal_session(
        &self,
        request: CreatePortalSessionRequest,
    ) -> impl std::future::Future<Output = Result<PortalSession>> + Send;
}

/// Mock Stripe portal client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Mock portal client.
    #[derive(Default)]
    pub struct MockStripePortalClient {
        session_counter: AtomicU64,
    }

    impl MockStripePortalClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl StripePortalClient for MockStripePortalClient {
        async fn create_portal_session(
            &self,
            _request: CreatePortalSessionRequest,
        ) -> Result<PortalSession> {
            let id = format!(
                "bps_test_{}",
                self.session_counter.fetch_add(1, Ordering::SeqCst)
            );
            Ok(PortalSession {
                id: id.clone(),
                url: format!("https://billing.stripe.com/p/session/{}", id),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test::MockStripePortalClient;
    use crate::storage::test::InMemoryEntitlementStore;

    #[tokio::test]
    async fn test_create_portal_session() {
        let store = InMemoryEntitlementStore::new();
        store.set_customer_id("user_1", "cus_123").await.unwrap();

        let manager = PortalManager::new(
            store,
            MockStripePortalClient::new(),
            PortalConfig {
                return_url: Some("https://app.stoicaf.example/settings".to_string()),
            },
        );

        let session = manager.create_portal_session("user_1", None).await.unwrap();
        assert!(session.id.starts_with("bps_test_"));
        assert!(session.url.contains("billing.stripe.com"));
    }

    #[tokio::test]
    async fn test_portal_requires_existing_customer() {
        let store = InMemoryEntitlementStore::new();
        let manager = PortalManager::new(
            store,
            MockStripePortalClient::new(),
            PortalConfig::default(),
        );

        let result = manager.create_portal_session("never_subscribed", None).await;
        assert!(matches!(result, Err(BillingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_portal_requires_return_url() {
        let store = InMemoryEntitlementStore::new();
        store.set_customer_id("user_1", "cus_123").await.unwrap();

        let manager = PortalManager::new(
            store,
            MockStripePortalClient::new(),
            PortalConfig::default(),
        );

        let result = manager.create_portal_session("user_1", None).await;
        assert!(matches!(result, Err(BillingError::Configuration(_))));
    }
}
