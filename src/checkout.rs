//! Stripe Checkout session management.
//!
//! Creates hosted checkout sessions for new subscriptions. The session and
//! the subscription it creates both carry the user id correlation tag so the
//! resulting webhook events can be attributed.

use url::Url;

use crate::customer::{CustomerManager, StripeCustomerClient};
use crate::error::{BillingError, Result};
use crate::storage::EntitlementStore;
use crate::tiers::PriceMap;

/// Checkout session management.
pub struct CheckoutManager<S: EntitlementStore, C: StripeCustomerClient + StripeCheckoutClient> {
    customer_manager: CustomerManager<S, C>,
    client: C,
    prices: PriceMap,
    config: CheckoutConfig,
}

impl<S, C> CheckoutManager<S, C>
where
    S: EntitlementStore + Clone,
    C: StripeCustomerClient + StripeCheckoutClient + Clone,
{
    #[must_use]
    pub fn new(store: S, client: C, prices: PriceMap, config: CheckoutConfig) -> Self {
        Self {
            customer_manager: CustomerManager::new(store, client.clone()),
            client,
            prices,
            config,
        }
    }

    /// Create a checkout session for a user.
    ///
    /// Resolves or creates the user's billing customer, resolves the price
    /// (caller-supplied or configured default) and redirect URLs, then asks
    /// the provider for a hosted session.
    pub async fn create_checkout_session(
        &self,
        user_id: &str,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession> {
        let price_id = self.resolve_price(request.price_id.as_deref())?;

        let success_url = self.resolve_url(request.success_url, &self.config.success_url, "success")?;
        let cancel_url = self.resolve_url(request.cancel_url, &self.config.cancel_url, "cancel")?;

        let customer_id = self
            .customer_manager
            .get_or_create_customer(user_id, request.email.as_deref())
            .await?;

        let session = self
            .client
            .create_checkout_session(CreateCheckoutSessionRequest {
                customer_id,
                price_id,
                success_url,
                cancel_url,
                user_id: user_id.to_string(),
            })
            .await?;

        tracing::info!(
            target: "stoicaf::billing::checkout",
            user_id = %user_id,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(session)
    }

    /// Resolve which price the session should sell.
    ///
    /// A caller-supplied price must be in the configured map (the allow-list);
    /// otherwise the configured default is used. No resolvable price is an
    /// operator problem, not a caller problem.
    fn resolve_price(&self, requested: Option<&str>) -> Result<String> {
        if let Some(price_id) = requested {
            if !self.prices.contains(price_id) {
                return Err(BillingError::validation(format!(
                    "Unknown price id: {}",
                    price_id
                )));
            }
            return Ok(price_id.to_string());
        }

        self.config
            .default_price_id
            .clone()
            .ok_or_else(|| BillingError::configuration("No checkout price configured"))
    }

    fn resolve_url(
        &self,
        requested: Option<String>,
        configured: &Option<String>,
        which: &str,
    ) -> Result<String> {
        let url = requested.or_else(|| configured.clone()).ok_or_else(|| {
            BillingError::configuration(format!("No {} URL configured", which))
        })?;
        self.config.validate_redirect_url(&url)?;
        Ok(url)
    }
}

/// Configuration for checkout sessions.
#[derive(Debug, Clone, Default)]
pub struct CheckoutConfig {
    /// Price used when requests don't name one.
    pub default_price_id: Option<String>,
    /// Default success redirect.
    pub success_url: Option<String>,
    /// Default cancel redirect.
    pub cancel_url: Option<String>,
    /// Allowed domains for redirect URLs (empty = allow any HTTPS URL).
    /// This prevents open redirect vulnerabilities.
    pub allowed_redirect_domains: Vec<String>,
}

impl CheckoutConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a redirect URL: must parse, must be HTTPS, and must match the
    /// domain allow-list when one is configured.
    pub fn validate_redirect_url(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url)
            .map_err(|e| BillingError::validation(format!("Invalid redirect URL: {}", e)))?;

        if parsed.scheme() != "https" {
            return Err(BillingError::validation("Redirect URL must use HTTPS"));
        }

        if !self.allowed_redirect_domains.is_empty() {
            let host = parsed
                .host_str()
                .ok_or_else(|| BillingError::validation("Redirect URL must have a host"))?;

            let allowed = self.allowed_redirect_domains.iter().any(|domain| {
                host == domain || host.ends_with(&format!(".{}", domain))
            });

            if !allowed {
                return Err(BillingError::validation(format!(
                    "Redirect URL domain '{}' is not allowed",
                    host
                )));
            }
        }

        Ok(())
    }
}

/// Request to create a checkout session for a user.
#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    /// Price to sell. Must be in the configured price map when supplied.
    pub price_id: Option<String>,
    /// Override the configured success redirect.
    pub success_url: Option<String>,
    /// Override the configured cancel redirect.
    pub cancel_url: Option<String>,
    /// Email for customer creation, if known.
    pub email: Option<String>,
}

/// Checkout session response.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Provider session id.
    pub id: String,
    /// Hosted checkout URL to redirect the user to.
    pub url: String,
}

/// Request to create a provider checkout session.
#[derive(Debug, Clone)]
pub struct CreateCheckoutSessionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Correlation tag, attached to the session and subscription metadata.
    pub user_id: String,
}

/// Trait for Stripe checkout operations.
#[allow(async_fn_in_trait)]
pub trait StripeCheckoutClient: Send + Sync {
    /// Create a checkout session.
    fn create_checkout_session(
        &self,
        request: CreateCheckoutSessionRequest,
    ) -> impl std::future::Future<Output = Result<CheckoutSession>> + Send;
}

/// Mock Stripe checkout client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Mock checkout client.
    #[derive(Default)]
    pub struct MockStripeCheckoutClient {
        session_counter: AtomicU64,
        sessions: RwLock<Vec<CreateCheckoutSessionRequest>>,
    }

    impl MockStripeCheckoutClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All created sessions (for assertions).
        pub fn created_sessions(&self) -> Vec<CreateCheckoutSessionRequest> {
            self.sessions.read().unwrap().clone()
        }
    }

    impl StripeCheckoutClient for MockStripeCheckoutClient {
        async fn create_checkout_session(
            &self,
            request: CreateCheckoutSessionRequest,
        ) -> Result<CheckoutSession> {
            let id = format!(
                "cs_test_{}",
                self.session_counter.fetch_add(1, Ordering::SeqCst)
            );
            self.sessions.write().unwrap().push(request);
            Ok(CheckoutSession {
                id: id.clone(),
                url: format!("https://checkout.stripe.com/c/pay/{}", id),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test::MockStripeGateway;
    use crate::storage::test::InMemoryEntitlementStore;
    use crate::tiers::SubscriptionTier;

    fn test_prices() -> PriceMap {
        PriceMap::new()
            .with_price("price_pro", SubscriptionTier::Pro)
            .with_price("price_workbook", SubscriptionTier::Workbook)
    }

    fn test_config() -> CheckoutConfig {
        CheckoutConfig {
            default_price_id: Some("price_pro".to_string()),
            success_url: Some("https://app.stoicaf.example/billing/success".to_string()),
            cancel_url: Some("https://app.stoicaf.example/billing/cancel".to_string()),
            allowed_redirect_domains: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_checkout_session_with_defaults() {
        let store = InMemoryEntitlementStore::new();
        let client = MockStripeGateway::new();
        let manager = CheckoutManager::new(store, client, test_prices(), test_config());

        let session = manager
            .create_checkout_session("user_1", CheckoutRequest::default())
            .await
            .unwrap();

        assert!(session.id.starts_with("cs_test_"));
        assert!(session.url.contains("checkout.stripe.com"));
    }

    #[tokio::test]
    async fn test_checkout_carries_correlation_tag() {
        let store = InMemoryEntitlementStore::new();
        let client = MockStripeGateway::new();
        let manager =
            CheckoutManager::new(store, client.clone(), test_prices(), test_config());

        manager
            .create_checkout_session("user_42", CheckoutRequest::default())
            .await
            .unwrap();

        let sessions = client.checkout.created_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].user_id, "user_42");
        assert_eq!(sessions[0].price_id, "price_pro");
    }

    #[tokio::test]
    async fn test_checkout_rejects_unknown_price() {
        let store = InMemoryEntitlementStore::new();
        let client = MockStripeGateway::new();
        let manager = CheckoutManager::new(store, client, test_prices(), test_config());

        let request = CheckoutRequest {
            price_id: Some("price_not_ours".to_string()),
            ..Default::default()
        };
        let result = manager.create_checkout_session("user_1", request).await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_checkout_unconfigured_price_is_configuration_error() {
        let store = InMemoryEntitlementStore::new();
        let client = MockStripeGateway::new();
        let config = CheckoutConfig {
            default_price_id: None,
            ..test_config()
        };
        let manager = CheckoutManager::new(store, client, test_prices(), config);

        let result = manager
            .create_checkout_session("user_1", CheckoutRequest::default())
            .await;
        assert!(matches!(result, Err(BillingError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_checkout_reuses_customer() {
        let store = InMemoryEntitlementStore::new();
        let client = MockStripeGateway::new();
        let manager =
            CheckoutManager::new(store, client.clone(), test_prices(), test_config());

        manager
            .create_checkout_session("user_1", CheckoutRequest::default())
            .await
            .unwrap();
        manager
            .create_checkout_session("user_1", CheckoutRequest::default())
            .await
            .unwrap();

        // Two sessions, one customer
        assert_eq!(client.checkout.created_sessions().len(), 2);
        assert_eq!(client.customer.created_customers().len(), 1);
    }

    #[test]
    fn test_url_validation_https_required() {
        let config = CheckoutConfig::new();
        assert!(config
            .validate_redirect_url("https://example.com/success")
            .is_ok());
        assert!(config
            .validate_redirect_url("http://example.com/success")
            .is_err());
        assert!(config.validate_redirect_url("not-a-url").is_err());
    }

    #[test]
    fn test_url_validation_allowed_domains() {
        let config = CheckoutConfig {
            allowed_redirect_domains: vec!["stoicaf.example".to_string()],
            ..Default::default()
        };

        assert!(config
            .validate_redirect_url("https://stoicaf.example/done")
            .is_ok());
        assert!(config
            .validate_redirect_url("https://app.stoicaf.example/done")
            .is_ok());
        assert!(config
            .validate_redirect_url("https://evil.com/redirect")
            .is_err());
        assert!(config
            .validate_redirect_url("https://notstoicaf.example.com/done")
            .is_err());
    }
}
