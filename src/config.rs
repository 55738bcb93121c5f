//! Billing configuration.
//!
//! Loaded from environment variables (prefix `STOICAF_`) or assembled with
//! builder methods in tests. Missing values never panic here; the operation
//! that needs them surfaces a `Configuration` error (503) at call time.

use secrecy::SecretString;

use crate::tiers::{PriceMap, SubscriptionTier};

/// Configuration for the billing pipeline.
///
/// `Debug` is safe: secrets are held as [`SecretString`] and redact
/// themselves.
#[derive(Debug, Default)]
pub struct BillingConfig {
    /// Stripe secret key (`sk_test_...` / `sk_live_...`).
    pub stripe_secret_key: Option<SecretString>,
    /// Webhook signing secret (`whsec_...`).
    pub webhook_secret: Option<SecretString>,
    /// Price id → tier map. Doubles as the checkout price allow-list.
    pub prices: PriceMap,
    /// Price used when checkout requests don't name one.
    pub default_price_id: Option<String>,
    /// Default checkout success redirect.
    pub success_url: Option<String>,
    /// Default checkout cancel redirect.
    pub cancel_url: Option<String>,
    /// Default billing-portal return URL.
    pub portal_return_url: Option<String>,
    /// Domains redirect URLs must belong to (empty = any HTTPS URL).
    pub allowed_redirect_domains: Vec<String>,
}

impl BillingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `STOICAF_*` environment variables.
    ///
    /// Recognized variables:
    /// - `STOICAF_STRIPE_SECRET_KEY`
    /// - `STOICAF_STRIPE_WEBHOOK_SECRET`
    /// - `STOICAF_PRICE_PRO`, `STOICAF_PRICE_WORKBOOK`
    /// - `STOICAF_DEFAULT_PRICE`
    /// - `STOICAF_CHECKOUT_SUCCESS_URL`, `STOICAF_CHECKOUT_CANCEL_URL`
    /// - `STOICAF_PORTAL_RETURN_URL`
    /// - `STOICAF_ALLOWED_REDIRECT_DOMAINS` (comma-separated)
    #[must_use]
    pub fn from_env() -> Self {
        let mut prices = PriceMap::new();
        if let Some(price) = env_var("STOICAF_PRICE_PRO") {
            prices.insert(price, SubscriptionTier::Pro);
        }
        if let Some(price) = env_var("STOICAF_PRICE_WORKBOOK") {
            prices.insert(price, SubscriptionTier::Workbook);
        }

        let config = Self {
            stripe_secret_key: env_var("STOICAF_STRIPE_SECRET_KEY").map(SecretString::from),
            webhook_secret: env_var("STOICAF_STRIPE_WEBHOOK_SECRET").map(SecretString::from),
            prices,
            default_price_id: env_var("STOICAF_DEFAULT_PRICE"),
            success_url: env_var("STOICAF_CHECKOUT_SUCCESS_URL"),
            cancel_url: env_var("STOICAF_CHECKOUT_CANCEL_URL"),
            portal_return_url: env_var("STOICAF_PORTAL_RETURN_URL"),
            allowed_redirect_domains: env_var("STOICAF_ALLOWED_REDIRECT_DOMAINS")
                .map(|v| {
                    v.split(',')
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };

        if config.stripe_secret_key.is_none() {
            tracing::warn!(
                target: "stoicaf::billing::config",
                "STOICAF_STRIPE_SECRET_KEY not set; billing calls will fail until configured"
            );
        }
        if config.webhook_secret.is_none() {
            tracing::warn!(
                target: "stoicaf::billing::config",
                "STOICAF_STRIPE_WEBHOOK_SECRET not set; webhook deliveries will be rejected"
            );
        }

        config
    }

    #[must_use]
    pub fn stripe_secret_key(mut self, key: impl Into<SecretString>) -> Self {
        self.stripe_secret_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn webhook_secret(mut self, secret: impl Into<SecretString>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn price(mut self, price_id: impl Into<String>, tier: SubscriptionTier) -> Self {
        self.prices.insert(price_id, tier);
        self
    }

    #[must_use]
    pub fn default_price(mut self, price_id: impl Into<String>) -> Self {
        self.default_price_id = Some(price_id.into());
        self
    }

    #[must_use]
    pub fn success_url(mut self, url: impl Into<String>) -> Self {
        self.success_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn cancel_url(mut self, url: impl Into<String>) -> Self {
        self.cancel_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn portal_return_url(mut self, url: impl Into<String>) -> Self {
        self.portal_return_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn allowed_redirect_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_redirect_domains = domains.into_iter().map(Into::into).collect();
        self
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = BillingConfig::new()
            .stripe_secret_key("sk_test_1234567890abcdef")
            .webhook_secret("whsec_test")
            .price("price_pro", SubscriptionTier::Pro)
            .price("price_workbook", SubscriptionTier::Workbook)
            .default_price("price_pro")
            .success_url("https://app.stoicaf.example/billing/success")
            .cancel_url("https://app.stoicaf.example/billing/cancel")
            .allowed_redirect_domains(["stoicaf.example"]);

        assert!(config.stripe_secret_key.is_some());
        assert!(config.webhook_secret.is_some());
        assert_eq!(
            config.prices.tier_for("price_pro"),
            Some(SubscriptionTier::Pro)
        );
        assert_eq!(config.default_price_id.as_deref(), Some("price_pro"));
        assert_eq!(config.allowed_redirect_domains, vec!["stoicaf.example"]);
    }

    #[test]
    fn test_default_is_unconfigured() {
        let config = BillingConfig::default();
        assert!(config.stripe_secret_key.is_none());
        assert!(config.webhook_secret.is_none());
        assert!(config.prices.is_empty());
        assert!(config.default_price_id.is_none());
    }
}
