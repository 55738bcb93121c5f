//! Consolidated Stripe client types.
//!
//! Individual traits stay separate so managers only ask for what they use;
//! this module provides the umbrella trait for wiring a single client through
//! the whole pipeline.

use crate::checkout::StripeCheckoutClient;
use crate::customer::StripeCustomerClient;
use crate::portal::StripePortalClient;
use crate::subscription::StripeSubscriptionClient;

/// A type that implements all Stripe client traits.
///
/// Use this bound when a component needs the full gateway surface, e.g. the
/// HTTP state that feeds checkout, portal, and webhook processing from one
/// client instance.
pub trait FullStripeClient:
    StripeCustomerClient + StripeCheckoutClient + StripePortalClient + StripeSubscriptionClient
{
}

/// Blanket implementation for any type that implements all traits.
impl<T> FullStripeClient for T where
    T: StripeCustomerClient + StripeCheckoutClient + StripePortalClient + StripeSubscriptionClient
{
}

/// Mock gateway for testing that implements all client traits.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::sync::Arc;

    use crate::checkout::test::MockStripeCheckoutClient;
    use crate::checkout::{CheckoutSession, CreateCheckoutSessionRequest};
    use crate::customer::test::MockStripeCustomerClient;
    use crate::customer::CreateCustomerRequest;
    use crate::error::Result;
    use crate::portal::test::MockStripePortalClient;
    use crate::portal::{CreatePortalSessionRequest, PortalSession};
    use crate::subscription::test::MockStripeSubscriptionClient;
    use crate::subscription::SubscriptionSnapshot;

    /// Combined mock implementing every Stripe client trait.
    ///
    /// Clones share state, so a test can hand the gateway to a manager and
    /// keep a handle for assertions.
    #[derive(Default, Clone)]
    pub struct MockStripeGateway {
        pub customer: Arc<MockStripeCustomerClient>,
        pub checkout: Arc<MockStripeCheckoutClient>,
        pub portal: Arc<MockStripePortalClient>,
        pub subscriptions: Arc<MockStripeSubscriptionClient>,
    }

    impl MockStripeGateway {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl StripeCustomerClient for MockStripeGateway {
        async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
            self.customer.create_customer(request).await
        }
    }

    impl StripeCheckoutClient for MockStripeGateway {
        async fn create_checkout_session(
            &self,
            request: CreateCheckoutSessionRequest,
        ) -> Result<CheckoutSession> {
            self.checkout.create_checkout_session(request).await
        }
    }

    impl StripePortalClient for MockStripeGateway {
        async fn create_portal_session(
            &self,
            request: CreatePortalSessionRequest,
        ) -> Result<PortalSession> {
            self.portal.create_portal_session(request).await
        }
    }

    impl StripeSubscriptionClient for MockStripeGateway {
        async fn get_subscription(
            &self,
            subscription_id: &str,
        ) -> Result<SubscriptionSnapshot> {
            self.subscriptions.get_subscription(subscription_id).await
        }
    }
}
