//! Stripe customer management.
//!
//! Each user gets exactly one billing customer, created on first checkout and
//! reused for every subsequent session.

use crate::error::Result;
use crate::storage::EntitlementStore;

/// Customer management operations.
pub struct CustomerManager<S: EntitlementStore, C: StripeCustomerClient> {
    store: S,
    client: C,
}

impl<S: EntitlementStore, C: StripeCustomerClient> CustomerManager<S, C> {
    #[must_use]
    pub fn new(store: S, client: C) -> Self {
        Self { store, client }
    }

    /// Get the billing customer id for a user, creating one if needed.
    ///
    /// The created customer carries the user id in its metadata so inbound
    /// webhook events can be attributed.
    pub async fn get_or_create_customer(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> Result<String> {
        if let Some(customer_id) = self.store.get_customer_id(user_id).await? {
            return Ok(customer_id);
        }

        let customer_id = self
            .client
            .create_customer(CreateCustomerRequest {
                user_id: user_id.to_string(),
                email: email.map(String::from),
            })
            .await?;

        self.store.set_customer_id(user_id, &customer_id).await?;

        tracing::info!(
            target: "stoicaf::billing::customer",
            user_id = %user_id,
            customer_id = %customer_id,
            "Created billing customer"
        );

        Ok(customer_id)
    }

    /// Get the billing customer id for a user (without creating).
    pub async fn get_customer_id(&self, user_id: &str) -> Result<Option<String>> {
        self.store.get_customer_id(user_id).await
    }
}

/// Request to create a billing customer.
#[derive(Debug, Clone)]
pub struct CreateCustomerRequest {
    /// Internal user id, attached as the correlation tag in metadata.
    pub user_id: String,
    /// Customer email, if known.
    pub email: Option<String>,
}

/// Trait for Stripe customer operations.
#[allow(async_fn_in_trait)]
pub trait StripeCustomerClient: Send + Sync {
    /// Create a new customer, returning its id.
    fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// Mock Stripe customer client for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Mock customer client.
    #[derive(Default)]
    pub struct MockStripeCustomerClient {
        customer_counter: AtomicU64,
        customers: RwLock<HashMap<String, CreateCustomerRequest>>,
    }

    impl MockStripeCustomerClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All created customers, keyed by customer id (for assertions).
        pub fn created_customers(&self) -> Vec<(String, String)> {
            self.customers
                .read()
                .unwrap()
                .iter()
                .map(|(id, req)| (id.clone(), req.user_id.clone()))
                .collect()
        }
    }

    impl StripeCustomerClient for MockStripeCustomerClient {
        async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
            let id = format!(
                "cus_test_{}",
                self.customer_counter.fetch_add(1, Ordering::SeqCst)
            );
            self.customers.write().unwrap().insert(id.clone(), request);
            Ok(id)
        }
    }
}
