//! Stoic AF billing - subscription and entitlement sync for the Stoic AF
//! backend.
//!
//! Keeps per-user entitlements (tier, status, usage counters) in lockstep
//! with Stripe: checkout and portal sessions go out through the billing
//! gateway, subscription state comes back through signed webhooks, and every
//! gated action is decided by a pure feature-access evaluation over the
//! synced record.
//!
//! # Example
//!
//! ```rust,ignore
//! use stoicaf_billing::{self, BillingConfig, BillingState, LiveStripeClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     stoicaf_billing::init_tracing();
//!
//!     let config = BillingConfig::from_env();
//!     let client = LiveStripeClient::with_default_config(
//!         std::env::var("STOICAF_STRIPE_SECRET_KEY").unwrap(),
//!     )
//!     .unwrap();
//!
//!     let state = BillingState::from_config(store, client, config);
//!     let app = stoicaf_billing::routes::router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

#![allow(async_fn_in_trait)] // gateway traits are used through generics, not trait objects

pub mod access;
pub mod checkout;
pub mod client;
mod config;
pub mod customer;
pub mod entitlement;
mod error;
pub mod live_client;
pub mod portal;
pub mod routes;
pub mod storage;
pub mod subscription;
pub mod tiers;
pub mod usage;
pub mod webhook;

// Re-exports for the public API
pub use access::{evaluate, evaluate_for_user, FeatureAccess, Remaining};
pub use checkout::{CheckoutConfig, CheckoutManager, CheckoutRequest, CheckoutSession};
pub use client::FullStripeClient;
pub use config::BillingConfig;
pub use customer::CustomerManager;
pub use entitlement::{SubscriptionStatus, UsageCounters, UserEntitlement};
pub use error::{BillingError, Result};
pub use live_client::{LiveStripeClient, LiveStripeClientConfig};
pub use portal::{PortalConfig, PortalManager, PortalSession};
pub use routes::BillingState;
pub use storage::{EntitlementStore, SubscriptionUpdate};
pub use subscription::SubscriptionSnapshot;
pub use tiers::{PriceMap, SubscriptionTier, TierLimits};
pub use usage::{UsageKind, UsageManager};
pub use webhook::{WebhookEvent, WebhookOutcome, WebhookProcessor};

// Test exports
#[cfg(any(test, feature = "test-support"))]
pub use client::test::MockStripeGateway;

#[cfg(any(test, feature = "test-support"))]
pub use storage::test::InMemoryEntitlementStore;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with env-filter based configuration.
///
/// Reads `RUST_LOG` for filtering (defaults to `info`) and switches to JSON
/// output when `STOICAF_LOG_JSON=true`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("STOICAF_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
