//! Entitlement state synced from the billing provider.
//!
//! One [`UserEntitlement`] record exists per user. Subscription fields are
//! written only by the webhook processor; usage counters only by the usage
//! recording path. Records are never hard-deleted — cancellation resets the
//! tier to free.

use serde::{Deserialize, Serialize};

use crate::tiers::SubscriptionTier;

/// Subscription status, mirroring the provider's lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Subscription is active and paid.
    Active,
    /// Subscription is in trial period.
    Trialing,
    /// Payment failed; the subscription exists but access has lapsed.
    PastDue,
    /// Subscription has been canceled.
    Canceled,
    /// The user has never subscribed.
    #[default]
    None,
}

impl SubscriptionStatus {
    /// Parse from the provider's status string.
    ///
    /// Statuses this app doesn't model (incomplete, paused, unpaid, ...) are
    /// folded into `Canceled`: they all mean "not entitled", and the provider
    /// will send a fresh event when the subscription recovers.
    #[must_use]
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            _ => Self::Canceled,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::None => "none",
        }
    }

    /// Whether this status grants paid entitlements.
    #[must_use]
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Monthly rolling usage counters.
///
/// `month` is a `"YYYY-MM"` token identifying the counter epoch. When the
/// current month differs from the stored token the counters read as zero;
/// no write happens until the next increment, which rolls the token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    /// Counter epoch, e.g. `"2026-08"`.
    pub month: String,
    /// Journal entries created this month.
    pub entries: u32,
    /// AI insight requests this month.
    pub ai_insights: u32,
}

impl UsageCounters {
    /// Counters as they apply to `current_month`: the stored values when the
    /// epoch matches, zero otherwise.
    #[must_use]
    pub fn effective(&self, current_month: &str) -> (u32, u32) {
        if self.month == current_month {
            (self.entries, self.ai_insights)
        } else {
            (0, 0)
        }
    }
}

/// Per-user subscription state synced from the billing provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntitlement {
    /// Internal user identifier.
    pub user_id: String,
    /// Current tier. Invariant: `Free` unless `status` grants access.
    pub tier: SubscriptionTier,
    /// Provider subscription status.
    pub status: SubscriptionStatus,
    /// Provider subscription id.
    pub subscription_id: Option<String>,
    /// Provider price id backing the subscription.
    pub price_id: Option<String>,
    /// End of the current billing period (Unix seconds).
    pub current_period_end: Option<u64>,
    /// Whether the subscription is set to cancel at period end.
    pub cancel_at_period_end: bool,
    /// Provider customer id, set once and reused.
    pub customer_id: Option<String>,
    /// Unix timestamp of the last mutation.
    pub updated_at: u64,
    /// Provider timestamp of the newest applied billing event. Used to
    /// discard stale out-of-order deliveries.
    pub billing_event_at: Option<u64>,
    /// Monthly usage counters.
    pub usage: UsageCounters,
}

impl UserEntitlement {
    /// The default record created at first read: free tier, never subscribed.
    #[must_use]
    pub fn new_free(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tier: SubscriptionTier::Free,
            status: SubscriptionStatus::None,
            subscription_id: None,
            price_id: None,
            current_period_end: None,
            cancel_at_period_end: false,
            customer_id: None,
            updated_at: 0,
            billing_event_at: None,
            usage: UsageCounters::default(),
        }
    }

    /// Tier actually in force: the stored tier when the status grants access,
    /// `Free` otherwise. Lapsed subscriptions silently downgrade regardless
    /// of what tier is stored.
    #[must_use]
    pub fn effective_tier(&self) -> SubscriptionTier {
        if self.status.grants_access() {
            self.tier
        } else {
            SubscriptionTier::Free
        }
    }

    /// Whether the subscription currently grants paid access.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.grants_access()
    }
}
