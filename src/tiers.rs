//! Subscription tiers, their feature limits, and the price→tier map.
//!
//! Tiers are fixed for the product; the Stripe price ids that map onto them
//! come from configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Subscription tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    /// No paid subscription.
    #[default]
    Free,
    /// Paid monthly/annual subscription.
    Pro,
    /// Pro plus the guided workbook program.
    Workbook,
}

impl SubscriptionTier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Workbook => "workbook",
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Feature limits for a subscription tier.
///
/// `None` on a counted limit means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    /// Journal entries per calendar month.
    pub entries_per_month: Option<u32>,
    /// AI insight requests per calendar month.
    pub ai_insights_per_month: Option<u32>,
    /// Whether the weekly reflection flow is available.
    pub weekly_reflection: bool,
    /// Whether all four pillar programs are unlocked.
    pub all_pillars: bool,
    /// Whether journal export is available.
    pub export: bool,
}

impl TierLimits {
    /// Get the limits for a tier.
    ///
    /// | Tier | Entries | AI insights | Reflection | Pillars | Export |
    /// |------|---------|-------------|------------|---------|--------|
    /// | Free | 10 | 3 | No | No | No |
    /// | Pro | Unlimited | 30 | Yes | No | Yes |
    /// | Workbook | Unlimited | Unlimited | Yes | Yes | Yes |
    #[must_use]
    pub fn for_tier(tier: SubscriptionTier) -> Self {
        match tier {
            SubscriptionTier::Free => Self {
                entries_per_month: Some(10),
                ai_insights_per_month: Some(3),
                weekly_reflection: false,
                all_pillars: false,
                export: false,
            },
            SubscriptionTier::Pro => Self {
                entries_per_month: None,
                ai_insights_per_month: Some(30),
                weekly_reflection: true,
                all_pillars: false,
                export: true,
            },
            SubscriptionTier::Workbook => Self {
                entries_per_month: None,
                ai_insights_per_month: None,
                weekly_reflection: true,
                all_pillars: true,
                export: true,
            },
        }
    }
}

/// Map from Stripe price ids to subscription tiers.
///
/// An unknown price id deliberately resolves to no tier, which the webhook
/// processor treats as `Free` — a price the app doesn't recognize must never
/// grant paid access.
#[derive(Debug, Clone, Default)]
pub struct PriceMap {
    prices: HashMap<String, SubscriptionTier>,
}

impl PriceMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a price id for a tier.
    pub fn insert(&mut self, price_id: impl Into<String>, tier: SubscriptionTier) {
        self.prices.insert(price_id.into(), tier);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_price(mut self, price_id: impl Into<String>, tier: SubscriptionTier) -> Self {
        self.insert(price_id, tier);
        self
    }

    /// Resolve a price id to its tier.
    #[must_use]
    pub fn tier_for(&self, price_id: &str) -> Option<SubscriptionTier> {
        self.prices.get(price_id).copied()
    }

    /// Whether a price id is in the configured allow-list.
    #[must_use]
    pub fn contains(&self, price_id: &str) -> bool {
        self.prices.contains_key(price_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// All configured price ids.
    pub fn price_ids(&self) -> impl Iterator<Item = &str> {
        self.prices.keys().map(|s| s.as_str())
    }
}
