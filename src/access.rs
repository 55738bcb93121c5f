//! Feature-access evaluation.
//!
//! [`evaluate`] is a pure function from entitlement state, usage counters,
//! and the current time to a [`FeatureAccess`] permission set. It never
//! touches storage; callers persist usage increments themselves.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::entitlement::{UsageCounters, UserEntitlement};
use crate::tiers::{SubscriptionTier, TierLimits};
use crate::usage::month_token;

/// Remaining allowance for a counted feature.
///
/// Serializes as the string `"unlimited"` or a number, which is what the
/// client-side gating consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Unlimited,
    Count(u32),
}

impl Remaining {
    /// Whether at least one more use is allowed.
    #[must_use]
    pub fn allows(&self) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Count(n) => *n > 0,
        }
    }
}

impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unlimited => serializer.serialize_str("unlimited"),
            Self::Count(n) => serializer.serialize_u32(*n),
        }
    }
}

/// The permission set consumed by UI gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureAccess {
    /// Tier in force (after lapsed-subscription downgrade).
    pub tier: SubscriptionTier,
    pub entries_remaining: Remaining,
    pub ai_insights_remaining: Remaining,
    pub can_create_entry: bool,
    pub can_use_ai_insight: bool,
    pub weekly_reflection: bool,
    pub all_pillars: bool,
    pub export: bool,
}

/// Evaluate what a user may do right now.
///
/// Deterministic and side-effect-free:
/// 1. Effective tier is the stored tier only while the subscription status
///    grants access; otherwise free, regardless of stored tier.
/// 2. Usage counters from a previous month epoch read as zero.
/// 3. Remaining = limit − used, floored at zero; unlimited stays unlimited.
/// 4. Counted gates allow while remaining is nonzero; flag features come
///    straight from the tier's limits table.
#[must_use]
pub fn evaluate(
    entitlement: &UserEntitlement,
    usage: &UsageCounters,
    now: DateTime<Utc>,
) -> FeatureAccess {
    let tier = entitlement.effective_tier();
    let limits = TierLimits::for_tier(tier);

    let (entries_used, ai_used) = usage.effective(&month_token(now));

    let entries_remaining = remaining(limits.entries_per_month, entries_used);
    let ai_insights_remaining = remaining(limits.ai_insights_per_month, ai_used);

    FeatureAccess {
        tier,
        entries_remaining,
        ai_insights_remaining,
        can_create_entry: entries_remaining.allows(),
        can_use_ai_insight: ai_insights_remaining.allows(),
        weekly_reflection: limits.weekly_reflection,
        all_pillars: limits.all_pillars,
        export: limits.export,
    }
}

fn remaining(limit: Option<u32>, used: u32) -> Remaining {
    match limit {
        None => Remaining::Unlimited,
        Some(max) => Remaining::Count(max.saturating_sub(used)),
    }
}

/// Evaluate access for a user straight from the store.
///
/// Reads (or creates, tier=free) the entitlement record and evaluates it at
/// `now`. The evaluation itself stays pure; this is just the read path the
/// gated endpoints call.
pub async fn evaluate_for_user<S: crate::storage::EntitlementStore>(
    store: &S,
    user_id: &str,
    now: DateTime<Utc>,
) -> crate::error::Result<FeatureAccess> {
    let entitlement = store.get_or_create_entitlement(user_id).await?;
    Ok(evaluate(&entitlement, &entitlement.usage, now))
}
