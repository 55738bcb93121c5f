//! Monthly usage recording.
//!
//! Counters roll over lazily: nothing is written at month boundaries, the
//! next increment simply starts a fresh epoch. Persisting the increment is
//! the store's job and must be atomic per user (see
//! [`EntitlementStore::increment_usage`](crate::storage::EntitlementStore::increment_usage)).

use chrono::{DateTime, Utc};

use crate::entitlement::UsageCounters;
use crate::error::Result;
use crate::storage::EntitlementStore;

/// Kind of usage being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    /// A journal entry was created.
    Entry,
    /// An AI insight was requested.
    AiInsight,
}

impl UsageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::AiInsight => "ai_insight",
        }
    }
}

/// The `"YYYY-MM"` token identifying the usage epoch for an instant.
#[must_use]
pub fn month_token(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// The usage epoch token for the current wall-clock month.
#[must_use]
pub fn current_month_token() -> String {
    month_token(Utc::now())
}

/// Records usage against the entitlement store.
pub struct UsageManager<S: EntitlementStore> {
    store: S,
}

impl<S: EntitlementStore> UsageManager<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Record one unit of usage for the current month.
    ///
    /// Returns the counters after the increment. Callers gate the action with
    /// [`evaluate`](crate::access::evaluate) first; this method only records.
    pub async fn record(&self, user_id: &str, kind: UsageKind) -> Result<UsageCounters> {
        let counters = self
            .store
            .increment_usage(user_id, kind, &current_month_token())
            .await?;

        tracing::debug!(
            target: "stoicaf::billing::usage",
            user_id = %user_id,
            kind = kind.as_str(),
            month = %counters.month,
            entries = counters.entries,
            ai_insights = counters.ai_insights,
            "Recorded usage"
        );

        Ok(counters)
    }
}
