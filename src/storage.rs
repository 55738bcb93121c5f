//! Storage trait for entitlement data.
//!
//! Implement [`EntitlementStore`] to persist entitlements to your document
//! store. An in-memory implementation is provided for testing.

use async_trait::async_trait;

use crate::entitlement::{SubscriptionStatus, UsageCounters, UserEntitlement};
use crate::error::Result;
use crate::tiers::SubscriptionTier;
use crate::usage::UsageKind;

/// Subscription fields written by the webhook processor.
///
/// This is the full snapshot of an upsert: every subscription field of the
/// entitlement is overwritten, usage counters are left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    pub subscription_id: Option<String>,
    pub price_id: Option<String>,
    pub current_period_end: Option<u64>,
    pub cancel_at_period_end: bool,
    pub customer_id: Option<String>,
    /// Provider timestamp of the event carrying this snapshot.
    pub event_at: u64,
}

/// Trait for storing entitlement data.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Get the entitlement record for a user, if one exists.
    async fn get_entitlement(&self, user_id: &str) -> Result<Option<UserEntitlement>>;

    /// Get the entitlement record for a user, creating the documented default
    /// (free tier, never subscribed) if absent.
    async fn get_or_create_entitlement(&self, user_id: &str) -> Result<UserEntitlement>;

    /// Apply a subscription snapshot to a user's entitlement.
    ///
    /// Last-write-wins keyed by the event's own timestamp: the write must be
    /// skipped when `update.event_at` is older than the record's
    /// `billing_event_at`. Returns `Ok(true)` if applied, `Ok(false)` if
    /// discarded as stale.
    ///
    /// Production implementations should make the timestamp check and the
    /// write a single conditional update (e.g. Firestore transaction,
    /// `UPDATE ... WHERE billing_event_at <= $event_at`), not a read followed
    /// by a separate write.
    async fn apply_subscription(
        &self,
        user_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<bool>;

    /// Find the user a provider subscription id belongs to.
    ///
    /// Fallback attribution for events whose metadata lacks the correlation
    /// tag.
    async fn find_user_by_subscription(&self, subscription_id: &str) -> Result<Option<String>>;

    /// Get the provider customer id linked to a user.
    async fn get_customer_id(&self, user_id: &str) -> Result<Option<String>>;

    /// Link a provider customer to a user. Set once per user and reused.
    async fn set_customer_id(&self, user_id: &str, customer_id: &str) -> Result<()>;

    /// Increment a usage counter for the given month epoch.
    ///
    /// If the stored epoch differs from `month`, prior counters are treated
    /// as zero and the epoch rolls to `month` before incrementing. Returns
    /// the counters after the increment.
    ///
    /// The read-modify-write must be atomic per user: concurrent increments
    /// for the same user must not lose updates. Back this with an atomic
    /// numeric increment or a conditional update, not separate read-then-write
    /// calls.
    async fn increment_usage(
        &self,
        user_id: &str,
        kind: UsageKind,
        month: &str,
    ) -> Result<UsageCounters>;

    /// Check if a webhook event has already been processed.
    async fn is_event_processed(&self, event_id: &str) -> Result<bool>;

    /// Mark a webhook event as processed.
    async fn mark_event_processed(&self, event_id: &str) -> Result<()>;
}

/// In-memory entitlement store for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, RwLock};

    /// In-memory entitlement store.
    ///
    /// Wraps data in `Arc` for cheap cloning. All mutations take the write
    /// lock, which makes each operation atomic — matching the contract real
    /// implementations must provide through conditional updates.
    #[derive(Default, Clone)]
    pub struct InMemoryEntitlementStore {
        inner: Arc<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        entitlements: RwLock<HashMap<String, UserEntitlement>>,
        processed_events: RwLock<HashSet<String>>,
    }

    impl InMemoryEntitlementStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Insert an entitlement directly (for test setup).
        pub fn seed_entitlement(&self, entitlement: UserEntitlement) {
            self.inner
                .entitlements
                .write()
                .unwrap()
                .insert(entitlement.user_id.clone(), entitlement);
        }

        /// Snapshot of all entitlements (for test assertions).
        pub fn all_entitlements(&self) -> HashMap<String, UserEntitlement> {
            self.inner.entitlements.read().unwrap().clone()
        }
    }

    fn unix_now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    #[async_trait]
    impl EntitlementStore for InMemoryEntitlementStore {
        async fn get_entitlement(&self, user_id: &str) -> Result<Option<UserEntitlement>> {
            Ok(self
                .inner
                .entitlements
                .read()
                .unwrap()
                .get(user_id)
                .cloned())
        }

        async fn get_or_create_entitlement(&self, user_id: &str) -> Result<UserEntitlement> {
            let mut entitlements = self.inner.entitlements.write().unwrap();
            Ok(entitlements
                .entry(user_id.to_string())
                .or_insert_with(|| UserEntitlement::new_free(user_id))
                .clone())
        }

        async fn apply_subscription(
            &self,
            user_id: &str,
            update: &SubscriptionUpdate,
        ) -> Result<bool> {
            let mut entitlements = self.inner.entitlements.write().unwrap();
            let record = entitlements
                .entry(user_id.to_string())
                .or_insert_with(|| UserEntitlement::new_free(user_id));

            if let Some(applied_at) = record.billing_event_at {
                if update.event_at < applied_at {
                    return Ok(false);
                }
            }

            record.tier = update.tier;
            record.status = update.status;
            record.subscription_id = update.subscription_id.clone();
            record.price_id = update.price_id.clone();
            record.current_period_end = update.current_period_end;
            record.cancel_at_period_end = update.cancel_at_period_end;
            if update.customer_id.is_some() {
                record.customer_id = update.customer_id.clone();
            }
            record.billing_event_at = Some(update.event_at);
            record.updated_at = unix_now();
            Ok(true)
        }

        async fn find_user_by_subscription(
            &self,
            subscription_id: &str,
        ) -> Result<Option<String>> {
            let entitlements = self.inner.entitlements.read().unwrap();
            Ok(entitlements
                .values()
                .find(|e| e.subscription_id.as_deref() == Some(subscription_id))
                .map(|e| e.user_id.clone()))
        }

        async fn get_customer_id(&self, user_id: &str) -> Result<Option<String>> {
            Ok(self
                .inner
                .entitlements
                .read()
                .unwrap()
                .get(user_id)
                .and_then(|e| e.customer_id.clone()))
        }

        async fn set_customer_id(&self, user_id: &str, customer_id: &str) -> Result<()> {
            let mut entitlements = self.inner.entitlements.write().unwrap();
            let record = entitlements
                .entry(user_id.to_string())
                .or_insert_with(|| UserEntitlement::new_free(user_id));
            record.customer_id = Some(customer_id.to_string());
            record.updated_at = unix_now();
            Ok(())
        }

        async fn increment_usage(
            &self,
            user_id: &str,
            kind: UsageKind,
            month: &str,
        ) -> Result<UsageCounters> {
            let mut entitlements = self.inner.entitlements.write().unwrap();
            let record = entitlements
                .entry(user_id.to_string())
                .or_insert_with(|| UserEntitlement::new_free(user_id));

            if record.usage.month != month {
                record.usage = UsageCounters {
                    month: month.to_string(),
                    entries: 0,
                    ai_insights: 0,
                };
            }
            match kind {
                UsageKind::Entry => record.usage.entries += 1,
                UsageKind::AiInsight => record.usage.ai_insights += 1,
            }
            record.updated_at = unix_now();
            Ok(record.usage.clone())
        }

        async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
            Ok(self
                .inner
                .processed_events
                .read()
                .unwrap()
                .contains(event_id))
        }

        async fn mark_event_processed(&self, event_id: &str) -> Result<()> {
            self.inner
                .processed_events
                .write()
                .unwrap()
                .insert(event_id.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test::InMemoryEntitlementStore;

    fn pro_update(event_at: u64) -> SubscriptionUpdate {
        SubscriptionUpdate {
            tier: SubscriptionTier::Pro,
            status: SubscriptionStatus::Active,
            subscription_id: Some("sub_123".to_string()),
            price_id: Some("price_pro".to_string()),
            current_period_end: Some(1_702_592_000),
            cancel_at_period_end: false,
            customer_id: Some("cus_123".to_string()),
            event_at,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_defaults_to_free() {
        let store = InMemoryEntitlementStore::new();

        assert!(store.get_entitlement("user_1").await.unwrap().is_none());

        let ent = store.get_or_create_entitlement("user_1").await.unwrap();
        assert_eq!(ent.tier, SubscriptionTier::Free);
        assert_eq!(ent.status, SubscriptionStatus::None);

        // Now it exists
        assert!(store.get_entitlement("user_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_subscription_writes_all_fields() {
        let store = InMemoryEntitlementStore::new();

        let applied = store
            .apply_subscription("user_1", &pro_update(1_700_000_000))
            .await
            .unwrap();
        assert!(applied);

        let ent = store.get_entitlement("user_1").await.unwrap().unwrap();
        assert_eq!(ent.tier, SubscriptionTier::Pro);
        assert_eq!(ent.status, SubscriptionStatus::Active);
        assert_eq!(ent.subscription_id.as_deref(), Some("sub_123"));
        assert_eq!(ent.price_id.as_deref(), Some("price_pro"));
        assert_eq!(ent.billing_event_at, Some(1_700_000_000));
        assert!(ent.updated_at > 0);
    }

    #[tokio::test]
    async fn test_apply_subscription_discards_stale_events() {
        let store = InMemoryEntitlementStore::new();

        store
            .apply_subscription("user_1", &pro_update(2_000))
            .await
            .unwrap();

        // An older event must not overwrite the newer snapshot
        let mut stale = pro_update(1_000);
        stale.status = SubscriptionStatus::Canceled;
        let applied = store.apply_subscription("user_1", &stale).await.unwrap();
        assert!(!applied);

        let ent = store.get_entitlement("user_1").await.unwrap().unwrap();
        assert_eq!(ent.status, SubscriptionStatus::Active);

        // Equal timestamps re-apply (idempotent redelivery)
        let applied = store
            .apply_subscription("user_1", &pro_update(2_000))
            .await
            .unwrap();
        assert!(applied);
    }

    #[tokio::test]
    async fn test_apply_subscription_keeps_existing_customer_id() {
        let store = InMemoryEntitlementStore::new();
        store.set_customer_id("user_1", "cus_original").await.unwrap();

        let mut update = pro_update(1_000);
        update.customer_id = None;
        store.apply_subscription("user_1", &update).await.unwrap();

        let ent = store.get_entitlement("user_1").await.unwrap().unwrap();
        assert_eq!(ent.customer_id.as_deref(), Some("cus_original"));
    }

    #[tokio::test]
    async fn test_find_user_by_subscription() {
        let store = InMemoryEntitlementStore::new();
        store
            .apply_subscription("user_1", &pro_update(1_000))
            .await
            .unwrap();

        assert_eq!(
            store.find_user_by_subscription("sub_123").await.unwrap(),
            Some("user_1".to_string())
        );
        assert_eq!(
            store.find_user_by_subscription("sub_other").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_increment_usage_rolls_month() {
        let store = InMemoryEntitlementStore::new();

        let counters = store
            .increment_usage("user_1", UsageKind::Entry, "2024-05")
            .await
            .unwrap();
        assert_eq!(counters.entries, 1);

        let counters = store
            .increment_usage("user_1", UsageKind::AiInsight, "2024-05")
            .await
            .unwrap();
        assert_eq!(counters.entries, 1);
        assert_eq!(counters.ai_insights, 1);

        // New month: counters restart at the incremented value
        let counters = store
            .increment_usage("user_1", UsageKind::Entry, "2024-06")
            .await
            .unwrap();
        assert_eq!(counters.month, "2024-06");
        assert_eq!(counters.entries, 1);
        assert_eq!(counters.ai_insights, 0);
    }

    #[tokio::test]
    async fn test_event_idempotency_tracking() {
        let store = InMemoryEntitlementStore::new();

        assert!(!store.is_event_processed("evt_1").await.unwrap());
        store.mark_event_processed("evt_1").await.unwrap();
        assert!(store.is_event_processed("evt_1").await.unwrap());
    }
}
