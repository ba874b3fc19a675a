//! Subscription lifecycle state machine.
//!
//! Owns every status transition a subscription can make:
//!
//! ```text
//! (create) ──> Active ──[cancel]──> Cancelled   (terminal)
//!                │
//!                └──[sweep, end_date passed]──> Expired   (terminal)
//! ```
//!
//! Plan changes keep the subscription Active and recompute its end date from
//! the new plan. Remaining entitlement on the old plan is discarded, not
//! prorated; that is intentional policy.
//!
//! All transitions are conditional mutations executed by the repository (see
//! [`SubscriptionRepository`]), so the machine stays consistent under
//! concurrent requests and the periodic sweep without application-level
//! locking.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::{
    models::{PlanId, Subscription, SubscriptionId, SubscriptionStatus, UserId},
    repository::{PlanRepository, SubscriptionRepository, Transition},
};
use crate::{
    error::{CoreError, Result},
    security::audit::{AuditEvent, AuditEventType, audit_log},
};

/// Result of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Overdue-and-active subscriptions the scan returned.
    pub scanned: u64,
    /// Subscriptions transitioned to EXPIRED.
    pub expired: u64,
    /// Per-item transition attempts that errored (left for the next run).
    pub failed: u64,
}

/// Service owning subscription state transitions.
///
/// Cheap to clone; clones share the underlying repositories.
#[derive(Clone)]
pub struct SubscriptionLifecycle {
    plans: Arc<dyn PlanRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl std::fmt::Debug for SubscriptionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionLifecycle").finish_non_exhaustive()
    }
}

impl SubscriptionLifecycle {
    /// Creates the lifecycle service over the given repositories.
    #[must_use]
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
    ) -> Self {
        Self { plans, subscriptions }
    }

    /// Creates a new active subscription for `user_id` on `plan_id`.
    ///
    /// The subscription starts now and ends `plan.duration_days` later. The
    /// one-active-per-user invariant is enforced by the repository's atomic
    /// insert, not by a read-then-write check here: two racing creates for
    /// the same user resolve to exactly one success.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the plan does not exist and
    /// [`CoreError::Conflict`] if the user already has an active
    /// subscription.
    #[instrument(skip(self), level = "debug")]
    pub async fn create(&self, user_id: UserId, plan_id: &PlanId) -> Result<Subscription> {
        let plan = self
            .plans
            .get(plan_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("plan '{plan_id}'")))?;

        let subscription = Subscription::new(user_id, &plan, Utc::now());
        let subscription = self.subscriptions.insert_unique_active(subscription).await?;

        info!(
            subscription = %subscription.id,
            user = %subscription.user_id,
            plan = %plan.id,
            "subscription created"
        );
        audit_log(
            &AuditEvent::new(AuditEventType::SubscriptionCreated)
                .with_user_id(subscription.user_id.as_str())
                .with_subscription_id(subscription.id.as_str())
                .with_plan_id(plan.id.as_str()),
        );
        Ok(subscription)
    }

    /// Moves an active subscription to a different plan.
    ///
    /// The end date becomes `now + new_plan.duration_days` irrespective of
    /// the previous end date; remaining entitlement on the old plan is
    /// discarded by design.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the subscription or the new plan
    /// does not exist, and [`CoreError::Conflict`] if the subscription is no
    /// longer active (terminal states accept no transitions).
    #[instrument(skip(self), level = "debug")]
    pub async fn change_plan(
        &self,
        id: &SubscriptionId,
        new_plan_id: &PlanId,
    ) -> Result<Subscription> {
        let plan = self
            .plans
            .get(new_plan_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("plan '{new_plan_id}'")))?;

        let now = Utc::now();
        let new_end = now + chrono::Duration::days(i64::from(plan.duration_days));

        match self.subscriptions.change_plan_if_active(id, &plan.id, new_end, now).await? {
            None => Err(CoreError::NotFound(format!("subscription '{id}'"))),
            Some(Transition::Unchanged(sub)) => Err(CoreError::Conflict(format!(
                "subscription '{}' is not active and cannot change plan",
                sub.id
            ))),
            Some(Transition::Applied(sub)) => {
                info!(subscription = %sub.id, plan = %plan.id, "plan changed");
                audit_log(
                    &AuditEvent::new(AuditEventType::SubscriptionPlanChanged)
                        .with_user_id(sub.user_id.as_str())
                        .with_subscription_id(sub.id.as_str())
                        .with_plan_id(plan.id.as_str()),
                );
                Ok(sub)
            }
        }
    }

    /// Cancels a subscription.
    ///
    /// Idempotent: cancelling an already-cancelled subscription is a no-op
    /// that returns the record unchanged; `cancelled_at` keeps the
    /// timestamp of the first cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the subscription does not exist
    /// and [`CoreError::Conflict`] if it has already expired.
    #[instrument(skip(self), level = "debug")]
    pub async fn cancel(&self, id: &SubscriptionId) -> Result<Subscription> {
        match self.subscriptions.cancel_if_active(id, Utc::now()).await? {
            None => Err(CoreError::NotFound(format!("subscription '{id}'"))),
            Some(Transition::Applied(sub)) => {
                info!(subscription = %sub.id, user = %sub.user_id, "subscription cancelled");
                audit_log(
                    &AuditEvent::new(AuditEventType::SubscriptionCancelled)
                        .with_user_id(sub.user_id.as_str())
                        .with_subscription_id(sub.id.as_str()),
                );
                Ok(sub)
            }
            Some(Transition::Unchanged(sub)) if sub.status == SubscriptionStatus::Cancelled => {
                debug!(subscription = %sub.id, "already cancelled, no-op");
                Ok(sub)
            }
            Some(Transition::Unchanged(sub)) => Err(CoreError::Conflict(format!(
                "subscription '{}' has already expired",
                sub.id
            ))),
        }
    }

    /// Returns the user's active subscription, if any.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn active_for_user(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        self.subscriptions.find_active_for_user(user_id).await
    }

    /// Point lookup by subscription ID.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        self.subscriptions.get(id).await
    }

    /// Transitions every overdue active subscription to EXPIRED.
    ///
    /// Each transition re-checks status and end date inside the
    /// repository's transaction, so rows cancelled after the scan are left
    /// alone. Per-item failures are counted and logged, never propagated:
    /// a failed row stays active-but-overdue and self-heals on the next
    /// sweep.
    ///
    /// # Errors
    ///
    /// Returns an error only if the overdue scan itself fails.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let overdue = self.subscriptions.find_overdue(now).await?;

        let mut report = SweepReport { scanned: overdue.len() as u64, ..SweepReport::default() };
        for subscription in overdue {
            match self.subscriptions.expire_if_overdue(&subscription.id, now).await {
                Ok(true) => {
                    report.expired += 1;
                    info!(subscription = %subscription.id, "subscription expired");
                    audit_log(
                        &AuditEvent::new(AuditEventType::SubscriptionExpired)
                            .with_user_id(subscription.user_id.as_str())
                            .with_subscription_id(subscription.id.as_str()),
                    );
                }
                Ok(false) => {
                    debug!(
                        subscription = %subscription.id,
                        "changed state since the scan, skipping"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        subscription = %subscription.id,
                        %error,
                        "expiry failed, will retry on the next sweep"
                    );
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::subscriptions::{
        models::{NewPlan, Plan},
        repository::{InMemoryPlanRepository, InMemorySubscriptionRepository},
    };

    async fn seed_plan(plans: &InMemoryPlanRepository, name: &str, duration_days: u32) -> Plan {
        let now = Utc::now();
        let new = NewPlan {
            name: name.to_owned(),
            description: String::new(),
            price: Decimal::new(1999, 2),
            duration_days,
            features: vec![],
        };
        new.validate().unwrap();
        plans
            .insert(Plan {
                id: PlanId::generate(),
                name: new.name,
                description: new.description,
                price: new.price,
                duration_days: new.duration_days,
                features: new.features,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    fn services() -> (Arc<InMemoryPlanRepository>, Arc<InMemorySubscriptionRepository>, SubscriptionLifecycle)
    {
        let plans = Arc::new(InMemoryPlanRepository::new());
        let subs = Arc::new(InMemorySubscriptionRepository::new());
        let lifecycle =
            SubscriptionLifecycle::new(Arc::clone(&plans) as _, Arc::clone(&subs) as _);
        (plans, subs, lifecycle)
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_create_sets_active_and_end_date() {
        let (plans, _, lifecycle) = services();
        let plan = seed_plan(&plans, "Basic", 30).await;

        let before = Utc::now();
        let sub = lifecycle.create(user("user-1"), &plan.id).await.unwrap();
        let after = Utc::now();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.end_date >= before + chrono::Duration::days(30));
        assert!(sub.end_date <= after + chrono::Duration::days(30));
    }

    #[tokio::test]
    async fn test_create_unknown_plan_is_not_found() {
        let (_, _, lifecycle) = services();
        let result = lifecycle.create(user("user-1"), &PlanId::new("plan-ghost").unwrap()).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_second_active_is_conflict() {
        let (plans, _, lifecycle) = services();
        let plan = seed_plan(&plans, "Basic", 30).await;

        lifecycle.create(user("user-1"), &plan.id).await.unwrap();
        let result = lifecycle.create(user("user-1"), &plan.id).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_create_allowed_after_cancel() {
        let (plans, _, lifecycle) = services();
        let plan = seed_plan(&plans, "Basic", 30).await;

        let sub = lifecycle.create(user("user-1"), &plan.id).await.unwrap();
        lifecycle.cancel(&sub.id).await.unwrap();

        assert!(lifecycle.create(user("user-1"), &plan.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_plan_recomputes_end_from_now() {
        let (plans, _, lifecycle) = services();
        let monthly = seed_plan(&plans, "Monthly", 30).await;
        let annual = seed_plan(&plans, "Annual", 365).await;

        let sub = lifecycle.create(user("user-1"), &monthly.id).await.unwrap();
        let old_end = sub.end_date;

        let before = Utc::now();
        let changed = lifecycle.change_plan(&sub.id, &annual.id).await.unwrap();
        let after = Utc::now();

        assert_eq!(changed.plan_id, annual.id);
        // End date derives from now, not from the previous end date.
        assert!(changed.end_date >= before + chrono::Duration::days(365));
        assert!(changed.end_date <= after + chrono::Duration::days(365));
        assert_ne!(changed.end_date, old_end + chrono::Duration::days(365));
    }

    #[tokio::test]
    async fn test_change_plan_downgrade_discards_remaining_entitlement() {
        let (plans, _, lifecycle) = services();
        let annual = seed_plan(&plans, "Annual", 365).await;
        let monthly = seed_plan(&plans, "Monthly", 30).await;

        let sub = lifecycle.create(user("user-1"), &annual.id).await.unwrap();
        let changed = lifecycle.change_plan(&sub.id, &monthly.id).await.unwrap();

        assert!(changed.end_date < sub.end_date, "downgrade shortens the entitlement");
    }

    #[tokio::test]
    async fn test_change_plan_unknown_targets() {
        let (plans, _, lifecycle) = services();
        let plan = seed_plan(&plans, "Basic", 30).await;
        let sub = lifecycle.create(user("user-1"), &plan.id).await.unwrap();

        let unknown_plan =
            lifecycle.change_plan(&sub.id, &PlanId::new("plan-ghost").unwrap()).await;
        assert!(matches!(unknown_plan, Err(CoreError::NotFound(_))));

        let unknown_sub = lifecycle
            .change_plan(&SubscriptionId::new("sub-ghost").unwrap(), &plan.id)
            .await;
        assert!(matches!(unknown_sub, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_change_plan_on_cancelled_is_conflict() {
        let (plans, _, lifecycle) = services();
        let plan = seed_plan(&plans, "Basic", 30).await;
        let sub = lifecycle.create(user("user-1"), &plan.id).await.unwrap();
        lifecycle.cancel(&sub.id).await.unwrap();

        let result = lifecycle.change_plan(&sub.id, &plan.id).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (plans, _, lifecycle) = services();
        let plan = seed_plan(&plans, "Basic", 30).await;
        let sub = lifecycle.create(user("user-1"), &plan.id).await.unwrap();

        let first = lifecycle.cancel(&sub.id).await.unwrap();
        assert_eq!(first.status, SubscriptionStatus::Cancelled);
        let first_stamp = first.cancelled_at.unwrap();

        let second = lifecycle.cancel(&sub.id).await.unwrap();
        assert_eq!(second.status, SubscriptionStatus::Cancelled);
        assert_eq!(second.cancelled_at, Some(first_stamp), "timestamp unchanged on repeat");
    }

    #[tokio::test]
    async fn test_cancel_expired_is_conflict() {
        let (plans, subs, lifecycle) = services();
        let plan = seed_plan(&plans, "Basic", 30).await;
        let sub = lifecycle.create(user("user-1"), &plan.id).await.unwrap();

        // Age the subscription past its end date, then expire it.
        backdate(&subs, &sub.id, Utc::now() - chrono::Duration::days(31)).await;
        lifecycle.sweep_expired().await.unwrap();

        let result = lifecycle.cancel(&sub.id).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_not_found() {
        let (_, _, lifecycle) = services();
        let result = lifecycle.cancel(&SubscriptionId::new("sub-ghost").unwrap()).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    /// Rewrites a subscription's end date in place, bypassing the lifecycle.
    async fn backdate(
        subs: &InMemorySubscriptionRepository,
        id: &SubscriptionId,
        end_date: DateTime<Utc>,
    ) {
        // The in-memory repository has no raw update; re-insert through the
        // conditional plan-change path with the subscription's own plan.
        let current = subs.get(id).await.unwrap().unwrap();
        subs.change_plan_if_active(id, &current.plan_id, end_date, Utc::now())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_expires_only_overdue_actives() {
        let (plans, subs, lifecycle) = services();
        let plan = seed_plan(&plans, "Basic", 30).await;

        // Created at T0, plan duration 30 days.
        let overdue = lifecycle.create(user("user-1"), &plan.id).await.unwrap();
        backdate(&subs, &overdue.id, Utc::now() - chrono::Duration::days(1)).await;

        let current = lifecycle.create(user("user-2"), &plan.id).await.unwrap();

        let report = lifecycle.sweep_expired().await.unwrap();
        assert_eq!(report, SweepReport { scanned: 1, expired: 1, failed: 0 });

        assert_eq!(
            lifecycle.get(&overdue.id).await.unwrap().unwrap().status,
            SubscriptionStatus::Expired
        );
        // Run at T0+29d leaves the in-window subscription alone.
        assert_eq!(
            lifecycle.get(&current.id).await.unwrap().unwrap().status,
            SubscriptionStatus::Active
        );
    }

    #[tokio::test]
    async fn test_sweep_never_touches_cancelled() {
        let (plans, subs, lifecycle) = services();
        let plan = seed_plan(&plans, "Basic", 30).await;

        let sub = lifecycle.create(user("user-1"), &plan.id).await.unwrap();
        backdate(&subs, &sub.id, Utc::now() - chrono::Duration::days(1)).await;
        let cancelled = lifecycle.cancel(&sub.id).await.unwrap();

        let report = lifecycle.sweep_expired().await.unwrap();
        assert_eq!(report.expired, 0);

        let after = lifecycle.get(&sub.id).await.unwrap().unwrap();
        assert_eq!(after.status, SubscriptionStatus::Cancelled);
        assert_eq!(after.cancelled_at, cancelled.cancelled_at);
    }

    /// Repository wrapper whose `expire_if_overdue` fails for one marked
    /// subscription, for exercising per-item failure isolation.
    struct FailingExpiry {
        inner: Arc<InMemorySubscriptionRepository>,
        poison: SubscriptionId,
    }

    fn store_error() -> CoreError {
        CoreError::StoreUnavailable(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "transaction aborted",
        )))
    }

    #[async_trait]
    impl crate::subscriptions::repository::SubscriptionRepository for FailingExpiry {
        async fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
            self.inner.get(id).await
        }
        async fn find_active_for_user(&self, user_id: &UserId) -> Result<Option<Subscription>> {
            self.inner.find_active_for_user(user_id).await
        }
        async fn insert_unique_active(&self, sub: Subscription) -> Result<Subscription> {
            self.inner.insert_unique_active(sub).await
        }
        async fn change_plan_if_active(
            &self,
            id: &SubscriptionId,
            new_plan_id: &PlanId,
            new_end: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<Option<Transition>> {
            self.inner.change_plan_if_active(id, new_plan_id, new_end, now).await
        }
        async fn cancel_if_active(
            &self,
            id: &SubscriptionId,
            now: DateTime<Utc>,
        ) -> Result<Option<Transition>> {
            self.inner.cancel_if_active(id, now).await
        }
        async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
            self.inner.find_overdue(now).await
        }
        async fn expire_if_overdue(
            &self,
            id: &SubscriptionId,
            now: DateTime<Utc>,
        ) -> Result<bool> {
            if *id == self.poison {
                return Err(store_error());
            }
            self.inner.expire_if_overdue(id, now).await
        }
        async fn count_active_for_plan(&self, plan_id: &PlanId) -> Result<u64> {
            self.inner.count_active_for_plan(plan_id).await
        }
    }

    #[tokio::test]
    async fn test_sweep_isolates_per_item_failures() {
        let plans = Arc::new(InMemoryPlanRepository::new());
        let inner = Arc::new(InMemorySubscriptionRepository::new());
        let plan = seed_plan(&plans, "Basic", 30).await;

        let bootstrap =
            SubscriptionLifecycle::new(Arc::clone(&plans) as _, Arc::clone(&inner) as _);
        let poisoned = bootstrap.create(user("user-1"), &plan.id).await.unwrap();
        let healthy = bootstrap.create(user("user-2"), &plan.id).await.unwrap();
        for sub in [&poisoned, &healthy] {
            backdate(&inner, &sub.id, Utc::now() - chrono::Duration::days(1)).await;
        }

        let lifecycle = SubscriptionLifecycle::new(
            Arc::clone(&plans) as _,
            Arc::new(FailingExpiry { inner: Arc::clone(&inner), poison: poisoned.id.clone() }),
        );

        let report = lifecycle.sweep_expired().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.expired, 1);
        assert_eq!(report.failed, 1);

        // The failed row stays active-but-overdue for the next run.
        assert_eq!(
            inner.get(&poisoned.id).await.unwrap().unwrap().status,
            SubscriptionStatus::Active
        );
        assert_eq!(
            inner.get(&healthy.id).await.unwrap().unwrap().status,
            SubscriptionStatus::Expired
        );
    }
}
