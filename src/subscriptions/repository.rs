//! Durable store contracts for plans and subscriptions.
//!
//! The relational store is an external collaborator: deployments implement
//! these traits over their database, and the in-memory implementations here
//! serve tests and local development. The contracts are deliberately shaped
//! around *conditional* mutations: the lifecycle's invariants live in the
//! repository's atomicity, not in read-then-write sequences in application
//! code:
//!
//! - [`SubscriptionRepository::insert_unique_active`] must atomically reject
//!   a second active subscription for a user. In SQL terms: a partial unique
//!   index on `(user_id) WHERE status = 'ACTIVE'`, with the insert and the
//!   constraint check in one transaction.
//! - The `*_if_active` / [`expire_if_overdue`](SubscriptionRepository::expire_if_overdue)
//!   mutations re-check the row's status inside the same transaction as the
//!   update, so a cancellation racing the expiry sweep can never be
//!   overwritten.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{Plan, PlanId, Subscription, SubscriptionId, SubscriptionStatus, UserId};
use crate::error::{CoreError, Result};

/// Outcome of a conditional subscription mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The condition held and the row was updated.
    Applied(Subscription),
    /// The condition did not hold; the row is returned unmodified so the
    /// caller can decide what the refusal means.
    Unchanged(Subscription),
}

/// Contract of the plan store.
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Point lookup by ID.
    async fn get(&self, id: &PlanId) -> Result<Option<Plan>>;

    /// Returns the full catalog.
    async fn list(&self) -> Result<Vec<Plan>>;

    /// Inserts a plan, atomically failing on a duplicate name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] if another plan already carries the
    /// name.
    async fn insert(&self, plan: Plan) -> Result<Plan>;

    /// Replaces a plan, keeping the name-uniqueness invariant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the plan does not exist and
    /// [`CoreError::Conflict`] if the new name collides with another plan.
    async fn update(&self, plan: Plan) -> Result<Plan>;

    /// Removes a plan. Returns `false` if it did not exist.
    async fn delete(&self, id: &PlanId) -> Result<bool>;
}

/// Contract of the subscription store.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Point lookup by ID.
    async fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>>;

    /// Returns the user's active subscription, if any.
    async fn find_active_for_user(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// Inserts an active subscription, atomically enforcing at most one
    /// active subscription per user.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] if the user already holds an active
    /// subscription.
    async fn insert_unique_active(&self, subscription: Subscription) -> Result<Subscription>;

    /// Moves an ACTIVE subscription to `new_plan_id` with `new_end`,
    /// stamping `updated_at = now`. `None` if the subscription is unknown.
    async fn change_plan_if_active(
        &self,
        id: &SubscriptionId,
        new_plan_id: &PlanId,
        new_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>>;

    /// Moves an ACTIVE subscription to CANCELLED with `cancelled_at = now`.
    /// `None` if the subscription is unknown.
    async fn cancel_if_active(
        &self,
        id: &SubscriptionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>>;

    /// Returns every subscription with status ACTIVE and `end_date < now`.
    async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>>;

    /// Moves one subscription to EXPIRED if it is still ACTIVE with
    /// `end_date < now`, re-checked inside the same transaction. Returns
    /// whether the transition happened.
    async fn expire_if_overdue(&self, id: &SubscriptionId, now: DateTime<Utc>) -> Result<bool>;

    /// Counts ACTIVE subscriptions referencing a plan.
    async fn count_active_for_plan(&self, plan_id: &PlanId) -> Result<u64>;
}

/// In-memory plan store.
///
/// A mutex over a map stands in for the database's transaction; every
/// conditional check-and-mutate runs under one lock acquisition.
#[derive(Debug, Default)]
pub struct InMemoryPlanRepository {
    plans: Mutex<HashMap<PlanId, Plan>>,
}

impl InMemoryPlanRepository {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn get(&self, id: &PlanId) -> Result<Option<Plan>> {
        let plans = self.plans.lock().expect("plan store mutex poisoned");
        Ok(plans.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Plan>> {
        let plans = self.plans.lock().expect("plan store mutex poisoned");
        let mut all: Vec<Plan> = plans.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn insert(&self, plan: Plan) -> Result<Plan> {
        let mut plans = self.plans.lock().expect("plan store mutex poisoned");
        if plans.values().any(|existing| existing.name == plan.name) {
            return Err(CoreError::Conflict(format!("plan name '{}' already exists", plan.name)));
        }
        plans.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    async fn update(&self, plan: Plan) -> Result<Plan> {
        let mut plans = self.plans.lock().expect("plan store mutex poisoned");
        if !plans.contains_key(&plan.id) {
            return Err(CoreError::NotFound(format!("plan '{}'", plan.id)));
        }
        if plans
            .values()
            .any(|existing| existing.id != plan.id && existing.name == plan.name)
        {
            return Err(CoreError::Conflict(format!("plan name '{}' already exists", plan.name)));
        }
        plans.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    async fn delete(&self, id: &PlanId) -> Result<bool> {
        let mut plans = self.plans.lock().expect("plan store mutex poisoned");
        Ok(plans.remove(id).is_some())
    }
}

/// In-memory subscription store.
///
/// The single mutex provides the atomicity the contract demands of a real
/// implementation's transactions and unique index.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionRepository {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
}

impl InMemorySubscriptionRepository {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        let subs = self.subscriptions.lock().expect("subscription store mutex poisoned");
        Ok(subs.get(id).cloned())
    }

    async fn find_active_for_user(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let subs = self.subscriptions.lock().expect("subscription store mutex poisoned");
        Ok(subs
            .values()
            .find(|sub| {
                sub.user_id == *user_id && sub.status == SubscriptionStatus::Active
            })
            .cloned())
    }

    async fn insert_unique_active(&self, subscription: Subscription) -> Result<Subscription> {
        // Check and insert under one lock: the analog of a partial unique
        // index on (user_id) WHERE status = 'ACTIVE'.
        let mut subs = self.subscriptions.lock().expect("subscription store mutex poisoned");
        if subs.values().any(|existing| {
            existing.user_id == subscription.user_id
                && existing.status == SubscriptionStatus::Active
        }) {
            return Err(CoreError::Conflict(format!(
                "user '{}' already has an active subscription",
                subscription.user_id
            )));
        }
        subs.insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn change_plan_if_active(
        &self,
        id: &SubscriptionId,
        new_plan_id: &PlanId,
        new_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>> {
        let mut subs = self.subscriptions.lock().expect("subscription store mutex poisoned");
        let Some(sub) = subs.get_mut(id) else {
            return Ok(None);
        };
        if sub.status != SubscriptionStatus::Active {
            return Ok(Some(Transition::Unchanged(sub.clone())));
        }
        sub.plan_id = new_plan_id.clone();
        sub.end_date = new_end;
        sub.updated_at = now;
        Ok(Some(Transition::Applied(sub.clone())))
    }

    async fn cancel_if_active(
        &self,
        id: &SubscriptionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>> {
        let mut subs = self.subscriptions.lock().expect("subscription store mutex poisoned");
        let Some(sub) = subs.get_mut(id) else {
            return Ok(None);
        };
        if sub.status != SubscriptionStatus::Active {
            return Ok(Some(Transition::Unchanged(sub.clone())));
        }
        sub.status = SubscriptionStatus::Cancelled;
        sub.cancelled_at = Some(now);
        sub.updated_at = now;
        Ok(Some(Transition::Applied(sub.clone())))
    }

    async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.lock().expect("subscription store mutex poisoned");
        Ok(subs
            .values()
            .filter(|sub| sub.status == SubscriptionStatus::Active && sub.is_overdue(now))
            .cloned()
            .collect())
    }

    async fn expire_if_overdue(&self, id: &SubscriptionId, now: DateTime<Utc>) -> Result<bool> {
        let mut subs = self.subscriptions.lock().expect("subscription store mutex poisoned");
        let Some(sub) = subs.get_mut(id) else {
            return Ok(false);
        };
        // Re-check under the lock: the sweep's scan result may be stale.
        if sub.status != SubscriptionStatus::Active || !sub.is_overdue(now) {
            return Ok(false);
        }
        sub.status = SubscriptionStatus::Expired;
        sub.updated_at = now;
        Ok(true)
    }

    async fn count_active_for_plan(&self, plan_id: &PlanId) -> Result<u64> {
        let subs = self.subscriptions.lock().expect("subscription store mutex poisoned");
        Ok(subs
            .values()
            .filter(|sub| {
                sub.plan_id == *plan_id && sub.status == SubscriptionStatus::Active
            })
            .count() as u64)
    }
}
