//! Administrative plan catalog operations.
//!
//! Plans are immutable-ish catalog entries: only administrative callers
//! create, update, or delete them, and every mutation re-validates the plan
//! invariants (positive price, positive duration, unique non-empty name).
//!
//! Read paths are the crate's canonical cache consumers: when constructed
//! with a [`TtlCache`], `get_plan` and `list_plans` memoize under
//! `plans:*` keys and every mutation invalidates the whole prefix.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use super::{
    models::{NewPlan, Plan, PlanId, PlanPatch},
    repository::{PlanRepository, SubscriptionRepository},
};
use crate::{
    cache::{TtlCache, cache_key},
    error::{CoreError, Result},
    security::audit::{AuditEvent, AuditEventType, audit_log},
};

/// Administrative service over the plan catalog.
#[derive(Clone)]
pub struct PlanAdmin {
    plans: Arc<dyn PlanRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    cache: Option<TtlCache>,
}

impl std::fmt::Debug for PlanAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanAdmin").field("cached", &self.cache.is_some()).finish_non_exhaustive()
    }
}

impl PlanAdmin {
    /// Creates the service without read caching.
    #[must_use]
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
    ) -> Self {
        Self { plans, subscriptions, cache: None }
    }

    /// Enables read caching through the given cache.
    #[must_use]
    pub fn with_cache(mut self, cache: TtlCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Creates a plan.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the input violates plan
    /// invariants and [`CoreError::Conflict`] if the name is taken.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create_plan(&self, new: NewPlan) -> Result<Plan> {
        new.validate()?;
        let now = Utc::now();
        let plan = self
            .plans
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
            .await?;

        self.invalidate_reads().await;
        info!(plan = %plan.id, "plan created");
        audit_log(&AuditEvent::new(AuditEventType::PlanMutated).with_plan_id(plan.id.as_str()));
        Ok(plan)
    }

    /// Applies a partial update to a plan, re-validating invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown plan,
    /// [`CoreError::Validation`] if the patched plan violates invariants,
    /// and [`CoreError::Conflict`] on a name collision.
    #[instrument(skip(self, patch))]
    pub async fn update_plan(&self, id: &PlanId, patch: PlanPatch) -> Result<Plan> {
        let mut plan = self
            .plans
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("plan '{id}'")))?;

        if let Some(name) = patch.name {
            plan.name = name;
        }
        if let Some(description) = patch.description {
            plan.description = description;
        }
        if let Some(price) = patch.price {
            plan.price = price;
        }
        if let Some(duration_days) = patch.duration_days {
            plan.duration_days = duration_days;
        }
        if let Some(features) = patch.features {
            plan.features = features;
        }
        NewPlan {
            name: plan.name.clone(),
            description: plan.description.clone(),
            price: plan.price,
            duration_days: plan.duration_days,
            features: plan.features.clone(),
        }
        .validate()?;
        plan.updated_at = Utc::now();

        let plan = self.plans.update(plan).await?;
        self.invalidate_reads().await;
        info!(plan = %plan.id, "plan updated");
        audit_log(&AuditEvent::new(AuditEventType::PlanMutated).with_plan_id(plan.id.as_str()));
        Ok(plan)
    }

    /// Deletes a plan.
    ///
    /// A plan still referenced by active subscriptions cannot be deleted;
    /// entitlements must not dangle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown plan and
    /// [`CoreError::Conflict`] while active subscriptions reference it.
    #[instrument(skip(self))]
    pub async fn delete_plan(&self, id: &PlanId) -> Result<()> {
        let live = self.subscriptions.count_active_for_plan(id).await?;
        if live > 0 {
            return Err(CoreError::Conflict(format!(
                "plan '{id}' has {live} active subscription(s)"
            )));
        }
        if !self.plans.delete(id).await? {
            return Err(CoreError::NotFound(format!("plan '{id}'")));
        }

        self.invalidate_reads().await;
        info!(plan = %id, "plan deleted");
        audit_log(&AuditEvent::new(AuditEventType::PlanMutated).with_plan_id(id.as_str()));
        Ok(())
    }

    /// Fetches a plan, memoized when a cache is configured.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] for an unknown plan.
    pub async fn get_plan(&self, id: &PlanId) -> Result<Plan> {
        let fetch = || async {
            self.plans
                .get(id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("plan '{id}'")))
        };
        match &self.cache {
            Some(cache) => {
                cache.get_or_compute(&cache_key("plans:get", &[id.as_str()]), None, fetch).await
            }
            None => fetch().await,
        }
    }

    /// Lists the catalog, memoized when a cache is configured.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn list_plans(&self) -> Result<Vec<Plan>> {
        let fetch = || async { self.plans.list().await };
        match &self.cache {
            Some(cache) => cache.get_or_compute(&cache_key("plans:list", &[]), None, fetch).await,
            None => fetch().await,
        }
    }

    /// Drops all memoized plan reads after a mutation.
    ///
    /// Best-effort: a failed invalidation only extends staleness to the
    /// entry TTL.
    async fn invalidate_reads(&self) {
        if let Some(cache) = &self.cache
            && let Err(error) = cache.invalidate_matching("plans:*").await
        {
            tracing::warn!(%error, "failed to invalidate plan cache");
        }
    }
}
