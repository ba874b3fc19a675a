//! Subscription and plan data models.
//!
//! Defines the durable entities the lifecycle operates on, with validated
//! identifier newtypes so malformed IDs are rejected at the boundary rather
//! than deep inside a repository.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Maximum identifier length shared by all ID newtypes.
const MAX_ID_LEN: usize = 64;

fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CoreError::Validation(format!("{kind} cannot be empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CoreError::Validation(format!(
            "{kind} must be {MAX_ID_LEN} characters or less"
        )));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(CoreError::Validation(format!(
            "{kind} can only contain alphanumeric characters, hyphens, and underscores"
        )));
    }
    Ok(())
}

/// Unique identifier for a user, issued by the external auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a user ID after validation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the ID is empty, exceeds 64
    /// characters, or contains characters other than alphanumerics, hyphens,
    /// and underscores.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id("user_id", &id)?;
        Ok(Self(id))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a subscription plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(String);

impl PlanId {
    /// Creates a plan ID after validation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] under the same rules as
    /// [`UserId::new`].
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id("plan_id", &id)?;
        Ok(Self(id))
    }

    /// Generates a fresh plan ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("plan-{}", Uuid::new_v4()))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a subscription instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Creates a subscription ID after validation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] under the same rules as
    /// [`UserId::new`].
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        validate_id("subscription_id", &id)?;
        Ok(Self(id))
    }

    /// Generates a fresh subscription ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sub-{}", Uuid::new_v4()))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subscription status.
///
/// `Cancelled` and `Expired` are terminal: no operation transitions out of
/// them. The wire form matches the upstream API contract
/// (`"ACTIVE"`, `"CANCELLED"`, `"EXPIRED"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// Entitlement is live.
    Active,
    /// Terminated by the owner before its end date.
    Cancelled,
    /// Terminated by the expiry sweep after its end date passed.
    Expired,
}

impl SubscriptionStatus {
    /// Whether this status accepts no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

/// A catalog entry describing a purchasable plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan identifier.
    pub id: PlanId,
    /// Unique display name.
    pub name: String,
    /// Plan description.
    pub description: String,
    /// Price per period. Always positive.
    pub price: Decimal,
    /// Entitlement length granted per subscription. Always positive.
    pub duration_days: u32,
    /// Features included in this plan.
    pub features: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a plan.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    /// Unique display name.
    pub name: String,
    /// Plan description.
    pub description: String,
    /// Price per period.
    pub price: Decimal,
    /// Entitlement length in days.
    pub duration_days: u32,
    /// Features included in this plan.
    #[serde(default)]
    pub features: Vec<String>,
}

impl NewPlan {
    /// Validates plan invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the name is empty, the price is
    /// not positive, or the duration is zero.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("plan name cannot be empty".to_owned()));
        }
        if self.price <= Decimal::ZERO {
            return Err(CoreError::Validation("plan price must be positive".to_owned()));
        }
        if self.duration_days == 0 {
            return Err(CoreError::Validation("plan duration_days must be positive".to_owned()));
        }
        Ok(())
    }
}

/// Partial update for a plan. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanPatch {
    /// New display name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New price.
    pub price: Option<Decimal>,
    /// New entitlement length in days.
    pub duration_days: Option<u32>,
    /// Replacement feature list.
    pub features: Option<Vec<String>>,
}

/// One user's entitlement to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique subscription identifier.
    pub id: SubscriptionId,
    /// Owning user.
    pub user_id: UserId,
    /// Plan granting the entitlement.
    pub plan_id: PlanId,
    /// Current lifecycle status.
    pub status: SubscriptionStatus,
    /// When the entitlement began.
    pub start_date: DateTime<Utc>,
    /// When the entitlement lapses unless renewed.
    pub end_date: DateTime<Utc>,
    /// When the owner cancelled, if ever. Written once.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Builds a new active subscription starting at `start` and running for
    /// the plan's duration.
    #[must_use]
    pub fn new(user_id: UserId, plan: &Plan, start: DateTime<Utc>) -> Self {
        Self {
            id: SubscriptionId::generate(),
            user_id,
            plan_id: plan.id.clone(),
            status: SubscriptionStatus::Active,
            start_date: start,
            end_date: start + chrono::Duration::days(i64::from(plan.duration_days)),
            cancelled_at: None,
            created_at: start,
            updated_at: start,
        }
    }

    /// Whether the entitlement window has lapsed at `now`.
    ///
    /// Status is not consulted: an overdue cancelled subscription is overdue
    /// but not sweep-eligible.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.end_date < now
    }
}
