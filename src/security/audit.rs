//! Audit logging for security-relevant events.
//!
//! Provides structured audit events with identity redaction and unique
//! correlation IDs. Events are emitted as single JSON lines on the `audit`
//! tracing target so deployments can route them to a dedicated sink.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of auditable events.
///
/// Each variant represents an operation worth tracking for compliance and
/// incident response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// A subscription was created.
    SubscriptionCreated,
    /// A subscription moved to a different plan.
    SubscriptionPlanChanged,
    /// A subscription was cancelled by its owner.
    SubscriptionCancelled,
    /// The expiry sweep transitioned a subscription to expired.
    SubscriptionExpired,
    /// An administrative plan mutation (create/update/delete) was applied.
    PlanMutated,
    /// A caller exhausted its rate-limit window.
    RateLimitExceeded,
    /// A circuit breaker changed state.
    CircuitBreakerStateChanged,
}

/// Contextual details attached to an audit event.
///
/// Fields are optional and omitted from the serialized form when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditDetails {
    /// Owning user, if the event concerns a subscription.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Subscription the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// Plan the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// Caller identity (redact before attaching, see [`redact_identity`]).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Circuit breaker name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker: Option<String>,
    /// Breaker state after the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Error message, if the event records a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single auditable event.
///
/// # Examples
///
/// ```
/// use subcore::security::audit::{AuditEvent, AuditEventType, audit_log};
///
/// let event = AuditEvent::new(AuditEventType::SubscriptionCancelled)
///     .with_user_id("user-42")
///     .with_subscription_id("sub-7");
/// audit_log(&event);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred.
    pub timestamp: SystemTime,
    /// What happened.
    pub event_type: AuditEventType,
    /// Correlation ID for tracking the event across operations.
    pub request_id: Uuid,
    /// Contextual details.
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Creates an event with a fresh correlation ID.
    #[must_use]
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            request_id: Uuid::new_v4(),
            details: AuditDetails::default(),
        }
    }

    /// Attaches the owning user.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "Into<String> is idiomatic for builders")]
    pub fn with_user_id(mut self, id: impl Into<String>) -> Self {
        self.details.user_id = Some(id.into());
        self
    }

    /// Attaches the subscription.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "Into<String> is idiomatic for builders")]
    pub fn with_subscription_id(mut self, id: impl Into<String>) -> Self {
        self.details.subscription_id = Some(id.into());
        self
    }

    /// Attaches the plan.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "Into<String> is idiomatic for builders")]
    pub fn with_plan_id(mut self, id: impl Into<String>) -> Self {
        self.details.plan_id = Some(id.into());
        self
    }

    /// Attaches a caller identity. Redact it first with [`redact_identity`].
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "Into<String> is idiomatic for builders")]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.details.identity = Some(identity.into());
        self
    }

    /// Attaches a circuit breaker name and its state after the transition.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "Into<String> is idiomatic for builders")]
    pub fn with_breaker(mut self, name: impl Into<String>, state: impl Into<String>) -> Self {
        self.details.breaker = Some(name.into());
        self.details.state = Some(state.into());
        self
    }

    /// Attaches an error message.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "Into<String> is idiomatic for builders")]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.details.error = Some(error.into());
        self
    }
}

/// Emits an audit event on the `audit` tracing target.
pub fn audit_log(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(json) => tracing::info!(target: "audit", event = %json),
        Err(error) => tracing::warn!(target: "audit", %error, "failed to serialize audit event"),
    }
}

/// Partially redacts a caller identity for logging.
///
/// Keeps the first four characters and replaces the rest with `****`, so
/// events remain correlatable without storing full client addresses.
///
/// # Examples
///
/// ```
/// use subcore::security::audit::redact_identity;
///
/// assert_eq!(redact_identity("192.168.12.40"), "192.****");
/// assert_eq!(redact_identity("ab"), "****");
/// ```
#[must_use]
pub fn redact_identity(identity: &str) -> String {
    if identity.chars().count() <= 4 {
        return "****".to_owned();
    }
    let prefix: String = identity.chars().take(4).collect();
    format!("{prefix}****")
}
