//! Subscription domain: entities, repositories, lifecycle, and expiry sweep.
//!
//! The lifecycle state machine and the plan catalog operate against durable
//! store contracts ([`PlanRepository`], [`SubscriptionRepository`]); the
//! in-memory implementations back tests and local development.

pub mod lifecycle;
pub mod models;
pub mod plans;
pub mod repository;
pub mod sweeper;

pub use lifecycle::{SubscriptionLifecycle, SweepReport};
pub use models::{
    NewPlan, Plan, PlanId, PlanPatch, Subscription, SubscriptionId, SubscriptionStatus, UserId,
};
pub use plans::PlanAdmin;
pub use repository::{
    InMemoryPlanRepository, InMemorySubscriptionRepository, PlanRepository,
    SubscriptionRepository, Transition,
};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, ExpirySweeper};
