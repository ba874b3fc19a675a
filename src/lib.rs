//! Resilient subscription management core.
//!
//! `subcore` implements the coordination layer of a subscription-management
//! backend: the subscription lifecycle state machine plus the resilience
//! mechanisms (TTL cache, fixed-window rate limiter, and circuit breaker)
//! that keep it correct under concurrent requests from horizontally
//! replicated processes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  HTTP transport  │  external: routing, auth, schema validation
//! └────────┬─────────┘
//!          │ authenticated caller identity
//! ┌────────▼─────────────────────────────────────────────┐
//! │                 subcore (this crate)                 │
//! │  ┌─────────────┐  ┌──────────┐  ┌────────────────┐  │
//! │  │ RateLimiter  │  │ TtlCache │  │ CircuitBreaker │  │
//! │  └──────┬──────┘  └────┬─────┘  └───────┬────────┘  │
//! │         └───────┬──────┴────────────────┘           │
//! │                 ▼                                   │
//! │        CounterStore (shared, Redis-shaped)          │
//! │                                                     │
//! │  ┌───────────────────────┐  ┌──────────────────┐    │
//! │  │ SubscriptionLifecycle │◄─┤  ExpirySweeper   │    │
//! │  └──────────┬────────────┘  └──────────────────┘    │
//! │             ▼                                       │
//! │   Plan/Subscription repositories (durable store)    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! No in-process memory is trusted for cross-replica correctness: the
//! limiter, breaker, and cache coordinate exclusively through the shared
//! store's atomic primitives (INCR, compare-and-swap, TTL expiry), and the
//! lifecycle's invariants live in the durable store's conditional mutations.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use subcore::{
//!     store::MemoryCounterStore,
//!     subscriptions::{
//!         InMemoryPlanRepository, InMemorySubscriptionRepository, NewPlan, PlanAdmin,
//!         SubscriptionLifecycle, UserId,
//!     },
//! };
//!
//! # async fn example() -> subcore::error::Result<()> {
//! let plans = Arc::new(InMemoryPlanRepository::new());
//! let subs = Arc::new(InMemorySubscriptionRepository::new());
//!
//! // Administrative: publish a plan.
//! let admin = PlanAdmin::new(Arc::clone(&plans) as _, Arc::clone(&subs) as _);
//! let plan = admin
//!     .create_plan(NewPlan {
//!         name: "Basic".to_owned(),
//!         description: "Entry tier".to_owned(),
//!         price: "9.99".parse().expect("decimal"),
//!         duration_days: 30,
//!         features: vec![],
//!     })
//!     .await?;
//!
//! // Request path: subscribe a user.
//! let lifecycle = SubscriptionLifecycle::new(Arc::clone(&plans) as _, Arc::clone(&subs) as _);
//! let subscription = lifecycle.create(UserId::new("user-1")?, &plan.id).await?;
//! println!("{} runs until {}", subscription.id, subscription.end_date);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`subscriptions`]: lifecycle state machine, plan catalog, expiry sweep,
//!   durable store contracts
//! - [`store`]: shared counter store contract with Redis and in-memory
//!   implementations
//! - [`cache`]: TTL cache over the shared store
//! - [`security`]: fixed-window rate limiting and audit logging
//! - [`reliability`]: shared-state circuit breaker
//! - [`config`]: TOML-deserializable settings
//! - [`error`]: error taxonomy with recovery guidance
//!
//! # Error Handling
//!
//! All operations return [`Result<T, CoreError>`](error::Result). Admission
//! rejections ([`RateLimitExceeded`](error::CoreError::RateLimitExceeded),
//! [`CircuitOpen`](error::CoreError::CircuitOpen)) are distinct from domain
//! errors ([`NotFound`](error::CoreError::NotFound),
//! [`Conflict`](error::CoreError::Conflict)) and from infrastructure
//! failures ([`StoreUnavailable`](error::CoreError::StoreUnavailable)), so
//! the transport layer can map each to its own status code.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cache;
pub mod config;
pub mod error;
pub mod reliability;
pub mod security;
pub mod store;
pub mod subscriptions;

pub use error::{CoreError, Result};
pub use subscriptions::{ExpirySweeper, PlanAdmin, SubscriptionLifecycle};
