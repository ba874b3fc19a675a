//! Admission control and audit logging.
//!
//! Provides per-identity fixed-window rate limiting and structured audit
//! events for security-relevant operations.

pub mod audit;
mod rate_limit;

pub use rate_limit::{RATE_LIMIT_WINDOW, RateLimitConfig, RateLimiter, WindowStatus};
