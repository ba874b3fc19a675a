//! Periodic expiry sweep.
//!
//! Deployments with an external scheduler (cron, a job queue's beat process)
//! call [`ExpirySweeper::run`] on their own cadence; self-contained binaries
//! can hand the sweeper to [`ExpirySweeper::spawn`] and let a tokio interval
//! drive it. Either way the sweep runs concurrently with request traffic;
//! the lifecycle's conditional transitions make that safe.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use super::lifecycle::{SubscriptionLifecycle, SweepReport};

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Periodic job that expires overdue subscriptions.
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    lifecycle: SubscriptionLifecycle,
    interval: Duration,
}

impl ExpirySweeper {
    /// Creates a sweeper with the default one-hour interval.
    #[must_use]
    pub fn new(lifecycle: SubscriptionLifecycle) -> Self {
        Self { lifecycle, interval: DEFAULT_SWEEP_INTERVAL }
    }

    /// Overrides the interval used by [`spawn`](Self::spawn).
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one sweep.
    ///
    /// Never fails: per-item errors are isolated inside the sweep, and a
    /// failed scan is logged and reported as an empty run. Every overdue row
    /// left behind is retried on the next invocation.
    #[instrument(skip(self))]
    pub async fn run(&self) -> SweepReport {
        match self.lifecycle.sweep_expired().await {
            Ok(report) => {
                if report.scanned > 0 {
                    info!(
                        scanned = report.scanned,
                        expired = report.expired,
                        failed = report.failed,
                        "expiry sweep finished"
                    );
                }
                report
            }
            Err(err) => {
                error!(error = %err, "expiry sweep scan failed, retrying next interval");
                SweepReport::default()
            }
        }
    }

    /// Drives [`run`](Self::run) on a fixed tokio interval until the handle
    /// is aborted or dropped by the caller.
    ///
    /// The first tick fires after one full interval; missed ticks (a sweep
    /// outlasting the interval) are coalesced rather than bursted.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval() yields immediately; consume the first tick so the
            // initial sweep waits one full period.
            timer.tick().await;
            loop {
                timer.tick().await;
                let _ = self.run().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::subscriptions::{
        models::{Plan, PlanId, UserId},
        repository::{
            InMemoryPlanRepository, InMemorySubscriptionRepository, PlanRepository,
            SubscriptionRepository,
        },
    };

    async fn seeded() -> (Arc<InMemorySubscriptionRepository>, ExpirySweeper) {
        let plans = Arc::new(InMemoryPlanRepository::new());
        let subs = Arc::new(InMemorySubscriptionRepository::new());
        let now = Utc::now();
        let plan = plans
            .insert(Plan {
                id: PlanId::new("plan-basic").unwrap(),
                name: "Basic".to_owned(),
                description: String::new(),
                price: Decimal::new(999, 2),
                duration_days: 30,
                features: vec![],
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let lifecycle =
            SubscriptionLifecycle::new(Arc::clone(&plans) as _, Arc::clone(&subs) as _);
        let sub = lifecycle.create(UserId::new("user-1").unwrap(), &plan.id).await.unwrap();
        subs.change_plan_if_active(
            &sub.id,
            &plan.id,
            Utc::now() - chrono::Duration::days(1),
            Utc::now(),
        )
        .await
        .unwrap();

        (subs, ExpirySweeper::new(lifecycle))
    }

    #[tokio::test]
    async fn test_run_reports_expired_rows() {
        let (subs, sweeper) = seeded().await;

        let report = sweeper.run().await;
        assert_eq!(report.expired, 1);

        let all_expired = subs.find_overdue(Utc::now()).await.unwrap();
        assert!(all_expired.is_empty(), "no overdue actives left after the sweep");
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let (_, sweeper) = seeded().await;

        assert_eq!(sweeper.run().await.expired, 1);
        assert_eq!(sweeper.run().await, SweepReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_fires_on_interval() {
        let (subs, sweeper) = seeded().await;
        let handle = Arc::new(sweeper.with_interval(Duration::from_secs(3600))).spawn();
        // Let the spawned task run once so its interval timer anchors at the
        // paused clock's start before we advance virtual time.
        tokio::task::yield_now().await;

        // Nothing happens before the first interval elapses.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(subs.find_overdue(Utc::now()).await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(3600)).await;
        // Let the spawned task run its sweep.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let remaining = subs.find_overdue(Utc::now()).await.unwrap();
        assert!(remaining.is_empty(), "sweep fired after one interval");
        handle.abort();
    }

    #[tokio::test]
    async fn test_expired_rows_reach_terminal_state() {
        let (subs, sweeper) = seeded().await;
        sweeper.run().await;

        let user = UserId::new("user-1").unwrap();
        assert!(subs.find_active_for_user(&user).await.unwrap().is_none());

        let sub = subs.find_overdue(Utc::now()).await.unwrap();
        assert!(sub.is_empty(), "expired rows are no longer sweep-eligible");

        // Terminal: another sweep finds nothing to do.
        let report = sweeper.run().await;
        assert_eq!(report.scanned, 0);
    }
}
