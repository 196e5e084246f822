//! Background finalization and outbox dispatch.
//!
//! Each tick does two passes:
//!
//! 1. Auto-confirm PENDING scores whose last submission is older than 24
//!    hours, then kick the rating task for each.
//! 2. Drain the notification outbox (push + email delivery).
//!
//! A transaction-scoped advisory lock keeps multiple scheduler instances
//! from finalizing the same batch; the outbox pass relies on SKIP LOCKED
//! instead. Both passes log failures and keep ticking.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::time;

use crate::email::EmailService;
use crate::notifier::{self, PushService};
use crate::store::score;
use crate::telemetry::log_error;
use crate::time::TimeSource;

pub struct Scheduler {
    pool: PgPool,
    time_source: TimeSource,
    tick_interval: Duration,
    push_service: Arc<PushService>,
    email_service: Arc<EmailService>,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        time_source: TimeSource,
        tick_interval: Duration,
        push_service: Arc<PushService>,
        email_service: Arc<EmailService>,
    ) -> Self {
        Self {
            pool,
            time_source,
            tick_interval,
            push_service,
            email_service,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.tick_interval);
        loop {
            interval.tick().await;
            let _ = schedule_tick(
                &self.pool,
                &self.time_source,
                &self.push_service,
                &self.email_service,
            )
            .await
            .map_err(log_error);
        }
    }
}

/// Update state once right now.
#[tracing::instrument(skip_all)]
pub async fn schedule_tick(
    pool: &PgPool,
    time_source: &TimeSource,
    push_service: &PushService,
    email_service: &EmailService,
) -> anyhow::Result<()> {
    let _ = finalize_stale_scores(pool, time_source)
        .await
        .map_err(log_error);

    let _ = notifier::dispatch_pending(pool, push_service, email_service)
        .await
        .map_err(log_error);

    Ok(())
}

/// Auto-confirm stale pending scores under an advisory lock, then spawn
/// the rating task for each confirmed match.
#[tracing::instrument(skip_all)]
pub async fn finalize_stale_scores(
    pool: &PgPool,
    time_source: &TimeSource,
) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;

    // One finalizer at a time across scheduler instances; skip the pass
    // instead of queueing behind a peer.
    let acquired: bool = sqlx::query_scalar(
        "SELECT pg_try_advisory_xact_lock(
            hashtextextended('score_finalizer', 0)
        )",
    )
    .fetch_one(&mut *tx)
    .await?;
    if !acquired {
        return Ok(0);
    }

    let confirmed = score::auto_confirm_stale_scores(time_source, &mut tx)
        .await?;
    tx.commit().await?;

    for reservation_id in &confirmed {
        score::spawn_rating_update(pool.clone(), *reservation_id);
    }

    if !confirmed.is_empty() {
        tracing::info!(
            count = confirmed.len(),
            "auto-confirmed stale scores"
        );
    }
    Ok(confirmed.len() as u64)
}
