use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};

use crate::config;
use crate::error::SubscriptionError;
use crate::store::SandboxStore;

use super::models::{BillingOutcome, RunnerReport};
use super::service::SubscriptionService;

/// key: billing-runner -> periodic batch driver
pub fn spawn(subscriptions: Arc<SubscriptionService>, store: Arc<dyn SandboxStore>) {
    let interval = TokioDuration::from_secs(*config::BILLING_RUN_INTERVAL_SECS);
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            match process_tick(&subscriptions, &store, Utc::now()).await {
                Ok(report) if report.selected > 0 || report.cancelled > 0 => {
                    info!(?report, "billing tick complete");
                }
                Ok(_) => debug!("billing tick found nothing due"),
                Err(err) => warn!(?err, "billing tick failed"),
            }
        }
    });
}

/// Bills every due subscription once. Distinct subscriptions run
/// concurrently; same-id runs serialize inside the lifecycle manager, so an
/// overlapping tick cannot double-bill. Per-subscription failures are
/// tallied, never fatal to the tick.
///
/// Selection is {trialing, active} only: past_due subscriptions are excluded
/// and will not self-heal here (see DESIGN.md).
pub async fn process_tick(
    subscriptions: &Arc<SubscriptionService>,
    store: &Arc<dyn SandboxStore>,
    now: DateTime<Utc>,
) -> Result<RunnerReport> {
    let due = store.due_subscriptions(now).await?;
    let mut report = RunnerReport {
        selected: due.len(),
        ..RunnerReport::default()
    };

    let mut tasks = Vec::with_capacity(due.len());
    for subscription in due {
        let service = subscriptions.clone();
        tasks.push(tokio::spawn(async move {
            let outcome = service.process_billing_at(subscription.id, now).await;
            (subscription.id, outcome)
        }));
    }

    for joined in join_all(tasks).await {
        match joined {
            Ok((_, Ok(BillingOutcome::Billed { .. }))) => report.billed += 1,
            Ok((_, Ok(BillingOutcome::TrialSkipped { .. }))) => report.trial_skipped += 1,
            // Lost the race against another caller for this cycle; nothing to do.
            Ok((id, Err(SubscriptionError::NotDue)))
            | Ok((id, Err(SubscriptionError::NotActive { .. }))) => {
                debug!(subscription = %id, "skipped; already handled elsewhere");
            }
            Ok((id, Err(err))) => {
                report.failed += 1;
                warn!(subscription = %id, %err, "billing pass failed");
            }
            Err(err) => {
                report.failed += 1;
                warn!(?err, "billing task panicked");
            }
        }
    }

    for subscription in store.period_end_cancellations(now).await? {
        match subscriptions
            .finalize_period_end_cancellation(subscription.id, now)
            .await
        {
            Ok(Some(_)) => report.cancelled += 1,
            Ok(None) => {}
            Err(err) => warn!(
                subscription = %subscription.id,
                %err,
                "failed to finalize period-end cancellation"
            ),
        }
    }

    Ok(report)
}
