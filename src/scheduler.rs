use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::engine::ReviewEngine;

/// Start the periodic lock sweep.
///
/// `cron_expr` uses the six-field format ("second minute hour day month
/// day_of_week"). The sweep only reclaims memory and reports expiries;
/// correctness never depends on it running.
pub async fn start_lock_sweep(engine: Arc<ReviewEngine>, cron_expr: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    info!("Scheduling lock sweep (cron: {})", cron_expr);
    let job = Job::new_async(cron_expr, move |_uuid, _l| {
        let engine = Arc::clone(&engine);

        Box::pin(async move {
            let expired = engine.sweep_expired_locks();
            debug!("⏰ Lock sweep finished, {} locks expired", expired);
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!("✓ Scheduler started");

    Ok(scheduler)
}
