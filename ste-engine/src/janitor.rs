//! Deletion of plan files whose TTL after completion has elapsed.

use std::sync::Arc;
use std::time::Duration;

use crate::EngineInner;
use crate::plan::unix_now;
use crate::registry::PlanRegistry;

/// Periodically sweeps the registry for expired plans.
pub(crate) async fn run(inner: Arc<EngineInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep(&inner.registry, unix_now());
    }
}

/// Removes every registered plan whose transfers are all terminal and whose
/// TTL has elapsed since the latest completion. Returns how many plans were
/// deleted.
pub(crate) fn sweep(registry: &PlanRegistry, now_secs: u64) -> usize {
    let mut removed = 0;
    for ((job_id, part_num), entry) in registry.snapshot() {
        let plan = &entry.plan;
        if !plan.all_terminal() {
            continue;
        }

        let completed_at = plan.latest_completion_time();
        // Parts that never ran any transfer carry no completion timestamp
        // and are left alone.
        if completed_at == 0 {
            continue;
        }

        let ttl = u64::from(plan.header().ttl_after_completion.get());
        if now_secs < completed_at.saturating_add(ttl) {
            continue;
        }

        registry.remove(job_id, part_num);
        match plan.remove_file() {
            Ok(()) => {
                removed += 1;
                tracing::info!(
                    job_id = %job_id,
                    part = %part_num,
                    "deleted expired plan file"
                );
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %job_id,
                    part = %part_num,
                    error = %err,
                    "failed to delete expired plan file"
                );
            }
        }
    }
    removed
}
