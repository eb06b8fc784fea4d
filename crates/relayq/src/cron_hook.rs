//! The cron-enqueue hook, invoked by the `Processor` at the head of each
//! cycle and exposed on the `Queue` façade for manual triggering.

use chrono::Utc;

use crate::backend::Backend;
use crate::model::{CronStatus, EnqueueOptions, JobStatus};

/// For every active schedule due to run, either skip-and-advance (overlap
/// suppression, `allow_overlap=false` with a still-live bound job) or
/// enqueue a new job from the schedule's template and advance.
///
/// Best-effort under concurrent processors: each schedule's advancement is
/// a compare-and-swap against the `next_run_at` this call observed
/// (`Backend::update_cron_schedule_after_enqueue`), so a losing racer
/// simply does nothing for that schedule rather than double-enqueuing or
/// double-advancing.
pub async fn enqueue_due_cron_jobs(backend: &dyn Backend) -> anyhow::Result<u64> {
    let due = backend.get_due_cron_schedules().await?;
    let mut enqueued = 0u64;

    for schedule in due {
        if schedule.status != CronStatus::Active {
            continue;
        }

        let observed_next_run_at = schedule.next_run_at;
        // `observed_next_run_at` is itself an occurrence (it was seeded and
        // has always been re-advanced to one), and `get_next_occurrence` is
        // inclusive of its `from` argument. Nudge past it by a second so
        // this computes the *next* occurrence rather than the same instant.
        let next_run_at = match relayq_cron::get_next_occurrence(
            &schedule.cron_expression,
            &schedule.timezone,
            observed_next_run_at + chrono::Duration::seconds(1),
        ) {
            Ok(at) => at,
            Err(err) => {
                tracing::error!(schedule = %schedule.schedule_name, %err, "failed to compute next cron occurrence");
                continue;
            }
        };

        let bound_job_is_live = match schedule.last_job_id {
            Some(job_id) => match backend.get_job(job_id).await? {
                Some(job) => matches!(job.status, JobStatus::Pending | JobStatus::Processing | JobStatus::Waiting),
                None => false,
            },
            None => false,
        };

        let now = Utc::now();

        if !schedule.allow_overlap && bound_job_is_live {
            let updated = backend
                .update_cron_schedule_after_enqueue(
                    schedule.id,
                    observed_next_run_at,
                    now,
                    schedule.last_job_id,
                    next_run_at,
                )
                .await?;
            if updated {
                tracing::debug!(schedule = %schedule.schedule_name, "skipped cron enqueue: prior job still live");
            }
            continue;
        }

        let opts = EnqueueOptions {
            job_type: schedule.job_type.clone(),
            payload: schedule.payload.clone(),
            priority: schedule.priority,
            run_at: now,
            timeout_ms: schedule.timeout_ms,
            force_kill_on_timeout: schedule.force_kill_on_timeout,
            max_attempts: schedule.max_attempts,
            tags: schedule.tags.clone(),
            idempotency_key: None,
            retry_policy: schedule.retry_policy.clone(),
        };
        let job_id = backend.enqueue(opts).await?;

        let updated = backend
            .update_cron_schedule_after_enqueue(schedule.id, observed_next_run_at, now, Some(job_id), next_run_at)
            .await?;
        if updated {
            enqueued += 1;
        }
    }

    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::model::{CronScheduleSpec, RetryPolicy};
    use serde_json::json;

    fn spec(name: &str, allow_overlap: bool) -> CronScheduleSpec {
        CronScheduleSpec {
            schedule_name: name.to_string(),
            cron_expression: "* * * * *".to_string(),
            timezone: "UTC".to_string(),
            job_type: "send-digest".to_string(),
            payload: json!({}),
            max_attempts: 3,
            priority: 0,
            timeout_ms: None,
            force_kill_on_timeout: false,
            tags: vec![],
            retry_policy: RetryPolicy::default(),
            allow_overlap,
            next_run_at: Utc::now() - chrono::Duration::minutes(1),
        }
    }

    #[tokio::test]
    async fn enqueues_a_job_when_due_and_no_overlap_guard() {
        let backend = MemoryBackend::new();
        backend.add_cron_schedule(spec("digest", true)).await.unwrap();
        let count = enqueue_due_cron_jobs(&backend).await.unwrap();
        assert_eq!(count, 1);
        let schedules = backend.list_cron_schedules(None).await.unwrap();
        assert!(schedules[0].last_job_id.is_some());
        assert!(schedules[0].next_run_at > Utc::now());
    }

    #[tokio::test]
    async fn skips_enqueue_but_advances_when_overlap_guard_trips() {
        let backend = MemoryBackend::new();
        backend.add_cron_schedule(spec("digest", false)).await.unwrap();
        enqueue_due_cron_jobs(&backend).await.unwrap();

        let schedules = backend.list_cron_schedules(None).await.unwrap();
        let bound_job_id = schedules[0].last_job_id.unwrap();
        let advanced_run_at = schedules[0].next_run_at;
        backend
            .edit_cron_schedule(
                schedules[0].id,
                crate::model::CronScheduleEdit {
                    next_run_at: Some(Utc::now() - chrono::Duration::minutes(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let count = enqueue_due_cron_jobs(&backend).await.unwrap();
        assert_eq!(count, 0);
        let schedules = backend.list_cron_schedules(None).await.unwrap();
        assert_eq!(schedules[0].last_job_id, Some(bound_job_id));
        assert!(schedules[0].next_run_at > advanced_run_at);
    }

    #[tokio::test]
    async fn advances_past_a_next_run_at_that_is_itself_an_occurrence() {
        use chrono::Timelike;

        let mut s = spec("digest", true);
        // A minute-aligned instant in the past, the way a real schedule's
        // `next_run_at` always is (seeded and re-advanced to occurrences).
        let aligned = (Utc::now() - chrono::Duration::minutes(5)).with_second(0).unwrap().with_nanosecond(0).unwrap();
        s.next_run_at = aligned;

        let backend = MemoryBackend::new();
        backend.add_cron_schedule(s).await.unwrap();
        let count = enqueue_due_cron_jobs(&backend).await.unwrap();
        assert_eq!(count, 1);

        let schedules = backend.list_cron_schedules(None).await.unwrap();
        assert!(schedules[0].next_run_at > aligned, "schedule must advance strictly past the observed occurrence");
    }
}
