//! An in-process [`Backend`] implementation.
//!
//! Used by the crate's own test suite (mirroring `seesaw-testing`'s mock
//! job queues) and viable as the store for single-node deployments that
//! don't need cross-process coordination. All state lives behind one
//! `std::sync::Mutex`, so every operation here is trivially atomic with
//! respect to concurrent callers — the same mutual-exclusion guarantee
//! `relayq-postgres` provides via row locks and `SKIP LOCKED`.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{
    matches_tag_query, CronSchedule, CronScheduleEdit, CronScheduleSpec, CronStatus,
    EnqueueOptions, ErrorEntry, EventType, FailureReason, Job, JobEdit, JobEvent, JobFilter,
    JobId, JobStatus, TagQueryMode, Waitpoint, WaitpointId, WaitpointStatus,
};

use super::{Backend, JobTypeFilter, Page};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    next_job_id: JobId,
    events: Vec<JobEvent>,
    next_event_id: i64,
    waitpoints: HashMap<WaitpointId, Waitpoint>,
    cron_schedules: HashMap<i64, CronSchedule>,
    next_cron_id: i64,
}

pub struct MemoryBackend {
    state: Mutex<State>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    fn paginate<T: Clone>(items: Vec<T>, limit: i64, offset: i64) -> Page<T> {
        let offset = offset.max(0) as usize;
        let limit = limit.max(0) as usize;
        items.into_iter().skip(offset).take(limit).collect()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn enqueue(&self, opts: EnqueueOptions) -> anyhow::Result<JobId> {
        let mut st = self.state.lock().unwrap();

        if let Some(key) = &opts.idempotency_key {
            if let Some(existing) = st
                .jobs
                .values()
                .find(|j| j.idempotency_key.as_deref() == Some(key.as_str()) && !j.is_terminal())
            {
                return Ok(existing.id);
            }
        }

        st.next_job_id += 1;
        let id = st.next_job_id;
        let now = Utc::now();
        let job = Job {
            id,
            job_type: opts.job_type,
            idempotency_key: opts.idempotency_key,
            tags: opts.tags,
            payload: opts.payload,
            priority: opts.priority,
            run_at: opts.run_at,
            next_attempt_at: None,
            timeout_ms: opts.timeout_ms,
            force_kill_on_timeout: opts.force_kill_on_timeout,
            max_attempts: opts.max_attempts,
            attempts: 0,
            retry_policy: opts.retry_policy,
            status: JobStatus::Pending,
            locked_at: None,
            locked_by: None,
            progress: None,
            step_data: Value::Object(Default::default()),
            wait_until: None,
            wait_token_id: None,
            error_history: Vec::new(),
            failure_reason: None,
            pending_reason: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            last_failed_at: None,
            last_retried_at: None,
            last_cancelled_at: None,
        };
        st.jobs.insert(id, job);
        drop(st);
        let _ = self.record_event(id, EventType::Added, Value::Null).await;
        Ok(id)
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: i64,
        job_type: &JobTypeFilter,
    ) -> anyhow::Result<Vec<Job>> {
        let mut st = self.state.lock().unwrap();
        let now = Utc::now();

        let mut eligible: Vec<JobId> = st
            .jobs
            .values()
            .filter(|j| job_type.matches(&j.job_type))
            .filter(|j| match j.status {
                JobStatus::Pending => j.run_at <= now && j.attempts < j.max_attempts,
                JobStatus::Failed => {
                    j.next_attempt_at.map_or(false, |t| t <= now) && j.attempts < j.max_attempts
                }
                JobStatus::Waiting => j.wait_until.map_or(false, |t| t <= now) && j.wait_token_id.is_none(),
                _ => false,
            })
            .map(|j| j.id)
            .collect();

        eligible.sort_by(|a, b| {
            let ja = &st.jobs[a];
            let jb = &st.jobs[b];
            jb.priority.cmp(&ja.priority).then(ja.created_at.cmp(&jb.created_at))
        });
        eligible.truncate(batch_size.max(0) as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            let job = st.jobs.get_mut(&id).unwrap();
            let resuming_from_wait = job.status == JobStatus::Waiting;
            let prior_attempts = job.attempts;

            job.status = JobStatus::Processing;
            job.locked_by = Some(worker_id.to_string());
            job.locked_at = Some(now);
            job.pending_reason = None;
            job.wait_until = None;
            job.updated_at = now;

            if !resuming_from_wait {
                job.attempts += 1;
            }
            if job.started_at.is_none() {
                job.started_at = Some(now);
            }
            if prior_attempts > 0 && !resuming_from_wait {
                job.last_retried_at = Some(now);
            }

            claimed.push(job.clone());
        }
        drop(st);

        for job in &claimed {
            let _ = self.record_event(job.id, EventType::Processing, Value::Null).await;
        }
        Ok(claimed)
    }

    async fn complete(&self, id: JobId) -> anyhow::Result<()> {
        let now = Utc::now();
        {
            let mut st = self.state.lock().unwrap();
            let job = st.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
            if job.status != JobStatus::Processing {
                bail!("complete is only valid from processing, got {:?}", job.status);
            }
            job.status = JobStatus::Completed;
            job.completed_at = Some(now);
            job.updated_at = now;
            job.step_data = Value::Object(Default::default());
            job.wait_until = None;
            job.wait_token_id = None;
        }
        let _ = self.record_event(id, EventType::Completed, Value::Null).await;
        Ok(())
    }

    async fn fail(&self, id: JobId, message: &str, reason: FailureReason) -> anyhow::Result<()> {
        let now = Utc::now();
        {
            let mut st = self.state.lock().unwrap();
            let job = st.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
            if !matches!(job.status, JobStatus::Processing | JobStatus::Pending) {
                bail!("fail is only valid from processing or pending, got {:?}", job.status);
            }
            job.error_history.push(ErrorEntry { message: message.to_string(), timestamp: now });
            job.status = JobStatus::Failed;
            job.last_failed_at = Some(now);
            job.failure_reason = Some(reason);
            job.updated_at = now;

            if job.attempts < job.max_attempts {
                let delay_ms = job.retry_policy.backoff_delay_ms((job.attempts - 1).max(0));
                job.next_attempt_at = Some(now + Duration::milliseconds(delay_ms));
            } else {
                job.next_attempt_at = None;
            }
        }
        let _ = self.record_event(id, EventType::Failed, Value::Null).await;
        Ok(())
    }

    async fn wait(
        &self,
        id: JobId,
        wait_until: Option<DateTime<Utc>>,
        wait_token_id: Option<WaitpointId>,
        step_data: Value,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        {
            let mut st = self.state.lock().unwrap();
            let job = st.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
            if job.status != JobStatus::Processing {
                bail!("wait is only valid from processing, got {:?}", job.status);
            }
            job.status = JobStatus::Waiting;
            job.wait_until = wait_until;
            job.wait_token_id = wait_token_id;
            job.step_data = step_data;
            job.updated_at = now;
        }
        let _ = self.record_event(id, EventType::Waiting, Value::Null).await;
        Ok(())
    }

    async fn prolong(&self, id: JobId) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        if let Some(job) = st.jobs.get_mut(&id) {
            if job.status == JobStatus::Processing {
                job.locked_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn retry(&self, id: JobId) -> anyhow::Result<()> {
        let now = Utc::now();
        {
            let mut st = self.state.lock().unwrap();
            let job = st.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
            if !matches!(job.status, JobStatus::Failed | JobStatus::Processing) {
                return Ok(()); // no-op unless the job is currently failed or processing
            }
            job.status = JobStatus::Pending;
            job.locked_at = None;
            job.locked_by = None;
            job.next_attempt_at = Some(now);
            job.last_retried_at = Some(now);
            job.updated_at = now;
        }
        let _ = self.record_event(id, EventType::Retried, Value::Null).await;
        Ok(())
    }

    async fn cancel(&self, id: JobId) -> anyhow::Result<()> {
        let now = Utc::now();
        {
            let mut st = self.state.lock().unwrap();
            let job = st.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
            if !matches!(job.status, JobStatus::Pending | JobStatus::Waiting) {
                return Ok(()); // no-op on other states
            }
            job.status = JobStatus::Cancelled;
            job.wait_until = None;
            job.wait_token_id = None;
            job.last_cancelled_at = Some(now);
            job.updated_at = now;
        }
        let _ = self.record_event(id, EventType::Cancelled, Value::Null).await;
        Ok(())
    }

    async fn edit(&self, id: JobId, updates: JobEdit) -> anyhow::Result<()> {
        let now = Utc::now();
        {
            let mut st = self.state.lock().unwrap();
            let job = st.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
            if job.status != JobStatus::Pending {
                bail!("edit is only valid on pending jobs, got {:?}", job.status);
            }
            apply_job_edit(job, updates);
            job.updated_at = now;
        }
        let _ = self.record_event(id, EventType::Edited, Value::Null).await;
        Ok(())
    }

    async fn bulk_cancel(&self, filter: &JobFilter) -> anyhow::Result<u64> {
        let now = Utc::now();
        let mut count = 0u64;
        let ids: Vec<JobId> = {
            let st = self.state.lock().unwrap();
            st.jobs
                .values()
                .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Waiting))
                .filter(|j| job_matches_filter(j, filter))
                .map(|j| j.id)
                .collect()
        };
        for id in ids {
            let mut st = self.state.lock().unwrap();
            if let Some(job) = st.jobs.get_mut(&id) {
                job.status = JobStatus::Cancelled;
                job.wait_until = None;
                job.wait_token_id = None;
                job.last_cancelled_at = Some(now);
                job.updated_at = now;
                count += 1;
            }
            drop(st);
            let _ = self.record_event(id, EventType::Cancelled, Value::Null).await;
        }
        Ok(count)
    }

    async fn bulk_edit(&self, filter: &JobFilter, updates: JobEdit) -> anyhow::Result<u64> {
        let now = Utc::now();
        let mut count = 0u64;
        let ids: Vec<JobId> = {
            let st = self.state.lock().unwrap();
            st.jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .filter(|j| job_matches_filter(j, filter))
                .map(|j| j.id)
                .collect()
        };
        for id in ids {
            let mut st = self.state.lock().unwrap();
            if let Some(job) = st.jobs.get_mut(&id) {
                apply_job_edit(job, updates.clone());
                job.updated_at = now;
                count += 1;
            }
            drop(st);
            let _ = self.record_event(id, EventType::Edited, Value::Null).await;
        }
        Ok(count)
    }

    async fn reclaim_stuck_jobs(&self, max_processing_minutes: i64) -> anyhow::Result<u64> {
        let now = Utc::now();
        let threshold = now - Duration::minutes(max_processing_minutes);
        let mut st = self.state.lock().unwrap();
        let mut count = 0u64;
        for job in st.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.locked_at.map_or(false, |t| t < threshold) {
                job.status = JobStatus::Pending;
                job.locked_at = None;
                job.locked_by = None;
                job.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn set_progress(&self, id: JobId, progress: i32) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        let job = st.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
        job.progress = Some(progress);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn save_step_data(&self, id: JobId, step_data: Value) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        let job = st.jobs.get_mut(&id).ok_or_else(|| anyhow!("job {id} not found"))?;
        job.step_data = step_data;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_no_handler(&self, job_type: &str, reason: &str) -> anyhow::Result<u64> {
        let mut st = self.state.lock().unwrap();
        let mut count = 0u64;
        for job in st.jobs.values_mut() {
            if job.job_type == job_type && job.status == JobStatus::Pending {
                job.pending_reason = Some(reason.to_string());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cleanup_old_jobs(&self, older_than_days: i64, batch_size: i64) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let mut st = self.state.lock().unwrap();
        let mut to_remove: Vec<JobId> = st
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Completed && j.completed_at.map_or(false, |t| t < cutoff))
            .map(|j| j.id)
            .collect();
        to_remove.truncate(batch_size.max(0) as usize);
        for id in &to_remove {
            st.jobs.remove(id);
        }
        Ok(to_remove.len() as u64)
    }

    async fn cleanup_old_job_events(&self, older_than_days: i64, batch_size: i64) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let mut st = self.state.lock().unwrap();
        let remove_ids: Vec<i64> = st
            .events
            .iter()
            .filter(|e| e.created_at < cutoff)
            .take(batch_size.max(0) as usize)
            .map(|e| e.id)
            .collect();
        let remove_set: std::collections::HashSet<i64> = remove_ids.iter().copied().collect();
        st.events.retain(|e| !remove_set.contains(&e.id));
        Ok(remove_ids.len() as u64)
    }

    async fn record_event(
        &self,
        job_id: JobId,
        event_type: EventType,
        metadata: Value,
    ) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        st.next_event_id += 1;
        let id = st.next_event_id;
        st.events.push(JobEvent { id, job_id, event_type, metadata, created_at: Utc::now() });
        Ok(())
    }

    async fn get_job_events(&self, job_id: JobId, limit: i64, offset: i64) -> anyhow::Result<Page<JobEvent>> {
        let st = self.state.lock().unwrap();
        let mut events: Vec<JobEvent> = st.events.iter().filter(|e| e.job_id == job_id).cloned().collect();
        events.sort_by_key(|e| e.created_at);
        Ok(Self::paginate(events, limit, offset))
    }

    async fn get_job(&self, id: JobId) -> anyhow::Result<Option<Job>> {
        let st = self.state.lock().unwrap();
        Ok(st.jobs.get(&id).cloned())
    }

    async fn get_jobs(&self, filter: &JobFilter, limit: i64, offset: i64) -> anyhow::Result<Page<Job>> {
        let st = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = st.jobs.values().filter(|j| job_matches_filter(j, filter)).cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(Self::paginate(jobs, limit, offset))
    }

    async fn get_jobs_by_status(&self, status: JobStatus, limit: i64, offset: i64) -> anyhow::Result<Page<Job>> {
        let st = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = st.jobs.values().filter(|j| j.status == status).cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(Self::paginate(jobs, limit, offset))
    }

    async fn get_jobs_by_tags(
        &self,
        values: &[String],
        mode: TagQueryMode,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Page<Job>> {
        let st = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = st
            .jobs
            .values()
            .filter(|j| matches_tag_query(&j.tags, values, mode))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(Self::paginate(jobs, limit, offset))
    }

    async fn get_all_jobs(&self, limit: i64, offset: i64) -> anyhow::Result<Page<Job>> {
        let st = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = st.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(Self::paginate(jobs, limit, offset))
    }

    async fn create_waitpoint(
        &self,
        job_id: Option<JobId>,
        timeout_at: Option<DateTime<Utc>>,
        tags: Vec<String>,
    ) -> anyhow::Result<Waitpoint> {
        let mut st = self.state.lock().unwrap();
        let waitpoint = Waitpoint {
            id: Uuid::new_v4(),
            job_id,
            status: WaitpointStatus::Waiting,
            timeout_at,
            completed_at: None,
            output: None,
            tags,
            created_at: Utc::now(),
        };
        st.waitpoints.insert(waitpoint.id, waitpoint.clone());
        Ok(waitpoint)
    }

    async fn bind_waitpoint(&self, id: WaitpointId, job_id: JobId) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        let wp = st.waitpoints.get_mut(&id).ok_or_else(|| anyhow!("waitpoint {id} not found"))?;
        wp.job_id = Some(job_id);
        Ok(())
    }

    async fn complete_waitpoint(&self, id: WaitpointId, output: Option<Value>) -> anyhow::Result<()> {
        let now = Utc::now();
        let bound_job_id = {
            let mut st = self.state.lock().unwrap();
            let wp = st.waitpoints.get_mut(&id).ok_or_else(|| anyhow!("waitpoint {id} not found"))?;
            wp.status = WaitpointStatus::Completed;
            wp.output = output;
            wp.completed_at = Some(now);
            wp.job_id
        };
        if let Some(job_id) = bound_job_id {
            self.requeue_waiting_job(job_id, now).await?;
        }
        Ok(())
    }

    async fn get_waitpoint(&self, id: WaitpointId) -> anyhow::Result<Option<Waitpoint>> {
        let st = self.state.lock().unwrap();
        Ok(st.waitpoints.get(&id).cloned())
    }

    async fn expire_timed_out_waitpoints(&self) -> anyhow::Result<u64> {
        let now = Utc::now();
        let expired: Vec<(WaitpointId, Option<JobId>)> = {
            let mut st = self.state.lock().unwrap();
            let ids: Vec<WaitpointId> = st
                .waitpoints
                .values()
                .filter(|w| w.status == WaitpointStatus::Waiting && w.timeout_at.map_or(false, |t| t <= now))
                .map(|w| w.id)
                .collect();
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                let wp = st.waitpoints.get_mut(&id).unwrap();
                wp.status = WaitpointStatus::TimedOut;
                wp.completed_at = Some(now);
                out.push((id, wp.job_id));
            }
            out
        };
        for (_, job_id) in &expired {
            if let Some(job_id) = job_id {
                self.requeue_waiting_job(*job_id, now).await?;
            }
        }
        Ok(expired.len() as u64)
    }

    async fn add_cron_schedule(&self, spec: CronScheduleSpec) -> anyhow::Result<CronSchedule> {
        let mut st = self.state.lock().unwrap();
        if st.cron_schedules.values().any(|c| c.schedule_name == spec.schedule_name) {
            bail!("cron schedule name `{}` already exists", spec.schedule_name);
        }
        st.next_cron_id += 1;
        let id = st.next_cron_id;
        let now = Utc::now();
        let schedule = CronSchedule {
            id,
            schedule_name: spec.schedule_name,
            cron_expression: spec.cron_expression,
            timezone: spec.timezone,
            job_type: spec.job_type,
            payload: spec.payload,
            max_attempts: spec.max_attempts,
            priority: spec.priority,
            timeout_ms: spec.timeout_ms,
            force_kill_on_timeout: spec.force_kill_on_timeout,
            tags: spec.tags,
            retry_policy: spec.retry_policy,
            allow_overlap: spec.allow_overlap,
            status: CronStatus::Active,
            last_enqueued_at: None,
            last_job_id: None,
            next_run_at: spec.next_run_at,
            created_at: now,
            updated_at: now,
        };
        st.cron_schedules.insert(id, schedule.clone());
        Ok(schedule)
    }

    async fn get_cron_schedule(&self, id: i64) -> anyhow::Result<Option<CronSchedule>> {
        let st = self.state.lock().unwrap();
        Ok(st.cron_schedules.get(&id).cloned())
    }

    async fn get_cron_schedule_by_name(&self, name: &str) -> anyhow::Result<Option<CronSchedule>> {
        let st = self.state.lock().unwrap();
        Ok(st.cron_schedules.values().find(|c| c.schedule_name == name).cloned())
    }

    async fn list_cron_schedules(&self, status: Option<CronStatus>) -> anyhow::Result<Vec<CronSchedule>> {
        let st = self.state.lock().unwrap();
        let mut out: Vec<CronSchedule> = st
            .cron_schedules
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    async fn pause_cron_schedule(&self, id: i64) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        let c = st.cron_schedules.get_mut(&id).ok_or_else(|| anyhow!("cron schedule {id} not found"))?;
        if c.status == CronStatus::Active {
            c.status = CronStatus::Paused;
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn resume_cron_schedule(&self, id: i64) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        let c = st.cron_schedules.get_mut(&id).ok_or_else(|| anyhow!("cron schedule {id} not found"))?;
        if c.status == CronStatus::Paused {
            c.status = CronStatus::Active;
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn remove_cron_schedule(&self, id: i64) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        st.cron_schedules.remove(&id);
        Ok(())
    }

    async fn edit_cron_schedule(&self, id: i64, updates: CronScheduleEdit) -> anyhow::Result<CronSchedule> {
        let mut st = self.state.lock().unwrap();
        let c = st.cron_schedules.get_mut(&id).ok_or_else(|| anyhow!("cron schedule {id} not found"))?;
        if let Some(v) = updates.cron_expression {
            c.cron_expression = v;
        }
        if let Some(v) = updates.timezone {
            c.timezone = v;
        }
        if let Some(v) = updates.job_type {
            c.job_type = v;
        }
        if let Some(v) = updates.payload {
            c.payload = v;
        }
        if let Some(v) = updates.max_attempts {
            c.max_attempts = v;
        }
        if let Some(v) = updates.priority {
            c.priority = v;
        }
        if let Some(v) = updates.timeout_ms {
            c.timeout_ms = v;
        }
        if let Some(v) = updates.force_kill_on_timeout {
            c.force_kill_on_timeout = v;
        }
        if let Some(v) = updates.tags {
            c.tags = v;
        }
        if let Some(v) = updates.retry_policy {
            c.retry_policy = v;
        }
        if let Some(v) = updates.allow_overlap {
            c.allow_overlap = v;
        }
        if let Some(v) = updates.next_run_at {
            c.next_run_at = v;
        }
        c.updated_at = Utc::now();
        Ok(c.clone())
    }

    async fn get_due_cron_schedules(&self) -> anyhow::Result<Vec<CronSchedule>> {
        let now = Utc::now();
        let st = self.state.lock().unwrap();
        let mut out: Vec<CronSchedule> = st
            .cron_schedules
            .values()
            .filter(|c| c.status == CronStatus::Active && c.next_run_at <= now)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    async fn update_cron_schedule_after_enqueue(
        &self,
        id: i64,
        observed_next_run_at: DateTime<Utc>,
        last_enqueued_at: DateTime<Utc>,
        last_job_id: Option<JobId>,
        next_run_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut st = self.state.lock().unwrap();
        let c = match st.cron_schedules.get_mut(&id) {
            Some(c) => c,
            None => return Ok(false),
        };
        if c.next_run_at != observed_next_run_at {
            return Ok(false);
        }
        c.last_enqueued_at = Some(last_enqueued_at);
        if last_job_id.is_some() {
            c.last_job_id = last_job_id;
        }
        c.next_run_at = next_run_at;
        c.updated_at = Utc::now();
        Ok(true)
    }
}

impl MemoryBackend {
    /// Shared by `complete_waitpoint` and `expire_timed_out_waitpoints`:
    /// requeue a job bound to a resolved waitpoint so it doesn't sit idle
    /// in `waiting` until the next poll notices.
    async fn requeue_waiting_job(&self, job_id: JobId, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut st = self.state.lock().unwrap();
        if let Some(job) = st.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Waiting {
                job.status = JobStatus::Pending;
                job.run_at = now;
                job.wait_until = None;
                job.wait_token_id = None;
                job.updated_at = now;
            }
        }
        Ok(())
    }
}

fn apply_job_edit(job: &mut Job, updates: JobEdit) {
    if let Some(v) = updates.payload {
        job.payload = v;
    }
    if let Some(v) = updates.max_attempts {
        job.max_attempts = v;
    }
    if let Some(v) = updates.priority {
        job.priority = v;
    }
    if let Some(v) = updates.run_at {
        job.run_at = v.unwrap_or_else(Utc::now);
    }
    if let Some(v) = updates.timeout_ms {
        job.timeout_ms = v;
    }
    if let Some(v) = updates.tags {
        job.tags = v;
    }
    if let Some(v) = updates.retry_policy {
        job.retry_policy = v;
    }
}

fn job_matches_filter(job: &Job, filter: &JobFilter) -> bool {
    if let Some(jt) = &filter.job_type {
        if &job.job_type != jt {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if job.status != status {
            return false;
        }
    }
    if let Some(priority) = filter.priority {
        if job.priority != priority {
            return false;
        }
    }
    if let Some(run_at) = &filter.run_at {
        if !run_at.matches(job.run_at) {
            return false;
        }
    }
    if let Some((values, mode)) = &filter.tags {
        if !matches_tag_query(&job.tags, values, *mode) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(key: &str) -> EnqueueOptions {
        let mut opts = EnqueueOptions::new("t", Value::Null);
        opts.idempotency_key = Some(key.to_string());
        opts
    }

    #[tokio::test]
    async fn idempotency_key_collides_with_a_live_row() {
        let backend = MemoryBackend::new();
        let first = backend.enqueue(keyed("dup")).await.unwrap();
        let second = backend.enqueue(keyed("dup")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn idempotency_key_does_not_collide_with_a_completed_row() {
        let backend = MemoryBackend::new();
        let first = backend.enqueue(keyed("dup")).await.unwrap();
        backend.claim_batch("w1", 10, &JobTypeFilter::Any).await.unwrap();
        backend.complete(first).await.unwrap();

        let second = backend.enqueue(keyed("dup")).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn idempotency_key_does_not_collide_with_an_exhausted_failed_row() {
        let backend = MemoryBackend::new();
        let mut opts = keyed("dup");
        opts.max_attempts = 1;
        let first = backend.enqueue(opts).await.unwrap();
        backend.claim_batch("w1", 10, &JobTypeFilter::Any).await.unwrap();
        backend.fail(first, "boom", FailureReason::HandlerError).await.unwrap();
        let job = backend.get_job(first).await.unwrap().unwrap();
        assert!(job.is_terminal());

        let second = backend.enqueue(keyed("dup")).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn idempotency_key_still_collides_with_a_retryable_failed_row() {
        let backend = MemoryBackend::new();
        let mut opts = keyed("dup");
        opts.max_attempts = 3;
        let first = backend.enqueue(opts).await.unwrap();
        backend.claim_batch("w1", 10, &JobTypeFilter::Any).await.unwrap();
        backend.fail(first, "boom", FailureReason::HandlerError).await.unwrap();
        let job = backend.get_job(first).await.unwrap().unwrap();
        assert!(!job.is_terminal());

        let second = backend.enqueue(keyed("dup")).await.unwrap();
        assert_eq!(first, second);
    }
}
