//! SLURM batching: pending jobs for one processor accumulate in a cohort that
//! is flushed as a single allocation once the queue goes quiet, a hard wait
//! ceiling is hit, or the cohort fills up.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use dendro_compute_core::types::{Job, JobStatus, SlurmOpts};

use crate::dispatcher::Dispatcher;

/// When a cohort of pending SLURM jobs gets flushed into an allocation.
#[derive(Debug, Clone)]
pub struct BatchingPolicy {
    /// Flush as soon as the cohort holds this many jobs.
    pub max_jobs: usize,
    /// Flush once this long has passed since the most recent add.
    pub quiescence: Duration,
    /// Flush once this long has passed since the first add, even if jobs keep
    /// trickling in.
    pub max_wait: Duration,
}

impl Default for BatchingPolicy {
    fn default() -> Self {
        Self {
            max_jobs: 10,
            quiescence: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl BatchingPolicy {
    pub(crate) fn scaled(&self, scale: u32) -> Self {
        let scale = scale.max(1);
        Self {
            max_jobs: self.max_jobs,
            quiescence: self.quiescence / scale,
            max_wait: self.max_wait / scale,
        }
    }
}

/// Per-processor cohort of pending SLURM jobs.
#[derive(Debug)]
pub(crate) struct SlurmJobHandler {
    processor_name: String,
    opts: SlurmOpts,
    policy: BatchingPolicy,
    jobs: Vec<Job>,
    first_job_added_at: Option<Instant>,
    last_job_added_at: Option<Instant>,
    submitted_allocation_id: Option<String>,
}

impl SlurmJobHandler {
    pub(crate) fn new(processor_name: String, opts: SlurmOpts, policy: BatchingPolicy) -> Self {
        Self {
            processor_name,
            opts,
            policy,
            jobs: Vec::new(),
            first_job_added_at: None,
            last_job_added_at: None,
            submitted_allocation_id: None,
        }
    }

    /// Adds a pending job to the cohort. Jobs already in the cohort or already
    /// claimed by the dispatcher are ignored; a job for another processor is
    /// an error.
    pub(crate) fn offer_job(
        &mut self,
        job: Job,
        attempted_job_ids: &HashSet<String>,
    ) -> anyhow::Result<()> {
        if job.processor_name != self.processor_name {
            anyhow::bail!(
                "job {} targets processor {}, but this handler owns {}",
                job.job_id,
                job.processor_name,
                self.processor_name
            );
        }
        if attempted_job_ids.contains(&job.job_id) {
            return Ok(());
        }
        if self.jobs.iter().any(|queued| queued.job_id == job.job_id) {
            return Ok(());
        }
        let now = Instant::now();
        if self.jobs.is_empty() {
            self.first_job_added_at = Some(now);
        }
        self.last_job_added_at = Some(now);
        self.jobs.push(job);
        Ok(())
    }

    fn flush_due(&self, now: Instant) -> bool {
        if self.jobs.is_empty() {
            return false;
        }
        if self.jobs.len() >= self.policy.max_jobs {
            return true;
        }
        let quiesced = self
            .last_job_added_at
            .is_some_and(|at| now.duration_since(at) >= self.policy.quiescence);
        let waited_out = self
            .first_job_added_at
            .is_some_and(|at| now.duration_since(at) >= self.policy.max_wait);
        quiesced || waited_out
    }

    /// Called on every orchestrator tick. Performs at most one submission:
    /// when the flush conditions hold, the whole cohort goes out as a single
    /// allocation and every job advances to `queued`, or, on submission
    /// failure, to `failed`.
    pub(crate) async fn do_work(&mut self, dispatcher: &mut Dispatcher) {
        if !self.flush_due(Instant::now()) {
            return;
        }
        let drained: Vec<Job> = self.jobs.drain(..).collect();
        self.first_job_added_at = None;
        self.last_job_added_at = None;

        let cohort: Vec<Job> = drained
            .into_iter()
            .filter(|job| dispatcher.claim_start(&job.job_id))
            .collect();
        if cohort.is_empty() {
            return;
        }

        let Some(app) = dispatcher.app_for_processor(&self.processor_name).cloned() else {
            let message =
                format!("Could not find app with processor name {}", self.processor_name);
            error!("{message}");
            for job in &cohort {
                dispatcher.fail_job(job, &message).await;
            }
            return;
        };

        info!(
            "submitting {} job(s) for processor {} as one slurm allocation",
            cohort.len(),
            self.processor_name
        );
        let launcher = dispatcher.launcher().clone();
        match launcher.launch_slurm_batch(&app, &self.opts, &cohort).await {
            Ok(allocation_id) => {
                self.submitted_allocation_id = Some(allocation_id);
                for job in &cohort {
                    if let Err(err) = dispatcher
                        .client()
                        .set_job_status(&job.job_id, &job.job_private_key, JobStatus::Queued, None)
                        .await
                    {
                        warn!("could not mark job {} as queued: {err:#}", job.job_id);
                    }
                }
            }
            Err(err) => {
                error!(
                    "slurm submission for processor {} failed: {err:#}",
                    self.processor_name
                );
                let message = format!("Failed to submit slurm batch: {err:#}");
                for job in &cohort {
                    dispatcher.fail_job(job, &message).await;
                }
            }
        }
    }
}
