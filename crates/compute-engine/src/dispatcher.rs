//! The job dispatcher: polls unfinished jobs, partitions them by backend, and
//! starts the eligible ones, at most once per job per daemon lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{error, info, warn};

use dendro_compute_core::client::ApiClient;
use dendro_compute_core::types::{Job, JobStatus};

use crate::launcher::JobLauncher;
use crate::registry::{Backend, LoadedApp};
use crate::slurm::SlurmJobHandler;

/// Cap on local jobs in flight (`queued`/`starting`/`running`) at once.
pub const MAX_SIMULTANEOUS_LOCAL_JOBS: usize = 2;

pub(crate) struct Dispatcher {
    client: ApiClient,
    apps: Vec<LoadedApp>,
    processor_index: HashMap<String, usize>,
    launcher: Arc<dyn JobLauncher>,
    // Jobs we already invoked a launcher for. Grows for the process lifetime;
    // pruning an entry would permit a second launch of the same job.
    attempted_job_ids: HashSet<String>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("client", &self.client)
            .field("apps", &self.apps)
            .field("processor_index", &self.processor_index)
            .field("attempted_job_ids", &self.attempted_job_ids)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub(crate) fn new(
        client: ApiClient,
        apps: Vec<LoadedApp>,
        processor_index: HashMap<String, usize>,
        launcher: Arc<dyn JobLauncher>,
    ) -> Self {
        Self {
            client,
            apps,
            processor_index,
            launcher,
            attempted_job_ids: HashSet::new(),
        }
    }

    pub(crate) fn client(&self) -> &ApiClient {
        &self.client
    }

    pub(crate) fn launcher(&self) -> &Arc<dyn JobLauncher> {
        &self.launcher
    }

    pub(crate) fn app_for_processor(&self, processor_name: &str) -> Option<&LoadedApp> {
        self.processor_index
            .get(processor_name)
            .map(|position| &self.apps[*position])
    }

    /// Records a start attempt for `job_id`. Returns false when the job was
    /// already attempted; callers must then leave the job alone.
    pub(crate) fn claim_start(&mut self, job_id: &str) -> bool {
        self.attempted_job_ids.insert(job_id.to_string())
    }

    #[cfg(test)]
    pub(crate) fn attempted(&self, job_id: &str) -> bool {
        self.attempted_job_ids.contains(job_id)
    }

    /// One work pass: fetch unfinished jobs and start whatever is eligible.
    pub(crate) async fn handle_jobs(
        &mut self,
        slurm_handlers: &mut HashMap<String, SlurmJobHandler>,
    ) -> anyhow::Result<()> {
        let jobs = self.client.fetch_unfinished_jobs().await?;

        let mut local_jobs = Vec::new();
        let mut aws_batch_jobs = Vec::new();
        let mut slurm_jobs = Vec::new();
        let mut unknown_jobs = Vec::new();
        for job in jobs {
            match self.app_for_processor(&job.processor_name).map(|a| &a.backend) {
                Some(Backend::Local) => local_jobs.push(job),
                Some(Backend::AwsBatch(_)) => aws_batch_jobs.push(job),
                Some(Backend::Slurm(_)) => slurm_jobs.push(job),
                None => unknown_jobs.push(job),
            }
        }

        for job in &unknown_jobs {
            if self.claim_start(&job.job_id) {
                let message =
                    format!("Could not find app with processor name {}", job.processor_name);
                self.fail_job(job, &message).await;
            }
        }

        // Local backend: bounded admission, oldest first.
        let num_busy_local = local_jobs
            .iter()
            .filter(|job| job.status != JobStatus::Pending)
            .count();
        if num_busy_local < MAX_SIMULTANEOUS_LOCAL_JOBS {
            let mut pending: Vec<&Job> = local_jobs
                .iter()
                .filter(|job| job.status == JobStatus::Pending)
                .collect();
            pending.sort_by(|a, b| a.timestamp_created.total_cmp(&b.timestamp_created));
            let num_to_start = MAX_SIMULTANEOUS_LOCAL_JOBS - num_busy_local;
            for job in pending.into_iter().take(num_to_start) {
                self.start_job(job).await;
            }
        }

        // AWS Batch has its own queue; admission is its problem.
        for job in &aws_batch_jobs {
            self.start_job(job).await;
        }

        // Pending SLURM jobs accumulate in per-processor cohorts.
        for job in slurm_jobs {
            if job.status != JobStatus::Pending {
                continue;
            }
            let Some(handler) = slurm_handlers.get_mut(&job.processor_name) else {
                error!(
                    "no slurm job handler for processor {}; dropping job until next poll",
                    job.processor_name
                );
                continue;
            };
            if let Err(err) = handler.offer_job(job, &self.attempted_job_ids) {
                error!("slurm handler rejected job: {err:#}");
            }
        }

        Ok(())
    }

    /// Invokes the backend launcher for `job`, at most once per daemon
    /// lifetime. Launcher failures mark the job failed and are swallowed.
    pub(crate) async fn start_job(&mut self, job: &Job) {
        if !self.claim_start(&job.job_id) {
            return;
        }
        let Some(position) = self.processor_index.get(&job.processor_name).copied() else {
            let message = format!("Could not find app with processor name {}", job.processor_name);
            self.fail_job(job, &message).await;
            return;
        };
        info!("starting job {} ({})", job.job_id, job.processor_name);
        let app = &self.apps[position];
        if let Err(err) = self.launcher.launch(app, job).await {
            error!("failed to start job {}: {err:#}", job.job_id);
            let message = format!("Failed to start job: {err:#}");
            self.fail_job(job, &message).await;
        }
    }

    /// Marks `job` failed with `message`; a failing status update is logged,
    /// never propagated.
    pub(crate) async fn fail_job(&self, job: &Job, message: &str) {
        warn!("marking job {} as failed: {message}", job.job_id);
        if let Err(err) = self
            .client
            .set_job_status(&job.job_id, &job.job_private_key, JobStatus::Failed, Some(message))
            .await
        {
            warn!("could not report failure of job {}: {err:#}", job.job_id);
        }
    }
}
