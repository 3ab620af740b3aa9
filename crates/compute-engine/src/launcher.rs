//! Backend launchers. The daemon never runs user code in-process: local jobs
//! become detached child processes, AWS Batch jobs become `aws batch
//! submit-job` calls, and SLURM cohorts become a single `sbatch` allocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use tracing::info;

use dendro_compute_core::types::{AwsBatchOpts, Job, SlurmOpts};

use crate::registry::{Backend, LoadedApp};

/// Starts jobs on an execution backend.
///
/// Implementations must not block the dispatcher on job completion: a
/// successful return means the job was handed to the backend, nothing more.
/// Liveness is observed through the job's own status updates.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Starts one job per the app's placement (local subprocess or AWS Batch).
    async fn launch(&self, app: &LoadedApp, job: &Job) -> anyhow::Result<()>;

    /// Submits a cohort of jobs for one processor as a single SLURM
    /// allocation, preserving `jobs` order within the allocation. Returns the
    /// allocation id.
    async fn launch_slurm_batch(
        &self,
        app: &LoadedApp,
        opts: &SlurmOpts,
        jobs: &[Job],
    ) -> anyhow::Result<String>;
}

/// The production launcher: child processes and cluster CLI submissions.
pub struct ProcessLauncher {
    work_dir: PathBuf,
    api_base_url: Url,
}

impl ProcessLauncher {
    /// Creates a launcher rooted at `work_dir` (job directories go under
    /// `<work_dir>/jobs`), pointing job runners at `api_base_url`.
    pub fn new(work_dir: PathBuf, api_base_url: Url) -> Self {
        Self {
            work_dir,
            api_base_url,
        }
    }

    fn executable<'a>(&self, app: &'a LoadedApp) -> anyhow::Result<&'a str> {
        app.spec
            .app_executable
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("app {} has no executable", app.spec.name))
    }

    async fn prepare_job_dir(&self, job: &Job) -> anyhow::Result<PathBuf> {
        let job_dir = self.work_dir.join("jobs").join(&job.job_id);
        tokio::fs::create_dir_all(&job_dir)
            .await
            .with_context(|| format!("creating {}", job_dir.display()))?;
        Ok(job_dir)
    }

    async fn launch_local(&self, app: &LoadedApp, job: &Job) -> anyhow::Result<()> {
        let executable = self.executable(app)?;
        let job_dir = self.prepare_job_dir(job).await?;
        let stdout = std::fs::File::create(job_dir.join("output.log"))?;
        let stderr = std::fs::File::create(job_dir.join("error.log"))?;

        let child = tokio::process::Command::new(executable)
            .current_dir(&job_dir)
            .env("JOB_ID", &job.job_id)
            .env("JOB_PRIVATE_KEY", &job.job_private_key)
            .env("APP_EXECUTABLE", executable)
            .env("DENDRO_URL", self.api_base_url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .with_context(|| format!("spawning {executable}"))?;
        // Detached on purpose: the runner reports its own status transitions.
        drop(child);
        Ok(())
    }

    async fn launch_aws_batch(
        &self,
        app: &LoadedApp,
        opts: &AwsBatchOpts,
        job: &Job,
    ) -> anyhow::Result<()> {
        let executable = self.executable(app)?;
        let overrides = serde_json::json!({
            "environment": [
                {"name": "JOB_ID", "value": job.job_id},
                {"name": "JOB_PRIVATE_KEY", "value": job.job_private_key},
                {"name": "APP_EXECUTABLE", "value": executable},
                {"name": "DENDRO_URL", "value": self.api_base_url.as_str()},
            ]
        });
        let output = tokio::process::Command::new("aws")
            .args([
                "batch",
                "submit-job",
                "--job-name",
                &format!("dendro-job-{}", job.job_id),
                "--job-queue",
                &opts.job_queue,
                "--job-definition",
                &opts.job_definition,
                "--container-overrides",
                &overrides.to_string(),
            ])
            .stdin(Stdio::null())
            .output()
            .await
            .context("running aws batch submit-job")?;
        if !output.status.success() {
            anyhow::bail!(
                "aws batch submit-job failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Writes the per-job runner script the allocation invokes through srun.
    async fn write_job_script(
        &self,
        job: &Job,
        executable: &str,
    ) -> anyhow::Result<PathBuf> {
        let job_dir = self.prepare_job_dir(job).await?;
        let script_path = job_dir.join("run.sh");

        let mut script = String::new();
        script.push_str("#!/usr/bin/env bash\n");
        script.push_str("set -u\n");
        script.push_str(&format!("cd {}\n", shell_quote(&job_dir.display().to_string())));
        script.push_str(&format!("export JOB_ID={}\n", shell_quote(&job.job_id)));
        script.push_str(&format!(
            "export JOB_PRIVATE_KEY={}\n",
            shell_quote(&job.job_private_key)
        ));
        script.push_str(&format!("export APP_EXECUTABLE={}\n", shell_quote(executable)));
        script.push_str(&format!(
            "export DENDRO_URL={}\n",
            shell_quote(self.api_base_url.as_str())
        ));
        script.push_str(&format!(
            "exec {} > output.log 2> error.log\n",
            shell_quote(executable)
        ));
        tokio::fs::write(&script_path, script).await?;
        make_executable(&script_path).await?;
        Ok(script_path)
    }
}

#[async_trait]
impl JobLauncher for ProcessLauncher {
    async fn launch(&self, app: &LoadedApp, job: &Job) -> anyhow::Result<()> {
        match &app.backend {
            Backend::Local => self.launch_local(app, job).await,
            Backend::AwsBatch(opts) => self.launch_aws_batch(app, opts, job).await,
            Backend::Slurm(_) => {
                anyhow::bail!("slurm jobs are submitted in batches, not individually")
            }
        }
    }

    async fn launch_slurm_batch(
        &self,
        app: &LoadedApp,
        opts: &SlurmOpts,
        jobs: &[Job],
    ) -> anyhow::Result<String> {
        let executable = self.executable(app)?;
        let batch_dir = self
            .work_dir
            .join("slurm")
            .join(format!("batch-{}", Utc::now().timestamp_millis()));
        tokio::fs::create_dir_all(&batch_dir)
            .await
            .with_context(|| format!("creating {}", batch_dir.display()))?;

        let mut script = String::new();
        script.push_str("#!/usr/bin/env bash\n");
        script.push_str("set -u\n");
        for job in jobs {
            let job_script = self.write_job_script(job, executable).await?;
            script.push_str(&format!(
                "srun --ntasks=1 {} &\n",
                shell_quote(&job_script.display().to_string())
            ));
        }
        script.push_str("wait\n");

        let script_path = batch_dir.join("run.sh");
        tokio::fs::write(&script_path, script).await?;
        make_executable(&script_path).await?;

        let mut cmd = tokio::process::Command::new("sbatch");
        cmd.arg("--parsable")
            .arg("--output")
            .arg(batch_dir.join("slurm.stdout.log"))
            .arg("--error")
            .arg(batch_dir.join("slurm.stderr.log"));
        if let Some(partition) = &opts.partition {
            cmd.arg("--partition").arg(partition);
        }
        if let Some(time) = &opts.time {
            cmd.arg("--time").arg(time);
        }
        if let Some(cpus) = opts.cpus_per_task {
            cmd.arg("--cpus-per-task").arg(cpus.to_string());
        }
        if let Some(other) = &opts.other_opts {
            cmd.args(other.split_whitespace());
        }
        cmd.arg(&script_path);

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .await
            .context("running sbatch")?;
        if !output.status.success() {
            anyhow::bail!(
                "sbatch failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        // --parsable prints jobid[;cluster]; only the first segment matters.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let allocation_id = stdout.trim().split(';').next().unwrap_or("").to_string();
        if allocation_id.is_empty() {
            anyhow::bail!("sbatch returned an empty allocation id");
        }
        info!(
            "submitted slurm allocation {} with {} job(s)",
            allocation_id,
            jobs.len()
        );
        Ok(allocation_id)
    }
}

async fn make_executable(path: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(path).await?.permissions();
        perms.set_mode(0o700);
        tokio::fs::set_permissions(path, perms).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

// Conservative single-quote quoting for bash, e.g. abc'd -> 'abc'"'"'d'.
fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}
