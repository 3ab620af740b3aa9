//! Wire documents exchanged with the dendro control plane.
//!
//! Everything here is `camelCase` on the wire. Unknown fields are tolerated on
//! input; optional fields are omitted from output when unset.

use serde::{Deserialize, Serialize};

use crate::spec::ProcessorSpec;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted, not yet picked up by a compute resource.
    Pending,
    /// Accepted by a compute resource and waiting for cluster resources.
    Queued,
    /// The job runner is preparing the working directory.
    Starting,
    /// The processor is executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An input file bound to a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobInputFile {
    /// Input name from the processor spec (may be of the form `name[0]` for list inputs).
    pub name: String,
    /// Id of the project file backing this input.
    pub file_id: String,
    /// Project-relative file name.
    pub file_name: String,
}

/// A parameter value bound to a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobInputParameter {
    /// Parameter name (dotted names are plain string keys).
    pub name: String,
    /// Bound value, absent when the processor default applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Whether the value is a secret and must never be logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<bool>,
}

/// An output file slot of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobOutputFile {
    /// Output name from the processor spec.
    pub name: String,
    /// Project-relative file name to create.
    pub file_name: String,
    /// Id of the produced project file, set once the job completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

/// A job record as returned by the unfinished-jobs endpoint.
///
/// `job_private_key` is a bearer capability: it is passed to the job runner
/// environment and the per-job status endpoint, and never logged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Owning project id.
    pub project_id: String,
    /// Job id.
    pub job_id: String,
    /// Per-job bearer capability.
    pub job_private_key: String,
    /// Id of the submitting user.
    pub user_id: String,
    /// Name of the processor to run.
    pub processor_name: String,
    /// Bound input files.
    pub input_files: Vec<JobInputFile>,
    /// Ids of all input files, in input order.
    #[serde(default)]
    pub input_file_ids: Vec<String>,
    /// Bound parameter values.
    pub input_parameters: Vec<JobInputParameter>,
    /// Output file slots.
    pub output_files: Vec<JobOutputFile>,
    /// Submission time, unix seconds.
    pub timestamp_created: f64,
    /// Compute resource the job is addressed to.
    pub compute_resource_id: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// SLURM/AWS batch grouping id, when batched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// Failure reason, when `status` is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Version of the processor that ran the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_version: Option<String>,
    /// Node id of the daemon that handled the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_resource_node_id: Option<String>,
    /// Node name of the daemon that handled the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_resource_node_name: Option<String>,
    /// Where the job's console output can be fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_output_url: Option<String>,
    /// When the job entered `queued`, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_queued: Option<f64>,
    /// When the job entered `starting`, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_starting: Option<f64>,
    /// When the job entered `running`, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_started: Option<f64>,
    /// When the job reached a terminal state, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_finished: Option<f64>,
    /// Ids of produced output files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_ids: Option<Vec<String>>,
    /// Spec of the processor the job is bound to.
    pub processor_spec: ProcessorSpec,
}

/// AWS Batch placement options of an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsBatchOpts {
    /// Job queue to submit to.
    pub job_queue: String,
    /// Job definition to submit with.
    pub job_definition: String,
}

/// SLURM placement options of an app.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlurmOpts {
    /// `--partition` value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    /// `--time` value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// `--cpus-per-task` value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus_per_task: Option<u32>,
    /// Additional raw sbatch arguments, whitespace separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_opts: Option<String>,
}

/// An app record attached to a compute resource in the control plane.
///
/// At most one of `aws_batch` / `slurm` may be set; an app with neither runs
/// jobs as local subprocesses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResourceApp {
    /// App name.
    pub name: String,
    /// Where the full processor spec is fetched from.
    pub spec_uri: String,
    /// Legacy executable path field, superseded by the spec document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<String>,
    /// Legacy container field, superseded by the spec document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// AWS Batch placement, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_batch: Option<AwsBatchOpts>,
    /// SLURM placement, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slurm: Option<SlurmOpts>,
}

/// Pub/sub subscription parameters handed out by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PubsubSubscription {
    /// PubNub subscribe key. The sentinel `mock-subscribe-key` disables the transport.
    pub pubnub_subscribe_key: String,
    /// Channel carrying this compute resource's notifications.
    pub pubnub_channel: String,
    /// User id to subscribe as.
    pub pubnub_user: String,
}
