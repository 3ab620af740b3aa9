#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The dendro compute resource daemon: app registry, pub/sub wake-ups, job
//! dispatch to local / AWS Batch / SLURM backends, and working-directory
//! cleanup.

/// Public API for the daemon crate.
pub mod api;

mod daemon;
mod dispatcher;
mod janitor;
mod launcher;
mod pubsub;
mod registry;
mod slurm;

pub use api::{
    Daemon, DaemonConfig, DaemonHooks, MAX_SIMULTANEOUS_LOCAL_JOBS, MOCK_SUBSCRIBE_KEY,
    cleanup_old_job_dirs_once, run_cleanup_loop,
};
pub use launcher::{JobLauncher, ProcessLauncher};
pub use pubsub::{PubsubClient, PubsubMessage, PubsubMessageKind};
pub use registry::{Backend, LoadedApp, RegistryError, load_apps, processor_index, report_spec};
pub use slurm::BatchingPolicy;
