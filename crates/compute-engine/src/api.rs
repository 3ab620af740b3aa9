//! Public configuration types for the daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;

use dendro_compute_core::config::ComputeResourceIdentity;

use crate::launcher::JobLauncher;
use crate::pubsub::PubsubClient;
use crate::slurm::BatchingPolicy;

pub use crate::daemon::Daemon;
pub use crate::dispatcher::MAX_SIMULTANEOUS_LOCAL_JOBS;
pub use crate::janitor::{cleanup_old_job_dirs_once, run_cleanup_loop};
pub use crate::pubsub::MOCK_SUBSCRIBE_KEY;

/// Configuration for one daemon instance.
pub struct DaemonConfig {
    /// Control-plane base URL.
    pub base_url: Url,
    /// Identity the daemon signs requests as.
    pub identity: ComputeResourceIdentity,
    /// Daemon directory; job working directories live under `<work_dir>/jobs`.
    pub work_dir: PathBuf,
    /// Stop the loop after this long; used by tests. `None` runs forever.
    pub timeout: Option<Duration>,
    /// Construction-time overrides; [`DaemonHooks::default`] in production.
    pub hooks: DaemonHooks,
}

/// Construction-time hooks replacing what would otherwise be process-global
/// state: the mock time scale and the transport/launcher substitutes tests
/// inject.
pub struct DaemonHooks {
    /// Divisor applied to every loop time constant. 1 in production; tests use
    /// 10 000 so the loop converges in milliseconds.
    pub time_scale: u32,
    /// Launcher override; defaults to [`crate::ProcessLauncher`].
    pub launcher: Option<Arc<dyn JobLauncher>>,
    /// Pub/sub override; when unset, the daemon fetches the subscription from
    /// the control plane and connects (or stays inert on the mock sentinel).
    pub pubsub: Option<PubsubClient>,
    /// SLURM batching policy override (already unscaled; the daemon applies
    /// `time_scale` itself).
    pub batching: Option<BatchingPolicy>,
}

impl Default for DaemonHooks {
    fn default() -> Self {
        Self {
            time_scale: 1,
            launcher: None,
            pubsub: None,
            batching: None,
        }
    }
}
