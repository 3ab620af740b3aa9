use std::path::PathBuf;

use clap::Parser;
use reqwest::Url;

#[derive(Debug, Clone, Parser)]
#[command(name = "dendro-compute", version, about = "Dendro compute resource daemon")]
pub struct Cli {
    /// Directory the compute resource was registered in.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Control-plane base URL.
    #[arg(long, env = "DENDRO_URL", default_value = "https://dendro.vercel.app")]
    pub url: Url,

    /// Exit after this many seconds (used by tests).
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Periodically delete job working directories older than 24 hours.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub cleanup_old_jobs: bool,

    /// Internal: run as the cleanup worker for the given jobs directory.
    #[arg(long, hide = true, value_name = "JOBS_DIR")]
    pub cleanup_worker: Option<PathBuf>,
}
