mod cli;

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use dendro_compute_core::config::{ComputeResourceIdentity, read_config_env};
use dendro_compute_core::signing::public_key_hex;
use dendro_compute_engine::{Daemon, DaemonConfig, DaemonHooks, run_cleanup_loop};

use crate::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Some(jobs_dir) = &cli.cleanup_worker {
        run_cleanup_loop(jobs_dir);
    }

    // Export the per-directory config into the environment before the runtime
    // exists; no other threads are running at this point.
    for (key, value) in read_config_env(&cli.dir)? {
        unsafe { std::env::set_var(key, value) };
    }
    let identity = ComputeResourceIdentity::from_env()?;
    if let Ok(public_key) = public_key_hex(&identity.private_key) {
        if public_key != identity.compute_resource_id {
            tracing::warn!(
                "COMPUTE_RESOURCE_ID does not match the public key derived from COMPUTE_RESOURCE_PRIVATE_KEY"
            );
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, identity))
}

async fn run(cli: Cli, identity: ComputeResourceIdentity) -> anyhow::Result<()> {
    let work_dir = std::fs::canonicalize(&cli.dir).unwrap_or_else(|_| cli.dir.clone());

    if cli.cleanup_old_jobs {
        spawn_cleanup_worker(&work_dir.join("jobs"))?;
    }

    let daemon = Daemon::new(DaemonConfig {
        base_url: cli.url,
        identity,
        work_dir,
        timeout: cli.timeout.map(Duration::from_secs_f64),
        hooks: DaemonHooks::default(),
    })
    .await?;

    tokio::select! {
        res = daemon.run() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            Ok(())
        }
    }
}

// The worker is a sibling OS process: deleting large working trees can stall
// for minutes and must not block the dispatcher.
fn spawn_cleanup_worker(jobs_dir: &Path) -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;
    std::process::Command::new(exe)
        .arg("--cleanup-worker")
        .arg(jobs_dir)
        .spawn()?;
    Ok(())
}
