//! Working-directory cleanup. Deleting large scientific working trees can
//! stall for minutes, so the daemon runs this loop in a separate OS process
//! (the binary re-execs itself) rather than a task of its own.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

/// How often the cleanup worker rescans the jobs directory.
pub(crate) const CLEANUP_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Job directories older than this get deleted.
pub(crate) const MAX_JOB_DIR_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Deletes every direct child directory of `jobs_dir` whose mtime is more than
/// `max_age` in the past. Returns how many were removed. A missing `jobs_dir`
/// is not an error.
pub fn cleanup_old_job_dirs_once(jobs_dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !jobs_dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(jobs_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                warn!("could not stat {}: {err}", path.display());
                continue;
            }
        };
        let age = modified.elapsed().unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }
        info!("removing old job working directory {}", path.display());
        match std::fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(err) => warn!("could not remove {}: {err}", path.display()),
        }
    }
    Ok(removed)
}

/// The cleanup worker: scans `jobs_dir` every minute, deleting job directories
/// older than 24 hours, forever. Survives its own errors by logging.
pub fn run_cleanup_loop(jobs_dir: &Path) -> ! {
    info!("cleaning up old job directories under {}", jobs_dir.display());
    loop {
        if let Err(err) = cleanup_old_job_dirs_once(jobs_dir, MAX_JOB_DIR_AGE) {
            warn!("cleanup pass over {} failed: {err}", jobs_dir.display());
        }
        std::thread::sleep(CLEANUP_POLL_INTERVAL);
    }
}
