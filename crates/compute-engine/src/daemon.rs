//! The daemon itself: startup (registry, spec report, pub/sub) and the
//! steady-state tick loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use dendro_compute_core::client::ApiClient;

use crate::api::{DaemonConfig, DaemonHooks};
use crate::dispatcher::Dispatcher;
use crate::launcher::ProcessLauncher;
use crate::pubsub::{MOCK_SUBSCRIBE_KEY, PubsubClient, PubsubMessageKind};
use crate::registry::{self, Backend};
use crate::slurm::SlurmJobHandler;

// Without pub/sub wake-ups, a full dispatch pass still happens this often.
const POLL_BACKSTOP: Duration = Duration::from_secs(10 * 60);

// The loop ticks quickly for its first moments of life, then settles down.
const STARTUP_WINDOW: Duration = Duration::from_secs(5);
const STARTUP_TICK: Duration = Duration::from_millis(10);
const STEADY_TICK: Duration = Duration::from_secs(2);

/// A fully constructed compute resource daemon, ready to run.
#[derive(Debug)]
pub struct Daemon {
    dispatcher: Dispatcher,
    slurm_handlers: HashMap<String, SlurmJobHandler>,
    pubsub: PubsubClient,
    timeout: Option<Duration>,
    time_scale: u32,
}

impl Daemon {
    /// Loads the app registry, reports the spec, and connects pub/sub.
    ///
    /// Errors here are configuration errors: the daemon cannot operate and
    /// startup must abort.
    pub async fn new(config: DaemonConfig) -> anyhow::Result<Self> {
        let DaemonConfig {
            base_url,
            identity,
            work_dir,
            timeout,
            hooks,
        } = config;
        let DaemonHooks {
            time_scale,
            launcher,
            pubsub,
            batching,
        } = hooks;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let client = ApiClient::new(http.clone(), base_url.clone(), identity);

        let apps = registry::load_apps(&client).await?;
        info!(
            "loaded apps: {}",
            apps.iter()
                .map(|app| app.spec.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let processor_index = registry::processor_index(&apps)?;

        let policy = batching.unwrap_or_default().scaled(time_scale);
        let mut slurm_handlers = HashMap::new();
        for app in &apps {
            if let Backend::Slurm(opts) = &app.backend {
                for processor in &app.spec.processors {
                    slurm_handlers.insert(
                        processor.name.clone(),
                        SlurmJobHandler::new(
                            processor.name.clone(),
                            opts.clone(),
                            policy.clone(),
                        ),
                    );
                }
            }
        }

        info!("reporting the compute resource spec");
        if let Err(err) = registry::report_spec(&client, &apps).await {
            warn!("could not report the compute resource spec: {err:#}");
        }

        let pubsub = match pubsub {
            Some(pubsub) => pubsub,
            None => {
                let subscription = client.fetch_pubsub_subscription().await?;
                if subscription.pubnub_subscribe_key == MOCK_SUBSCRIBE_KEY {
                    PubsubClient::disabled()
                } else {
                    PubsubClient::connect(http, subscription)
                }
            }
        };

        let launcher: Arc<dyn crate::launcher::JobLauncher> = match launcher {
            Some(launcher) => launcher,
            None => Arc::new(ProcessLauncher::new(work_dir, base_url)),
        };
        let dispatcher = Dispatcher::new(client, apps, processor_index, launcher);

        Ok(Self {
            dispatcher,
            slurm_handlers,
            pubsub,
            timeout,
            time_scale: time_scale.max(1),
        })
    }

    /// Runs the tick loop until the configured timeout expires (tests), or
    /// forever. Transport and launcher problems are logged and retried on a
    /// later tick; nothing in here takes the daemon down.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let backstop = POLL_BACKSTOP / self.time_scale;
        let startup_window = STARTUP_WINDOW / self.time_scale;
        let startup_tick = STARTUP_TICK / self.time_scale;
        let steady_tick = STEADY_TICK / self.time_scale;

        info!("starting compute resource daemon");
        let started = Instant::now();
        let mut last_work: Option<Instant> = None;
        loop {
            let mut need_work = last_work.is_none_or(|at| at.elapsed() > backstop);
            for message in self.pubsub.drain() {
                match message.kind {
                    PubsubMessageKind::NewPendingJob
                    | PubsubMessageKind::JobStatusChanged => need_work = true,
                    PubsubMessageKind::Other => {}
                }
            }
            if need_work {
                last_work = Some(Instant::now());
                if let Err(err) = self.dispatcher.handle_jobs(&mut self.slurm_handlers).await {
                    warn!("job handling pass failed: {err:#}");
                }
            }

            for handler in self.slurm_handlers.values_mut() {
                handler.do_work(&mut self.dispatcher).await;
            }

            if let Some(timeout) = self.timeout {
                if started.elapsed() > timeout {
                    info!("daemon timed out after {:.1}s", timeout.as_secs_f64());
                    return Ok(());
                }
            }

            let tick = if started.elapsed() < startup_window {
                startup_tick
            } else {
                steady_tick
            };
            tokio::time::sleep(tick).await;
        }
    }
}
