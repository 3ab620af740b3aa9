//! End-to-end daemon scenarios against a mock control plane.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use dendro_compute_core::config::ComputeResourceIdentity;
use dendro_compute_core::types::{Job, SlurmOpts};
use dendro_compute_engine::{
    BatchingPolicy, Daemon, DaemonConfig, DaemonHooks, JobLauncher, LoadedApp, PubsubClient,
    PubsubMessage, PubsubMessageKind,
};

const PRIVATE_KEY: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

#[derive(Default)]
struct RecordingLauncher {
    launched: Mutex<Vec<String>>,
    batches: Mutex<Vec<Vec<String>>>,
    fail: AtomicBool,
}

impl RecordingLauncher {
    fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobLauncher for RecordingLauncher {
    async fn launch(&self, _app: &LoadedApp, job: &Job) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("injected launch failure");
        }
        self.launched.lock().unwrap().push(job.job_id.clone());
        Ok(())
    }

    async fn launch_slurm_batch(
        &self,
        _app: &LoadedApp,
        _opts: &SlurmOpts,
        jobs: &[Job],
    ) -> anyhow::Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("injected sbatch failure");
        }
        let mut batches = self.batches.lock().unwrap();
        batches.push(jobs.iter().map(|j| j.job_id.clone()).collect());
        Ok(format!("alloc-{}", batches.len()))
    }
}

fn identity() -> ComputeResourceIdentity {
    ComputeResourceIdentity {
        compute_resource_id: "cr1".into(),
        private_key: PRIVATE_KEY.into(),
        node_id: None,
        node_name: None,
    }
}

fn processor_spec(name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "description": "",
        "inputs": [],
        "outputs": [],
        "parameters": [],
        "attributes": [],
        "tags": []
    })
}

fn app_spec_body(processors: &[&str]) -> String {
    serde_json::json!({
        "name": "test-app",
        "description": "",
        "appExecutable": "/app/main",
        "processors": processors.iter().map(|p| processor_spec(p)).collect::<Vec<_>>(),
    })
    .to_string()
}

fn pending_job(job_id: &str, processor: &str, ts: f64) -> serde_json::Value {
    serde_json::json!({
        "projectId": "p1",
        "jobId": job_id,
        "jobPrivateKey": format!("jpk-{job_id}"),
        "userId": "u1",
        "processorName": processor,
        "inputFiles": [],
        "inputParameters": [],
        "outputFiles": [],
        "timestampCreated": ts,
        "computeResourceId": "cr1",
        "status": "pending",
        "processorSpec": processor_spec(processor),
    })
}

/// Mounts the startup endpoints: the app list (one app, optional slurm opts),
/// the spec URI, the spec PUT, and the sentinel pub/sub subscription.
async fn mount_control_plane(
    server: &mut mockito::Server,
    processors: &[&str],
    slurm: Option<serde_json::Value>,
) {
    let mut record = serde_json::json!({
        "name": "test-app",
        "specUri": format!("{}/specs/test-app.json", server.url()),
    });
    if let Some(slurm) = slurm {
        record["slurm"] = slurm;
    }
    server
        .mock("GET", "/api/compute_resource/compute_resources/cr1/apps")
        .with_body(serde_json::json!({"apps": [record]}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/specs/test-app.json")
        .with_body(app_spec_body(processors))
        .create_async()
        .await;
    server
        .mock("PUT", "/api/compute_resource/compute_resources/cr1/spec")
        .with_body(r#"{"success": true}"#)
        .create_async()
        .await;
    server
        .mock(
            "GET",
            "/api/compute_resource/compute_resources/cr1/pubsub_subscription",
        )
        .with_body(
            serde_json::json!({"subscription": {
                "pubnubSubscribeKey": "mock-subscribe-key",
                "pubnubChannel": "compute-resources",
                "pubnubUser": "cr1",
            }})
            .to_string(),
        )
        .create_async()
        .await;
}

fn config(server: &mockito::Server, timeout: Duration, hooks: DaemonHooks) -> DaemonConfig {
    DaemonConfig {
        base_url: reqwest::Url::parse(&server.url()).unwrap(),
        identity: identity(),
        work_dir: std::env::temp_dir(),
        timeout: Some(timeout),
        hooks,
    }
}

#[tokio::test]
async fn happy_local_job_is_started_within_the_timeout() {
    let mut server = mockito::Server::new_async().await;
    mount_control_plane(&mut server, &["test_processor"], None).await;
    server
        .mock(
            "GET",
            "/api/compute_resource/compute_resources/cr1/unfinished_jobs",
        )
        .with_body(
            serde_json::json!({"jobs": [pending_job("j1", "test_processor", 1.0)]}).to_string(),
        )
        .create_async()
        .await;

    let launcher = Arc::new(RecordingLauncher::default());
    let hooks = DaemonHooks {
        time_scale: 10_000,
        launcher: Some(launcher.clone()),
        ..DaemonHooks::default()
    };
    let daemon = Daemon::new(config(&server, Duration::from_millis(100), hooks))
        .await
        .unwrap();
    daemon.run().await.unwrap();

    assert_eq!(launcher.launched(), vec!["j1"]);
}

#[tokio::test]
async fn pending_job_is_launched_exactly_once_across_many_ticks() {
    let mut server = mockito::Server::new_async().await;
    mount_control_plane(&mut server, &["test_processor"], None).await;
    // The job stays pending in every poll; only the first pass may launch it.
    server
        .mock(
            "GET",
            "/api/compute_resource/compute_resources/cr1/unfinished_jobs",
        )
        .with_body(
            serde_json::json!({"jobs": [pending_job("j1", "test_processor", 1.0)]}).to_string(),
        )
        .expect_at_least(2)
        .create_async()
        .await;

    let launcher = Arc::new(RecordingLauncher::default());
    let hooks = DaemonHooks {
        time_scale: 10_000,
        launcher: Some(launcher.clone()),
        ..DaemonHooks::default()
    };
    let daemon = Daemon::new(config(&server, Duration::from_millis(300), hooks))
        .await
        .unwrap();
    daemon.run().await.unwrap();

    assert_eq!(launcher.launched(), vec!["j1"]);
}

#[tokio::test]
async fn pubsub_message_wakes_the_dispatcher_before_the_backstop() {
    let mut server = mockito::Server::new_async().await;
    mount_control_plane(&mut server, &["test_processor"], None).await;
    let unfinished = server
        .mock(
            "GET",
            "/api/compute_resource/compute_resources/cr1/unfinished_jobs",
        )
        .with_body(serde_json::json!({"jobs": []}).to_string())
        .expect_at_least(2)
        .create_async()
        .await;

    let (pubsub_tx, pubsub) = PubsubClient::channel();
    let launcher = Arc::new(RecordingLauncher::default());
    // Real time scale: the ten-minute backstop cannot fire inside this test,
    // so a second poll proves the message woke the loop.
    let hooks = DaemonHooks {
        time_scale: 1,
        launcher: Some(launcher),
        pubsub: Some(pubsub),
        ..DaemonHooks::default()
    };
    let daemon = Daemon::new(config(&server, Duration::from_millis(300), hooks))
        .await
        .unwrap();

    let run = tokio::spawn(daemon.run());
    tokio::time::sleep(Duration::from_millis(60)).await;
    pubsub_tx
        .send(PubsubMessage::new(PubsubMessageKind::NewPendingJob))
        .unwrap();
    run.await.unwrap().unwrap();

    unfinished.assert_async().await;
}

#[tokio::test]
async fn without_messages_the_dispatcher_polls_once() {
    let mut server = mockito::Server::new_async().await;
    mount_control_plane(&mut server, &["test_processor"], None).await;
    let unfinished = server
        .mock(
            "GET",
            "/api/compute_resource/compute_resources/cr1/unfinished_jobs",
        )
        .with_body(serde_json::json!({"jobs": []}).to_string())
        .expect(1)
        .create_async()
        .await;

    let (_pubsub_tx, pubsub) = PubsubClient::channel();
    let launcher = Arc::new(RecordingLauncher::default());
    let hooks = DaemonHooks {
        time_scale: 1,
        launcher: Some(launcher),
        pubsub: Some(pubsub),
        ..DaemonHooks::default()
    };
    let daemon = Daemon::new(config(&server, Duration::from_millis(200), hooks))
        .await
        .unwrap();
    daemon.run().await.unwrap();

    unfinished.assert_async().await;
}

#[tokio::test]
async fn slurm_jobs_flush_as_one_allocation_and_become_queued() {
    let mut server = mockito::Server::new_async().await;
    mount_control_plane(
        &mut server,
        &["sorter"],
        Some(serde_json::json!({"partition": "gpu", "cpusPerTask": 4})),
    )
    .await;
    server
        .mock(
            "GET",
            "/api/compute_resource/compute_resources/cr1/unfinished_jobs",
        )
        .with_body(
            serde_json::json!({"jobs": [
                pending_job("a", "sorter", 1.0),
                pending_job("b", "sorter", 2.0),
            ]})
            .to_string(),
        )
        .create_async()
        .await;
    let queued_a = server
        .mock("PUT", "/api/processor/jobs/a/status")
        .match_body(mockito::Matcher::PartialJson(
            serde_json::json!({"status": "queued"}),
        ))
        .with_body(r#"{"success": true}"#)
        .expect(1)
        .create_async()
        .await;
    let queued_b = server
        .mock("PUT", "/api/processor/jobs/b/status")
        .match_body(mockito::Matcher::PartialJson(
            serde_json::json!({"status": "queued"}),
        ))
        .with_body(r#"{"success": true}"#)
        .expect(1)
        .create_async()
        .await;

    let launcher = Arc::new(RecordingLauncher::default());
    let hooks = DaemonHooks {
        time_scale: 10_000,
        launcher: Some(launcher.clone()),
        // Cohort-size flush only; the timers stay far away even after scaling.
        batching: Some(BatchingPolicy {
            max_jobs: 2,
            quiescence: Duration::from_secs(1_000_000),
            max_wait: Duration::from_secs(2_000_000),
        }),
        ..DaemonHooks::default()
    };
    let daemon = Daemon::new(config(&server, Duration::from_millis(200), hooks))
        .await
        .unwrap();
    daemon.run().await.unwrap();

    assert_eq!(launcher.batches(), vec![vec!["a".to_string(), "b".to_string()]]);
    assert!(launcher.launched().is_empty());
    queued_a.assert_async().await;
    queued_b.assert_async().await;
}

#[tokio::test]
async fn app_with_both_backends_aborts_startup() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/compute_resource/compute_resources/cr1/apps")
        .with_body(
            serde_json::json!({"apps": [{
                "name": "bad-app",
                "specUri": format!("{}/specs/bad-app.json", server.url()),
                "awsBatch": {"jobQueue": "q", "jobDefinition": "d"},
                "slurm": {"partition": "gpu"},
            }]})
            .to_string(),
        )
        .create_async()
        .await;

    let err = Daemon::new(config(&server, Duration::from_millis(100), DaemonHooks::default()))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("both awsBatch and slurm"));
}
