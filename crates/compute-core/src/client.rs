//! HTTP client for the control plane.
//!
//! Compute-resource endpoints are authenticated by signing a timestamped
//! payload with the resource private key; the per-job status endpoint is
//! authenticated by the job's own private key instead.

use chrono::Utc;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::ComputeResourceIdentity;
use crate::signing::sign_payload;
use crate::spec::ComputeResourceSpec;
use crate::types::{ComputeResourceApp, Job, JobStatus, PubsubSubscription};

#[derive(Debug, Deserialize)]
struct GetAppsResponse {
    apps: Vec<ComputeResourceApp>,
}

#[derive(Debug, Deserialize)]
struct GetUnfinishedJobsResponse {
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct GetPubsubSubscriptionResponse {
    subscription: PubsubSubscription,
}

/// Signed client for the control plane's compute-resource API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    identity: ComputeResourceIdentity,
}

impl ApiClient {
    /// Creates a client for `base_url`, signing as `identity`.
    pub fn new(http: reqwest::Client, base_url: Url, identity: ComputeResourceIdentity) -> Self {
        Self {
            http,
            base_url,
            identity,
        }
    }

    /// The underlying HTTP client, shared with the spec resolver and pub/sub transport.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The control-plane base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The compute resource id this client signs as.
    pub fn compute_resource_id(&self) -> &str {
        &self.identity.compute_resource_id
    }

    fn signed_headers(&self, path: &str) -> anyhow::Result<Vec<(&'static str, String)>> {
        let payload = serde_json::json!({
            "path": path,
            "timestamp": Utc::now().timestamp(),
        })
        .to_string();
        let signature = sign_payload(&self.identity.private_key, &payload)?;

        let mut headers = vec![
            ("compute-resource-id", self.identity.compute_resource_id.clone()),
            ("compute-resource-payload", payload),
            ("compute-resource-signature", signature),
        ];
        if let Some(node_id) = &self.identity.node_id {
            headers.push(("compute-resource-node-id", node_id.clone()));
        }
        if let Some(node_name) = &self.identity.node_name {
            headers.push(("compute-resource-node-name", node_name.clone()));
        }
        Ok(headers)
    }

    async fn get_signed<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        let mut req = self.http.get(url);
        for (name, value) in self.signed_headers(path)? {
            req = req.header(name, value);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("GET {path}: http {status}: {body}");
        }
        Ok(res.json().await?)
    }

    async fn put_signed<B: serde::Serialize>(&self, path: &str, body: &B) -> anyhow::Result<()> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        let mut req = self.http.put(url).json(body);
        for (name, value) in self.signed_headers(path)? {
            req = req.header(name, value);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("PUT {path}: http {status}: {body}");
        }
        Ok(())
    }

    /// Fetches the app records attached to this compute resource.
    pub async fn fetch_apps(&self) -> anyhow::Result<Vec<ComputeResourceApp>> {
        let path = format!(
            "/api/compute_resource/compute_resources/{}/apps",
            self.identity.compute_resource_id
        );
        let res: GetAppsResponse = self.get_signed(&path).await?;
        Ok(res.apps)
    }

    /// Reports the aggregated app spec document.
    pub async fn put_spec(&self, spec: &ComputeResourceSpec) -> anyhow::Result<()> {
        let path = format!(
            "/api/compute_resource/compute_resources/{}/spec",
            self.identity.compute_resource_id
        );
        self.put_signed(&path, &serde_json::json!({ "spec": spec })).await
    }

    /// Fetches the pub/sub subscription parameters.
    pub async fn fetch_pubsub_subscription(&self) -> anyhow::Result<PubsubSubscription> {
        let path = format!(
            "/api/compute_resource/compute_resources/{}/pubsub_subscription",
            self.identity.compute_resource_id
        );
        let res: GetPubsubSubscriptionResponse = self.get_signed(&path).await?;
        Ok(res.subscription)
    }

    /// Fetches every job addressed to this compute resource that has not
    /// reached a terminal state.
    pub async fn fetch_unfinished_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let path = format!(
            "/api/compute_resource/compute_resources/{}/unfinished_jobs",
            self.identity.compute_resource_id
        );
        let res: GetUnfinishedJobsResponse = self.get_signed(&path).await?;
        Ok(res.jobs)
    }

    /// Sets a job's status, authenticated by the job's own private key.
    ///
    /// Refuses to issue the request when `job_private_key` is empty.
    pub async fn set_job_status(
        &self,
        job_id: &str,
        job_private_key: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        if job_private_key.is_empty() {
            anyhow::bail!("job {job_id} has no private key; refusing to set status");
        }
        let path = format!("/api/processor/jobs/{job_id}/status");
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        let body = serde_json::json!({
            "status": status,
            "error": error,
        });
        let res = self
            .http
            .put(url)
            .header("job-private-key", job_private_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("PUT {path}: http {status}: {body}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ComputeResourceIdentity {
        ComputeResourceIdentity {
            compute_resource_id: "cr1".into(),
            private_key: "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60"
                .into(),
            node_id: None,
            node_name: Some("login-01".into()),
        }
    }

    fn client_for(server: &mockito::Server) -> ApiClient {
        ApiClient::new(
            reqwest::Client::new(),
            Url::parse(&server.url()).unwrap(),
            identity(),
        )
    }

    #[tokio::test]
    async fn fetch_apps_sends_signed_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/compute_resource/compute_resources/cr1/apps")
            .match_header("compute-resource-id", "cr1")
            .match_header("compute-resource-signature", mockito::Matcher::Regex("^[0-9a-f]{128}$".into()))
            .match_header("compute-resource-node-name", "login-01")
            .with_body(r#"{"apps": []}"#)
            .create_async()
            .await;

        let apps = client_for(&server).fetch_apps().await.unwrap();
        assert!(apps.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn set_job_status_uses_job_private_key_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/api/processor/jobs/j1/status")
            .match_header("job-private-key", "jpk-1")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "status": "failed",
                "error": "boom",
            })))
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        client_for(&server)
            .set_job_status("j1", "jpk-1", JobStatus::Failed, Some("boom"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn set_job_status_refuses_empty_key() {
        let server = mockito::Server::new_async().await;
        let err = client_for(&server)
            .set_job_status("j1", "", JobStatus::Queued, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no private key"));
    }

    #[tokio::test]
    async fn non_success_status_surfaces_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/compute_resource/compute_resources/cr1/unfinished_jobs")
            .with_status(500)
            .with_body("database down")
            .create_async()
            .await;

        let err = client_for(&server).fetch_unfinished_jobs().await.unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("500"));
        assert!(text.contains("database down"));
    }
}
