//! App registry: fetches the app records attached to this compute resource,
//! resolves each spec URI, validates the result, and reports the aggregated
//! spec back to the control plane.

use std::collections::HashMap;

use tracing::info;

use dendro_compute_core::client::ApiClient;
use dendro_compute_core::spec::{AppSpec, ComputeResourceSpec, find_ambiguous_parameter};
use dendro_compute_core::types::{AwsBatchOpts, ComputeResourceApp, SlurmOpts};

/// Execution placement of an app. An app has exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// Jobs run as local subprocesses.
    Local,
    /// Jobs are submitted to AWS Batch.
    AwsBatch(AwsBatchOpts),
    /// Jobs are batched into shared SLURM allocations.
    Slurm(SlurmOpts),
}

/// An app whose spec has been resolved and validated, with its placement attached.
#[derive(Debug, Clone)]
pub struct LoadedApp {
    /// The resolved spec document.
    pub spec: AppSpec,
    /// Where this app's jobs execute.
    pub backend: Backend,
}

/// A fatal problem while loading the app registry. The daemon cannot operate
/// without a consistent registry, so all of these abort startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// An app record sets both AWS Batch and SLURM options.
    #[error("app {app} sets both awsBatch and slurm options")]
    ConflictingBackends {
        /// Name of the offending app record.
        app: String,
    },
    /// Two apps declare a processor with the same name.
    #[error("duplicate processor name {processor} (apps {first} and {second})")]
    DuplicateProcessor {
        /// The duplicated processor name.
        processor: String,
        /// App that declared it first.
        first: String,
        /// App that declared it again.
        second: String,
    },
    /// A processor declares a parameter nested under another parameter.
    #[error("processor {processor} declares both parameter {name} and nested parameter {nested}")]
    AmbiguousParameter {
        /// The processor in question.
        processor: String,
        /// The plain parameter name.
        name: String,
        /// The nested name shadowing it.
        nested: String,
    },
    /// The app list could not be fetched.
    #[error("fetching compute resource apps failed: {0}")]
    Transport(String),
    /// A spec URI could not be resolved or parsed.
    #[error("loading app spec from {uri} failed: {detail}")]
    SpecLoad {
        /// The spec URI.
        uri: String,
        /// What went wrong.
        detail: String,
    },
}

async fn resolve_spec_uri(http: &reqwest::Client, uri: &str) -> anyhow::Result<AppSpec> {
    if let Some(path) = uri.strip_prefix("file://") {
        let raw = std::fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&raw)?);
    }
    if uri.starts_with('/') {
        let raw = std::fs::read_to_string(uri)?;
        return Ok(serde_json::from_str(&raw)?);
    }
    let res = http.get(uri).send().await?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        anyhow::bail!("http {status}: {body}");
    }
    Ok(res.json().await?)
}

fn validate_spec(spec: &AppSpec) -> Result<(), RegistryError> {
    for processor in &spec.processors {
        if let Some((name, nested)) = find_ambiguous_parameter(processor) {
            return Err(RegistryError::AmbiguousParameter {
                processor: processor.name.clone(),
                name,
                nested,
            });
        }
    }
    Ok(())
}

/// Turns one registry record into a loaded app: resolves the spec URI and
/// attaches the placement backend, rejecting records that set both.
pub(crate) async fn load_app(
    http: &reqwest::Client,
    record: &ComputeResourceApp,
) -> Result<LoadedApp, RegistryError> {
    let backend = match (&record.aws_batch, &record.slurm) {
        (Some(_), Some(_)) => {
            return Err(RegistryError::ConflictingBackends {
                app: record.name.clone(),
            });
        }
        (Some(aws_batch), None) => Backend::AwsBatch(aws_batch.clone()),
        (None, Some(slurm)) => Backend::Slurm(slurm.clone()),
        (None, None) => Backend::Local,
    };

    let spec = resolve_spec_uri(http, &record.spec_uri)
        .await
        .map_err(|err| RegistryError::SpecLoad {
            uri: record.spec_uri.clone(),
            detail: format!("{err:#}"),
        })?;
    validate_spec(&spec)?;

    info!(
        "loaded app {} ({} processors) from {}",
        spec.name,
        spec.processors.len(),
        record.spec_uri
    );
    Ok(LoadedApp { spec, backend })
}

/// Fetches and loads every app attached to this compute resource.
pub async fn load_apps(client: &ApiClient) -> Result<Vec<LoadedApp>, RegistryError> {
    let records = client
        .fetch_apps()
        .await
        .map_err(|err| RegistryError::Transport(format!("{err:#}")))?;

    let mut apps = Vec::with_capacity(records.len());
    for record in &records {
        apps.push(load_app(client.http(), record).await?);
    }
    Ok(apps)
}

/// Builds the `processor name -> app index` map, rejecting duplicates.
pub fn processor_index(apps: &[LoadedApp]) -> Result<HashMap<String, usize>, RegistryError> {
    let mut index = HashMap::new();
    for (position, app) in apps.iter().enumerate() {
        for processor in &app.spec.processors {
            if let Some(previous) = index.insert(processor.name.clone(), position) {
                return Err(RegistryError::DuplicateProcessor {
                    processor: processor.name.clone(),
                    first: apps[previous].spec.name.clone(),
                    second: app.spec.name.clone(),
                });
            }
        }
    }
    Ok(index)
}

/// Aggregates every app's public spec and PUTs it to the control plane.
pub async fn report_spec(client: &ApiClient, apps: &[LoadedApp]) -> anyhow::Result<()> {
    let spec = ComputeResourceSpec {
        apps: apps.iter().map(|app| app.spec.clone()).collect(),
    };
    client.put_spec(&spec).await
}
