//! Per-directory config bootstrap and the compute resource identity.
//!
//! Registration writes a small YAML file into the daemon directory; its values
//! are exported into the process environment at startup (file wins), and the
//! identity is then read from the environment.

use std::collections::BTreeMap;
use std::path::Path;

/// Name of the per-directory bootstrap file written at registration time.
pub const CONFIG_FILE_NAME: &str = ".dendro-compute-resource-node.yaml";

/// Environment variable carrying the compute resource id (hex public key).
pub const ENV_COMPUTE_RESOURCE_ID: &str = "COMPUTE_RESOURCE_ID";
/// Environment variable carrying the compute resource private key (hex).
pub const ENV_COMPUTE_RESOURCE_PRIVATE_KEY: &str = "COMPUTE_RESOURCE_PRIVATE_KEY";
/// Environment variable carrying the optional node id.
pub const ENV_NODE_ID: &str = "NODE_ID";
/// Environment variable carrying the optional node name.
pub const ENV_NODE_NAME: &str = "NODE_NAME";

/// The config keys the bootstrap recognizes; anything else in the file is ignored.
pub const ENV_VAR_KEYS: [&str; 4] = [
    ENV_COMPUTE_RESOURCE_ID,
    ENV_COMPUTE_RESOURCE_PRIVATE_KEY,
    ENV_NODE_ID,
    ENV_NODE_NAME,
];

/// A fatal startup configuration problem.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Neither the config file nor the environment supplies the resource id.
    #[error(
        "Compute resource has not been initialized in this directory, and the environment variable COMPUTE_RESOURCE_ID is not set."
    )]
    MissingComputeResourceId,
    /// Neither the config file nor the environment supplies the private key.
    #[error(
        "Compute resource has not been initialized in this directory, and the environment variable COMPUTE_RESOURCE_PRIVATE_KEY is not set."
    )]
    MissingPrivateKey,
}

/// Reads the bootstrap file in `dir` and returns the recognized key/value
/// pairs, in declaration order of [`ENV_VAR_KEYS`].
///
/// A missing file yields an empty list (the environment may supply the values
/// directly). Unrecognized keys and non-string values are ignored.
pub fn read_config_env(dir: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let path = dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path)?;
    let mapping: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(&raw)?;

    let mut pairs = Vec::new();
    for key in ENV_VAR_KEYS {
        if let Some(value) = mapping.get(key).and_then(|v| v.as_str()) {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    Ok(pairs)
}

/// Identity of this compute resource, immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct ComputeResourceIdentity {
    /// The compute resource id (hex ed25519 public key).
    pub compute_resource_id: String,
    /// The hex private key used to sign control-plane requests.
    pub private_key: String,
    /// Optional node id, sent as a request header when present.
    pub node_id: Option<String>,
    /// Optional node name, sent as a request header when present.
    pub node_name: Option<String>,
}

impl ComputeResourceIdentity {
    /// Builds the identity from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let compute_resource_id = std::env::var(ENV_COMPUTE_RESOURCE_ID)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingComputeResourceId)?;
        let private_key = std::env::var(ENV_COMPUTE_RESOURCE_PRIVATE_KEY)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingPrivateKey)?;
        Ok(Self {
            compute_resource_id,
            private_key,
            node_id: std::env::var(ENV_NODE_ID).ok().filter(|v| !v.is_empty()),
            node_name: std::env::var(ENV_NODE_NAME).ok().filter(|v| !v.is_empty()),
        })
    }
}
