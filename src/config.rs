//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use tracing::info;

use crate::admission::{AdmissionPolicy, PolicyTable, ResourceRule, DEFAULT_SWEEP_PROBABILITY};
use crate::error::{GatekeeperError, Result};

/// Prefix for environment overrides, e.g. `GATEKEEPER__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Bearer token required on `/admin` routes. Unset leaves them open.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            admin_token: None,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Fraction of admission checks that trigger an expiry sweep
    #[serde(default = "default_sweep_probability")]
    pub sweep_probability: f64,

    /// Interval for an additional periodic sweep, in seconds
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Policy applied to resources without an override
    #[serde(default)]
    pub default_policy: AdmissionPolicy,

    /// Per-resource overrides
    #[serde(default)]
    pub resources: Vec<ResourceRule>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            sweep_probability: default_sweep_probability(),
            sweep_interval_secs: None,
            default_policy: AdmissionPolicy::default(),
            resources: Vec::new(),
        }
    }
}

fn default_sweep_probability() -> f64 {
    DEFAULT_SWEEP_PROBABILITY
}

impl AdmissionConfig {
    /// Build the policy table described by this configuration.
    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::new(self.default_policy, self.resources.clone())
    }
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file layered with
    /// `GATEKEEPER__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config: GatekeeperConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let probability = self.admission.sweep_probability;
        if !(0.0..=1.0).contains(&probability) {
            return Err(GatekeeperError::Config(format!(
                "sweep_probability must be within [0, 1], got {}",
                probability
            )));
        }
        if self.admission.sweep_interval_secs == Some(0) {
            return Err(GatekeeperError::Config(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        self.admission.policy_table().validate()
    }
}
