//! Agent configuration.
//!
//! Configuration is loaded once from a YAML file, validated, and never
//! mutated afterwards. Credentials support `${ENV_VAR}` expansion.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::topics::TopicSet;

/// Root configuration for the relay agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Agent identifier. Used as the partition key for records without
    /// one and as the default consumer group id. Defaults to the
    /// hostname reported by the kernel.
    #[serde(default)]
    pub id: String,

    /// Create missing topics on the clusters when authorized.
    #[serde(default)]
    pub create_topics: bool,

    /// Upper bound on the number of records fetched per poll.
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,

    /// Ceiling in seconds for the escalating failure backoff.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// The edge cluster the agent pushes from (and pulls into).
    #[serde(default)]
    pub source: ClusterConfig,

    /// The core cluster the agent pushes into (and pulls from).
    #[serde(default)]
    pub destination: ClusterConfig,

    /// Optional periodic heartbeat to a destination topic.
    #[serde(default)]
    pub heartbeat: Option<HeartbeatConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for one broker cluster.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Display name used in logs ("source" or "destination" by default).
    #[serde(default)]
    pub name: String,

    /// Comma-separated seed broker addresses.
    #[serde(default)]
    pub bootstrap_servers: String,

    /// Topic specs: push specs under `source`, pull specs under
    /// `destination`. Grammar: `name` or `a:b`.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Consumer group id, defaulting to the agent id.
    #[serde(default)]
    pub consumer_group_id: String,

    /// Optional maximum Kafka protocol version to negotiate.
    #[serde(default)]
    pub max_version: Option<String>,

    /// Partition count for auto-created topics; -1 uses the broker's
    /// cluster default.
    #[serde(default = "default_broker_managed")]
    pub default_partitions: i32,

    /// Replication factor for auto-created topics; -1 uses the broker's
    /// cluster default.
    #[serde(default = "default_broker_managed")]
    pub default_replication: i32,

    /// TLS settings for this cluster.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// SASL settings for this cluster.
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
}

impl ClusterConfig {
    /// Whether TLS is enabled for this cluster.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enabled)
    }

    /// Resolve the SASL block into a closed mechanism with credentials.
    ///
    /// An absent block, or one with every field empty, means no SASL.
    ///
    /// # Errors
    ///
    /// Returns an error when only some of method/username/password are
    /// set, or when the method string is unrecognized.
    pub fn configured_sasl(&self) -> ConfigResult<Option<SaslCredentials>> {
        let Some(sasl) = &self.sasl else {
            return Ok(None);
        };
        let any_set = !sasl.sasl_method.is_empty()
            || !sasl.sasl_username.is_empty()
            || !sasl.sasl_password.is_empty();
        if !any_set {
            return Ok(None);
        }
        if sasl.sasl_method.is_empty()
            || sasl.sasl_username.is_empty()
            || sasl.sasl_password.is_empty()
        {
            return Err(ConfigError::IncompleteSasl);
        }
        let mechanism = SaslMechanism::parse(&sasl.sasl_method)?;
        if mechanism == SaslMechanism::AwsMskIam && sasl.sasl_aws_region.trim().is_empty() {
            return Err(ConfigError::MissingValue("sasl_aws_region"));
        }
        Ok(Some(SaslCredentials {
            mechanism,
            username: sasl.username(),
            password: sasl.password(),
            aws_region: sasl.sasl_aws_region.trim().to_string(),
        }))
    }
}

/// TLS settings for a cluster connection.
///
/// `enabled=false` disables TLS entirely; `enabled=true` with no
/// material uses the default trust store; any configured path switches
/// to custom trust/identity material.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Path to the client private key (PEM).
    #[serde(default)]
    pub client_key: Option<PathBuf>,

    /// Path to the client certificate (PEM).
    #[serde(default)]
    pub client_cert: Option<PathBuf>,

    /// Path to the CA certificate (PEM) used to verify the brokers.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
}

/// Raw SASL block as it appears in the config file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SaslConfig {
    #[serde(default)]
    pub sasl_method: String,
    #[serde(default)]
    pub sasl_username: String,
    #[serde(default)]
    pub sasl_password: String,
    /// AWS region, required for the aws-msk-iam method only.
    #[serde(default)]
    pub sasl_aws_region: String,
}

impl SaslConfig {
    /// Username with environment variables expanded.
    #[must_use]
    pub fn username(&self) -> String {
        expand_env_vars(&self.sasl_username)
    }

    /// Password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.sasl_password)
    }
}

/// Closed set of supported SASL mechanisms with resolved credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub mechanism: SaslMechanism,
    /// Username, or the access key for AWS MSK IAM.
    pub username: String,
    /// Password, or the secret key for AWS MSK IAM.
    pub password: String,
    /// Signing region; empty unless the mechanism is AWS MSK IAM.
    pub aws_region: String,
}

/// Supported SASL mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    Plain,
    ScramSha256,
    ScramSha512,
    AwsMskIam,
}

impl SaslMechanism {
    /// Parse a method string, insensitive to case and `-`/`_`
    /// punctuation ("SCRAM-SHA-256", "scram_sha_256", ...).
    ///
    /// # Errors
    ///
    /// Returns an error for any string outside the supported set.
    pub fn parse(method: &str) -> ConfigResult<Self> {
        let normalized: String = method
            .to_lowercase()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect();
        match normalized.as_str() {
            "plain" => Ok(Self::Plain),
            "scramsha256" => Ok(Self::ScramSha256),
            "scramsha512" => Ok(Self::ScramSha512),
            "awsmskiam" => Ok(Self::AwsMskIam),
            _ => Err(ConfigError::UnknownSaslMethod(method.to_string())),
        }
    }

    /// The mechanism name used in the SASL handshake.
    #[must_use]
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
            Self::AwsMskIam => "OAUTHBEARER",
        }
    }
}

/// Periodic heartbeat settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    /// Destination topic the heartbeat is produced to.
    pub topic: String,

    /// Seconds between heartbeats.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value functions

fn default_max_poll_records() -> usize {
    1000
}

fn default_max_backoff_secs() -> u64 {
    600 // ten minutes
}

fn default_broker_managed() -> i32 {
    -1
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable
/// `VAR_NAME`, or the empty string when unset.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// Hostname reported by the kernel, used as the default agent id.
fn kernel_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.apply_defaults()?;
        config.validate()?;
        Ok(config)
    }

    /// Fill values that depend on the environment or on other fields.
    fn apply_defaults(&mut self) -> ConfigResult<()> {
        if self.id.is_empty() {
            self.id = kernel_hostname().ok_or(ConfigError::NoAgentId)?;
        }
        let defaults = [
            (&mut self.source, "source", "127.0.0.1:19092"),
            (&mut self.destination, "destination", "127.0.0.1:29092"),
        ];
        for (cluster, name, bootstrap) in defaults {
            if cluster.name.is_empty() {
                cluster.name = name.to_string();
            }
            if cluster.bootstrap_servers.is_empty() {
                cluster.bootstrap_servers = bootstrap.to_string();
            }
            if cluster.consumer_group_id.is_empty() {
                cluster.consumer_group_id.clone_from(&self.id);
            }
        }
        Ok(())
    }

    /// Validate the configuration. Runs once at load time.
    ///
    /// # Errors
    ///
    /// Returns the first fatal problem found: empty/duplicate/circular
    /// topic set, malformed specs, or bad security blocks.
    pub fn validate(&self) -> ConfigResult<()> {
        TopicSet::from_config(self)?;
        self.source.configured_sasl()?;
        self.destination.configured_sasl()?;
        if let Some(heartbeat) = &self.heartbeat {
            if heartbeat.topic.is_empty() {
                return Err(ConfigError::MissingValue("heartbeat.topic"));
            }
        }
        Ok(())
    }
}
