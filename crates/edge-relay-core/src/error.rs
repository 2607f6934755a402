//! Domain error types for the edge relay agent.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use thiserror::Error;

/// Errors related to configuration parsing and validation.
///
/// All of these are fatal: the agent refuses to start on any of them.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required configuration value was not supplied.
    #[error("missing required config value: {0}")]
    MissingValue(&'static str),

    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A topic spec had more than one `:` separator.
    #[error("incorrect topic configuration '{0}': expected 'name' or 'source:destination'")]
    MalformedTopicSpec(String),

    /// Neither push nor pull topics were configured.
    #[error("no push or pull topics configured")]
    EmptyTopicSet,

    /// The same topic relation was configured twice.
    #[error("duplicate topic configured: {0}")]
    DuplicateTopic(String),

    /// A push and a pull relation over the same name pair would mirror
    /// records back and forth indefinitely.
    #[error("topic circular dependency configured: ({0}) ({1})")]
    CircularTopics(String, String),

    /// SASL requires method, username and password together.
    #[error("all of sasl_method, sasl_username and sasl_password must be specified if any are")]
    IncompleteSasl,

    /// The SASL method string did not match any supported mechanism.
    #[error("unrecognized sasl method: {0}")]
    UnknownSaslMethod(String),

    /// No `id` configured and the kernel hostname is unavailable.
    #[error("unable to get hostname from kernel, set 'id' in config")]
    NoAgentId,
}

/// Errors that occur while talking to the broker clusters.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Error reported by the underlying Kafka client.
    #[error("kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Failed to construct a client for an endpoint. Fatal: without a
    /// client the endpoint is unusable.
    #[error("unable to build {cluster} client: {source}")]
    ClientBuild {
        cluster: String,
        #[source]
        source: rdkafka::error::KafkaError,
    },

    /// A required topic is absent and auto-creation is disabled.
    #[error("topic '{topic}' does not exist in {cluster} cluster")]
    TopicMissing { topic: String, cluster: String },

    /// Consumer-side operation attempted on an endpoint that has no
    /// topics to consume.
    #[error("{cluster} endpoint has no consumer")]
    NotAConsumer { cluster: String },

    /// Configuration error surfaced after load time.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
