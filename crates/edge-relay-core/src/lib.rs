//! Edge Relay Core Library
//!
//! This library implements a forwarding agent that bridges Kafka topics
//! between an edge cluster and a central cluster. Records consumed on one
//! side are produced on the other with at-least-once delivery; offsets
//! advance only after the receiving cluster has acknowledged the batch.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`topics`] - Topic specs, directions, and route tables
//! - [`endpoint`] - Per-cluster consumer/producer/admin clients
//! - [`forward`] - The poll/produce/commit state machine
//! - [`provision`] - Topic existence checks and auto-creation
//! - [`heartbeat`] - Periodic agent liveness records
//! - [`security`] - TLS and SASL client settings
//! - [`auth`] - Client context and AWS MSK IAM token signing
//! - [`backoff`] - Quadratic retry delays
//!
//! # Example
//!
//! ```rust,ignore
//! use edge_relay_core::config::AgentConfig;
//!
//! // Load configuration
//! let config = AgentConfig::from_file("agent.yaml")?;
//!
//! // Connect the endpoints and start forwarding
//! // ...
//! ```

#![forbid(unsafe_code)]

pub mod auth;
pub mod backoff;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod forward;
pub mod heartbeat;
pub mod provision;
pub mod security;
pub mod topics;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::{AgentConfig, ClusterConfig, SaslMechanism};
pub use endpoint::{ClusterEndpoint, Role};
pub use error::{ConfigError, RelayError, Result};
pub use forward::{BatchSink, BatchSource, Forwarder, RelayRecord};
pub use provision::TopicAdmin;
pub use topics::{Direction, Topic, TopicSet};
