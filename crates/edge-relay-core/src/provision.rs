//! Topic provisioning.
//!
//! Reconciles the topic names a cluster must host against what actually
//! exists there, creating missing topics when authorized. One topic's
//! creation failure never abandons provisioning for the rest.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::{RelayError, Result};

/// Administrative view of one cluster's topics.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Cluster display name for logs and errors.
    fn name(&self) -> &str;

    /// Names of the topics that currently exist on the cluster.
    fn list_topics(&self) -> Result<HashSet<String>>;

    /// Create one topic with the cluster's configured defaults.
    async fn create_topic(&self, name: &str) -> Result<()>;
}

/// Ensure every name in `required` exists on the cluster.
///
/// Listing failures are logged and provisioning proceeds optimistically;
/// the forwarder's own errors will surface a genuinely absent topic.
///
/// # Errors
///
/// Returns [`RelayError::TopicMissing`] when a topic is absent and
/// auto-creation is disabled; the process cannot run without it.
pub async fn ensure_topics<A: TopicAdmin + ?Sized>(
    admin: &A,
    required: &[String],
    create_topics: bool,
) -> Result<()> {
    if required.is_empty() {
        return Ok(());
    }

    let existing = match admin.list_topics() {
        Ok(existing) => existing,
        Err(e) => {
            error!(cluster = %admin.name(), error = %e, "unable to list topics");
            return Ok(());
        }
    };

    for name in required {
        if existing.contains(name) {
            info!(cluster = %admin.name(), topic = %name, "topic already exists");
            continue;
        }
        if !create_topics {
            return Err(RelayError::TopicMissing {
                topic: name.clone(),
                cluster: admin.name().to_string(),
            });
        }
        match admin.create_topic(name).await {
            Ok(()) => info!(cluster = %admin.name(), topic = %name, "created topic"),
            Err(e) => {
                warn!(
                    cluster = %admin.name(),
                    topic = %name,
                    error = %e,
                    "unable to create topic"
                );
            }
        }
    }
    Ok(())
}
