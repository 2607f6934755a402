//! Periodic heartbeat to the destination cluster.
//!
//! Lets the core side observe which agents are alive and forwarding.
//! Runs as its own cancellable task; a failed beat is logged and the
//! next tick tries again.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::HeartbeatConfig;
use crate::endpoint::ClusterEndpoint;
use crate::forward::{BatchSink, RelayRecord};
use crate::provision;

#[derive(Debug, Serialize)]
struct Heartbeat<'a> {
    id: &'a str,
    timestamp: i64,
}

/// Send a heartbeat record every `interval_secs` until cancellation.
///
/// The heartbeat topic is provisioned up front like any other required
/// topic.
pub async fn run(
    config: HeartbeatConfig,
    agent_id: String,
    destination: Arc<ClusterEndpoint>,
    create_topics: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) =
        provision::ensure_topics(destination.as_ref(), &[config.topic.clone()], create_topics).await
    {
        error!(error = %e, "unable to provision heartbeat topic");
        return;
    }

    info!(
        topic = %config.topic,
        interval_secs = config.interval_secs,
        "sending heartbeats"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                beat(&config, &agent_id, destination.as_ref()).await;
            }
            _ = async {
                let _ = shutdown.wait_for(|stop| *stop).await;
            } => {
                info!("heartbeat stopping");
                return;
            }
        }
    }
}

async fn beat(config: &HeartbeatConfig, agent_id: &str, destination: &ClusterEndpoint) {
    let timestamp = unix_millis();
    let heartbeat = Heartbeat {
        id: agent_id,
        timestamp,
    };
    let payload = match serde_json::to_vec(&heartbeat) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "unable to encode heartbeat");
            return;
        }
    };
    let record = RelayRecord {
        source_topic: String::new(),
        partition: -1,
        offset: -1,
        topic: config.topic.clone(),
        key: Some(agent_id.as_bytes().to_vec()),
        payload: Some(payload),
        timestamp: Some(timestamp),
    };
    match destination.deliver(std::slice::from_ref(&record)).await {
        Ok(()) => debug!(timestamp, "heartbeat sent"),
        Err(e) => error!(error = %e, "unable to send heartbeat"),
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_encodes_id_and_timestamp() {
        let heartbeat = Heartbeat {
            id: "agent-1",
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&heartbeat).unwrap();
        assert!(json.contains("\"id\":\"agent-1\""));
        assert!(json.contains("\"timestamp\":1700000000000"));
    }
}
