//! Cluster endpoints.
//!
//! A [`ClusterEndpoint`] owns one cluster's connection: a producer that
//! any task may use, an admin client for topic and broker listing, and,
//! when the endpoint has topics to consume, a consumer group member with
//! manual offset commits and earliest-offset reset. Endpoints are built
//! exactly once at startup, before any forwarder task spawns, and shared
//! behind an `Arc` afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{error, info, warn};

use crate::auth::RelayContext;
use crate::config::{AgentConfig, ClusterConfig};
use crate::error::{RelayError, Result};
use crate::forward::{BatchSink, BatchSource, RelayRecord};
use crate::provision::TopicAdmin;
use crate::security;
use crate::topics::{Direction, TopicSet};

const SESSION_TIMEOUT_MS: &str = "60000";
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
/// How long to wait for further records once the first one arrived.
const BATCH_DRAIN_WAIT: Duration = Duration::from_millis(100);

/// Which side of the relay an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The edge cluster.
    Source,
    /// The core cluster.
    Destination,
}

impl Role {
    /// The direction whose records are consumed from this endpoint:
    /// push relations consume from the edge, pull relations from the core.
    #[must_use]
    pub fn consumes(self) -> Direction {
        match self {
            Self::Source => Direction::Push,
            Self::Destination => Direction::Pull,
        }
    }

    fn cluster(self, config: &AgentConfig) -> &ClusterConfig {
        match self {
            Self::Source => &config.source,
            Self::Destination => &config.destination,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

/// One cluster's ready clients.
///
/// The consumer half is owned by the single forwarder task that consumes
/// from this endpoint; the producer half is safe for concurrent use by
/// both directions.
pub struct ClusterEndpoint {
    name: String,
    role: Role,
    consumer: Option<StreamConsumer<RelayContext>>,
    producer: FutureProducer<RelayContext>,
    admin: AdminClient<RelayContext>,
    default_partitions: i32,
    default_replication: i32,
}

impl ClusterEndpoint {
    /// Build the clients for one cluster and subscribe the consumer to
    /// the topics this role consumes, if any.
    ///
    /// # Errors
    ///
    /// Client construction failure is fatal; there is no usable endpoint
    /// without a client.
    pub fn connect(role: Role, config: &AgentConfig, topics: &TopicSet) -> Result<Self> {
        let cluster = role.cluster(config);
        let mut base = ClientConfig::new();
        security::apply(cluster, &mut base)?;
        // One context per client; it signs OAUTHBEARER tokens when MSK
        // IAM is configured and is inert otherwise.
        let context = RelayContext::new(security::iam_signer(cluster)?);

        let consume_names = topics.consume_names(role.consumes());
        let consumer = if consume_names.is_empty() {
            None
        } else {
            let mut consumer_config = base.clone();
            consumer_config
                .set("group.id", &cluster.consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .set("session.timeout.ms", SESSION_TIMEOUT_MS)
                .set("enable.partition.eof", "false");
            let consumer: StreamConsumer<RelayContext> = consumer_config
                .create_with_context(context.clone())
                .map_err(|e| RelayError::ClientBuild {
                    cluster: cluster.name.clone(),
                    source: e,
                })?;
            let names: Vec<&str> = consume_names.iter().map(String::as_str).collect();
            consumer.subscribe(&names)?;
            info!(
                cluster = %cluster.name,
                group = %cluster.consumer_group_id,
                topics = ?consume_names,
                "joined consumer group"
            );
            Some(consumer)
        };

        let mut producer_config = base.clone();
        producer_config.set("acks", "all");
        let producer: FutureProducer<RelayContext> = producer_config
            .create_with_context(context.clone())
            .map_err(|e| RelayError::ClientBuild {
                cluster: cluster.name.clone(),
                source: e,
            })?;

        let admin: AdminClient<RelayContext> = base
            .create_with_context(context)
            .map_err(|e| RelayError::ClientBuild {
                cluster: cluster.name.clone(),
                source: e,
            })?;

        info!(cluster = %cluster.name, role = %role, "created client");

        Ok(Self {
            name: cluster.name.clone(),
            role,
            consumer,
            producer,
            admin,
            default_partitions: cluster.default_partitions,
            default_replication: cluster.default_replication,
        })
    }

    /// Cluster display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether this endpoint joined a consumer group.
    #[must_use]
    pub fn is_consumer(&self) -> bool {
        self.consumer.is_some()
    }

    /// Check connectivity and log the cluster's brokers.
    ///
    /// Failure is logged, not fatal: the cluster may come up later and
    /// the forwarder backoff absorbs the meantime.
    pub fn ping(&self) {
        match self
            .producer
            .client()
            .fetch_metadata(None, METADATA_TIMEOUT)
        {
            Ok(metadata) => {
                for broker in metadata.brokers() {
                    info!(
                        cluster = %self.name,
                        id = broker.id(),
                        host = %broker.host(),
                        port = broker.port(),
                        "broker"
                    );
                }
            }
            Err(e) => {
                error!(cluster = %self.name, error = %e, "unable to ping cluster");
            }
        }
    }

    fn consumer(&self) -> Result<&StreamConsumer<RelayContext>> {
        self.consumer.as_ref().ok_or_else(|| RelayError::NotAConsumer {
            cluster: self.name.clone(),
        })
    }
}

#[async_trait]
impl TopicAdmin for ClusterEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_topics(&self) -> Result<HashSet<String>> {
        let metadata = self.admin.inner().fetch_metadata(None, METADATA_TIMEOUT)?;
        Ok(metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .collect())
    }

    /// Creates with this cluster's configured defaults; -1 partitions or
    /// replication defer to the broker's cluster default.
    async fn create_topic(&self, name: &str) -> Result<()> {
        let new_topic = NewTopic::new(
            name,
            self.default_partitions,
            TopicReplication::Fixed(self.default_replication),
        );
        let results = self
            .admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await?;
        for result in results {
            if let Err((_, code)) = result {
                return Err(RelayError::Kafka(KafkaError::AdminOp(code)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BatchSource for ClusterEndpoint {
    async fn poll_batch(&self, max_records: usize) -> Result<Vec<RelayRecord>> {
        let consumer = self.consumer()?;

        // Block until the first record, then drain whatever else is
        // already buffered, up to the poll bound.
        let first = consumer.recv().await?;
        let mut batch = vec![relay_record(&first)];

        while batch.len() < max_records {
            match tokio::time::timeout(BATCH_DRAIN_WAIT, consumer.recv()).await {
                Ok(Ok(message)) => batch.push(relay_record(&message)),
                Ok(Err(e)) => {
                    // The fetched records stay valid; surface the error
                    // on the next poll if it persists.
                    warn!(cluster = %self.name, error = %e, "fetch error while draining batch");
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    async fn commit(&self, batch: &[RelayRecord]) -> Result<()> {
        let consumer = self.consumer()?;
        let mut list = TopicPartitionList::new();
        for ((topic, partition), offset) in next_offsets(batch) {
            list.add_partition_offset(&topic, partition, Offset::Offset(offset))?;
        }
        consumer.commit(&list, CommitMode::Sync)?;
        Ok(())
    }

    fn release_rebalance(&self) {
        // librdkafka serves group rebalance events from the consumer
        // queue, so reassignment already waits until the next poll once
        // a batch is in flight. Nothing to release explicitly.
    }
}

#[async_trait]
impl BatchSink for ClusterEndpoint {
    async fn deliver(&self, batch: &[RelayRecord]) -> Result<()> {
        // Enqueue the whole batch before waiting so the producer can
        // fill its own batches, then collect every acknowledgement and
        // report the first failure.
        let mut pending = Vec::with_capacity(batch.len());
        for record in batch {
            let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&record.topic);
            if let Some(key) = &record.key {
                future_record = future_record.key(key.as_slice());
            }
            if let Some(payload) = &record.payload {
                future_record = future_record.payload(payload.as_slice());
            }
            if let Some(timestamp) = record.timestamp {
                future_record = future_record.timestamp(timestamp);
            }
            match self.producer.send_result(future_record) {
                Ok(delivery) => pending.push(delivery),
                Err((e, _)) => return Err(e.into()),
            }
        }

        let mut first_err = None;
        for delivery in pending {
            let failure = match delivery.await {
                Ok(Ok(_)) => None,
                Ok(Err((e, _))) => Some(e),
                Err(_) => Some(KafkaError::Canceled),
            };
            if let Some(e) = failure {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e.into()),
        }
    }
}

fn relay_record(message: &BorrowedMessage<'_>) -> RelayRecord {
    RelayRecord {
        source_topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        topic: message.topic().to_string(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
        timestamp: message.timestamp().to_millis(),
    }
}

/// The next offset to commit per source partition: one past the highest
/// offset in the batch, never a blanket commit of everything polled.
fn next_offsets(batch: &[RelayRecord]) -> HashMap<(String, i32), i64> {
    let mut offsets: HashMap<(String, i32), i64> = HashMap::new();
    for record in batch {
        let next = record.offset + 1;
        offsets
            .entry((record.source_topic.clone(), record.partition))
            .and_modify(|current| *current = (*current).max(next))
            .or_insert(next);
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::topics::TopicSet;

    fn test_config(push: &[&str], pull: &[&str]) -> AgentConfig {
        let yaml = format!(
            "id: agent-1\nsource:\n  topics: [{}]\ndestination:\n  topics: [{}]\n",
            push.join(", "),
            pull.join(", "),
        );
        AgentConfig::from_str(&yaml).unwrap()
    }

    #[test]
    fn test_role_consumes_direction() {
        assert_eq!(Role::Source.consumes(), Direction::Push);
        assert_eq!(Role::Destination.consumes(), Direction::Pull);
    }

    #[tokio::test]
    async fn test_source_endpoint_joins_group_only_with_push_topics() {
        let config = test_config(&["telemetry"], &[]);
        let topics = TopicSet::from_config(&config).unwrap();

        let source = ClusterEndpoint::connect(Role::Source, &config, &topics).unwrap();
        assert!(source.is_consumer());

        // No pull topics, so the destination endpoint only produces.
        let destination = ClusterEndpoint::connect(Role::Destination, &config, &topics).unwrap();
        assert!(!destination.is_consumer());
    }

    #[test]
    fn test_next_offsets_commits_past_highest() {
        let record = |partition: i32, offset: i64| RelayRecord {
            source_topic: "telemetry".to_string(),
            partition,
            offset,
            topic: "telemetry".to_string(),
            key: None,
            payload: None,
            timestamp: None,
        };
        let batch = vec![record(0, 4), record(0, 7), record(1, 2)];

        let offsets = next_offsets(&batch);
        assert_eq!(offsets.len(), 2);
        assert_eq!(offsets[&("telemetry".to_string(), 0)], 8);
        assert_eq!(offsets[&("telemetry".to_string(), 1)], 3);
    }
}
