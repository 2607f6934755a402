//! The forward/commit state machine.
//!
//! One [`Forwarder`] runs per active direction, looping through
//! POLLING -> SENDING -> COMMITTING. Offsets advance only after the
//! destination cluster has acknowledged the batch, so delivery is
//! at-least-once: a batch that failed to send or commit is retried
//! verbatim, never re-polled.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::topics::{Direction, TopicSet};

/// One record in flight between the clusters.
///
/// The source coordinates (`source_topic`, `partition`, `offset`) stay
/// untouched for the eventual commit; `topic` is rewritten to the
/// destination topic when the batch is remapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRecord {
    /// Topic the record was consumed from.
    pub source_topic: String,
    /// Source partition.
    pub partition: i32,
    /// Source offset.
    pub offset: i64,
    /// Topic the record will be produced to.
    pub topic: String,
    /// Partition key; empty keys are pinned to the agent id.
    pub key: Option<Vec<u8>>,
    /// Record value.
    pub payload: Option<Vec<u8>>,
    /// Creation timestamp in milliseconds, when the source supplied one.
    pub timestamp: Option<i64>,
}

/// Consumer side of a forwarding direction.
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Fetch up to `max_records` records, blocking until at least one is
    /// available. Partition reassignment is deferred from here until the
    /// matching [`BatchSource::release_rebalance`] call.
    async fn poll_batch(&self, max_records: usize) -> Result<Vec<RelayRecord>>;

    /// Commit exactly the offsets covered by `batch`.
    async fn commit(&self, batch: &[RelayRecord]) -> Result<()>;

    /// Allow the consumer group to reassign partitions again. Called
    /// unconditionally at the end of every cycle.
    fn release_rebalance(&self);
}

/// Producer side of a forwarding direction.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Produce the whole batch, waiting for every record's
    /// acknowledgement and returning the first failure.
    async fn deliver(&self, batch: &[RelayRecord]) -> Result<()>;
}

/// Drives one direction's poll -> produce -> commit loop.
pub struct Forwarder<S, D> {
    direction: Direction,
    agent_id: String,
    max_poll_records: usize,
    route: HashMap<String, String>,
    backoff: Backoff,
    source: Arc<S>,
    sink: Arc<D>,
    shutdown: watch::Receiver<bool>,
}

impl<S: BatchSource, D: BatchSink> Forwarder<S, D> {
    pub fn new(
        direction: Direction,
        topics: &TopicSet,
        config: &AgentConfig,
        source: Arc<S>,
        sink: Arc<D>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            direction,
            agent_id: config.id.clone(),
            max_poll_records: config.max_poll_records,
            route: topics.route_table(direction),
            backoff: Backoff::new(config.max_backoff_secs),
            source,
            sink,
            shutdown,
        }
    }

    /// Run the loop until cancellation.
    ///
    /// `sent` and `committed` persist across iterations: a new batch is
    /// polled only once the previous one is fully sent and committed.
    /// Once `sent` is true the batch is never produced again; only the
    /// commit is retried.
    pub async fn run(mut self) {
        info!(direction = %self.direction, "starting to forward records");
        let mut shutdown = self.shutdown.clone();
        let mut batch: Vec<RelayRecord> = Vec::new();
        let mut sent = false;
        let mut committed = false;

        loop {
            if (sent && committed) || batch.is_empty() {
                debug!(direction = %self.direction, "polling for records");
                let polled = tokio::select! {
                    _ = cancelled(&mut shutdown) => break,
                    polled = self.source.poll_batch(self.max_poll_records) => polled,
                };
                match polled {
                    Ok(records) if records.is_empty() => {
                        self.source.release_rebalance();
                        continue;
                    }
                    Ok(records) => {
                        debug!(
                            direction = %self.direction,
                            records = records.len(),
                            "consumed records"
                        );
                        batch = self.remap(records);
                        sent = false;
                        committed = false;
                    }
                    Err(e) => {
                        error!(direction = %self.direction, error = %e, "fetch error");
                        if !self.sleep_backoff(&mut shutdown).await {
                            break;
                        }
                        self.source.release_rebalance();
                        continue;
                    }
                }
            }

            if !batch.is_empty() && !sent {
                let delivered = tokio::select! {
                    _ = cancelled(&mut shutdown) => break,
                    delivered = self.sink.deliver(&batch) => delivered,
                };
                match delivered {
                    Ok(()) => {
                        sent = true;
                        debug!(
                            direction = %self.direction,
                            records = batch.len(),
                            "forwarded records"
                        );
                    }
                    Err(e) => {
                        error!(
                            direction = %self.direction,
                            records = batch.len(),
                            error = %e,
                            "unable to forward records"
                        );
                        if !self.sleep_backoff(&mut shutdown).await {
                            break;
                        }
                    }
                }
            }

            if sent && !committed {
                let result = tokio::select! {
                    _ = cancelled(&mut shutdown) => break,
                    result = self.source.commit(&batch) => result,
                };
                match result {
                    Ok(()) => {
                        self.backoff.reset();
                        committed = true;
                        debug!(direction = %self.direction, "offsets committed");
                    }
                    Err(e) => {
                        error!(direction = %self.direction, error = %e, "unable to commit offsets");
                        if !self.sleep_backoff(&mut shutdown).await {
                            break;
                        }
                    }
                }
            }

            // The batch has left this task's hands for this cycle, whether
            // or not the commit has succeeded yet.
            self.source.release_rebalance();
        }

        info!(direction = %self.direction, "received interrupt, stopping forwarder");
    }

    /// Rewrite each record's topic through the direction's remap table
    /// and pin records without a key to this agent's partition.
    fn remap(&self, mut records: Vec<RelayRecord>) -> Vec<RelayRecord> {
        for record in &mut records {
            if let Some(destination) = self.route.get(&record.source_topic) {
                record.topic.clone_from(destination);
            } else {
                warn!(
                    direction = %self.direction,
                    topic = %record.source_topic,
                    "consumed record from unmapped topic"
                );
            }
            if record.key.as_deref().map_or(true, |k| k.is_empty()) {
                record.key = Some(self.agent_id.clone().into_bytes());
            }
        }
        records
    }

    /// Sleep for the escalated backoff delay. Returns false when
    /// cancellation arrived during the sleep.
    async fn sleep_backoff(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let delay = self.backoff.penalize();
        warn!(
            direction = %self.direction,
            seconds = delay.as_secs(),
            "backing off"
        );
        tokio::select! {
            _ = cancelled(shutdown) => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

/// Resolves once the process-wide shutdown signal is raised.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means the process is going down.
    let _ = shutdown.wait_for(|stop| *stop).await;
}
