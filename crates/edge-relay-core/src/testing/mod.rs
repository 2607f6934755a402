//! Scripted test doubles for the forwarder state machine.
//!
//! [`ScriptedSource`] and [`ScriptedSink`] replay queued outcomes for
//! poll/commit/deliver calls and record everything the forwarder does,
//! so the state machine can be driven through failure sequences without
//! a broker.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;

use crate::error::{RelayError, Result};
use crate::forward::{BatchSink, BatchSource, RelayRecord};
use crate::provision::TopicAdmin;

/// A transient broker-shaped error for scripting failures.
#[must_use]
pub fn transient_error() -> RelayError {
    RelayError::Kafka(KafkaError::MessageConsumption(
        RDKafkaErrorCode::BrokerTransportFailure,
    ))
}

/// Build a record as it would come out of a poll.
#[must_use]
pub fn source_record(
    topic: &str,
    partition: i32,
    offset: i64,
    key: Option<&[u8]>,
    payload: &[u8],
) -> RelayRecord {
    RelayRecord {
        source_topic: topic.to_string(),
        partition,
        offset,
        topic: topic.to_string(),
        key: key.map(<[u8]>::to_vec),
        payload: Some(payload.to_vec()),
        timestamp: None,
    }
}

/// Batch source replaying scripted poll and commit outcomes.
///
/// Once the poll script is exhausted, further polls block forever, which
/// models a quiet consumer and lets cancellation be exercised.
#[derive(Default)]
pub struct ScriptedSource {
    polls: Mutex<VecDeque<Result<Vec<RelayRecord>>>>,
    commit_failures: Mutex<VecDeque<RelayError>>,
    commits: Mutex<Vec<Vec<RelayRecord>>>,
    commit_calls: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful poll returning `records`.
    pub fn push_poll(&self, records: Vec<RelayRecord>) {
        self.polls.lock().unwrap().push_back(Ok(records));
    }

    /// Queue a failing poll.
    pub fn push_poll_error(&self) {
        self.polls.lock().unwrap().push_back(Err(transient_error()));
    }

    /// Make the next commit call fail.
    pub fn fail_next_commit(&self) {
        self.commit_failures
            .lock()
            .unwrap()
            .push_back(transient_error());
    }

    /// Batches passed to successful and failed commit calls, in order.
    #[must_use]
    pub fn commits(&self) -> Vec<Vec<RelayRecord>> {
        self.commits.lock().unwrap().clone()
    }

    #[must_use]
    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// How many times the forwarder released the deferred rebalance.
    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchSource for ScriptedSource {
    async fn poll_batch(&self, _max_records: usize) -> Result<Vec<RelayRecord>> {
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                // Script exhausted: behave like an idle topic.
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn commit(&self, batch: &[RelayRecord]) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        self.commits.lock().unwrap().push(batch.to_vec());
        match self.commit_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn release_rebalance(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Batch sink recording every delivery attempt.
#[derive(Default)]
pub struct ScriptedSink {
    deliveries: Mutex<Vec<Vec<RelayRecord>>>,
    failures: Mutex<VecDeque<RelayError>>,
}

impl ScriptedSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next delivery attempt fail.
    pub fn fail_next_delivery(&self) {
        self.failures.lock().unwrap().push_back(transient_error());
    }

    /// Every batch passed to [`BatchSink::deliver`], including failed
    /// attempts, in call order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Vec<RelayRecord>> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchSink for ScriptedSink {
    async fn deliver(&self, batch: &[RelayRecord]) -> Result<()> {
        self.deliveries.lock().unwrap().push(batch.to_vec());
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Topic admin over a fixed in-memory topic set.
#[derive(Default)]
pub struct ScriptedAdmin {
    existing: Mutex<HashSet<String>>,
    list_fails: AtomicBool,
    create_failures: Mutex<VecDeque<RelayError>>,
    created: Mutex<Vec<String>>,
}

impl ScriptedAdmin {
    /// An admin whose cluster already hosts `topics`.
    #[must_use]
    pub fn with_topics(topics: &[&str]) -> Self {
        Self {
            existing: Mutex::new(topics.iter().map(|t| (*t).to_string()).collect()),
            ..Self::default()
        }
    }

    /// Make every listing call fail.
    pub fn fail_listing(&self) {
        self.list_fails.store(true, Ordering::SeqCst);
    }

    /// Make the next creation call fail.
    pub fn fail_next_create(&self) {
        self.create_failures
            .lock()
            .unwrap()
            .push_back(transient_error());
    }

    /// Topic names passed to creation calls, including failed ones.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl TopicAdmin for ScriptedAdmin {
    fn name(&self) -> &str {
        "scripted"
    }

    fn list_topics(&self) -> Result<HashSet<String>> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(transient_error());
        }
        Ok(self.existing.lock().unwrap().clone())
    }

    async fn create_topic(&self, name: &str) -> Result<()> {
        self.created.lock().unwrap().push(name.to_string());
        match self.create_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => {
                self.existing.lock().unwrap().insert(name.to_string());
                Ok(())
            }
        }
    }
}
