//! Integration tests for the forwarding state machine.
//!
//! These drive a [`Forwarder`] against scripted source/sink doubles to
//! verify at-least-once delivery: batches survive send and commit
//! failures verbatim, offsets never advance before acknowledgement, and
//! cancellation wins over retries. Time is paused so backoff delays
//! resolve instantly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use edge_relay_core::config::AgentConfig;
use edge_relay_core::forward::Forwarder;
use edge_relay_core::testing::{source_record, ScriptedSink, ScriptedSource};
use edge_relay_core::topics::{Direction, TopicSet};

const AGENT_ID: &str = "relay-test";

fn test_config() -> AgentConfig {
    let yaml = r"
id: relay-test
source:
  topics:
    - 'telemetry:core-telemetry'
destination:
  topics:
    - 'core-cmd:edge-cmd'
";
    AgentConfig::from_str(yaml).unwrap()
}

struct Rig {
    source: Arc<ScriptedSource>,
    sink: Arc<ScriptedSink>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Rig {
    fn start(direction: Direction) -> Self {
        let config = test_config();
        let topics = TopicSet::from_config(&config).unwrap();
        let source = Arc::new(ScriptedSource::new());
        let sink = Arc::new(ScriptedSink::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let forwarder = Forwarder::new(
            direction,
            &topics,
            &config,
            Arc::clone(&source),
            Arc::clone(&sink),
            shutdown_rx,
        );
        let handle = tokio::spawn(forwarder.run());
        Self {
            source,
            sink,
            shutdown,
            handle,
        }
    }

    /// Sleep in small steps until `done` holds. With paused time the
    /// sleeps resolve instantly once every task is blocked, so backoff
    /// delays in the forwarder are skipped rather than waited out.
    async fn settle(&self, done: impl Fn() -> bool) {
        for _ in 0..10_000 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("forwarder never reached the expected state");
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_push_batch_remapped_and_committed_after_ack() {
    let rig = Rig::start(Direction::Push);
    rig.source.push_poll(vec![
        source_record("telemetry", 0, 7, None, b"r0"),
        source_record("telemetry", 0, 8, Some(b""), b"r1"),
        source_record("telemetry", 1, 3, Some(b"k1"), b"r2"),
    ]);

    rig.settle(|| rig.source.commit_calls() == 1).await;

    let deliveries = rig.sink.deliveries();
    assert_eq!(deliveries.len(), 1);
    let batch = &deliveries[0];
    assert_eq!(batch.len(), 3);
    for record in batch {
        assert_eq!(record.topic, "core-telemetry");
        assert_eq!(record.source_topic, "telemetry");
    }
    // Keyless and empty-keyed records are pinned to the agent id.
    assert_eq!(batch[0].key.as_deref(), Some(AGENT_ID.as_bytes()));
    assert_eq!(batch[1].key.as_deref(), Some(AGENT_ID.as_bytes()));
    assert_eq!(batch[2].key.as_deref(), Some(b"k1".as_slice()));

    // The commit covers exactly the delivered batch's source coordinates.
    let commits = rig.source.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0], *batch);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_pull_direction_uses_pull_route_table() {
    let rig = Rig::start(Direction::Pull);
    rig.source
        .push_poll(vec![source_record("core-cmd", 0, 0, Some(b"k"), b"cmd")]);

    rig.settle(|| rig.source.commit_calls() == 1).await;

    let deliveries = rig.sink.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0][0].topic, "edge-cmd");

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_resends_identical_batch() {
    let rig = Rig::start(Direction::Push);
    rig.sink.fail_next_delivery();
    rig.source.push_poll(vec![
        source_record("telemetry", 0, 10, Some(b"k"), b"a"),
        source_record("telemetry", 0, 11, Some(b"k"), b"b"),
    ]);

    rig.settle(|| rig.source.commit_calls() == 1).await;

    // The failed attempt and the retry carry the same records.
    let deliveries = rig.sink.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0], deliveries[1]);

    // Nothing was committed until the resend succeeded.
    assert_eq!(rig.source.commits().len(), 1);
    assert_eq!(rig.source.commits()[0], deliveries[1]);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_commit_failure_retries_commit_without_resending() {
    let rig = Rig::start(Direction::Push);
    rig.source.fail_next_commit();
    rig.source
        .push_poll(vec![source_record("telemetry", 2, 5, Some(b"k"), b"x")]);

    rig.settle(|| rig.source.commit_calls() == 2).await;

    // Delivered once only; a sent batch is never produced again.
    assert_eq!(rig.sink.deliveries().len(), 1);

    let commits = rig.source.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0], commits[1]);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_poll_error_backs_off_then_recovers() {
    let rig = Rig::start(Direction::Push);
    rig.source.push_poll_error();
    rig.source
        .push_poll(vec![source_record("telemetry", 0, 0, Some(b"k"), b"ok")]);

    let started = tokio::time::Instant::now();
    rig.settle(|| rig.source.commit_calls() == 1).await;

    // The first failure costs one second before the next poll.
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(rig.sink.deliveries().len(), 1);

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_rebalance_released_every_cycle() {
    let rig = Rig::start(Direction::Push);
    // An empty poll releases immediately; a full cycle releases at its end.
    rig.source.push_poll(Vec::new());
    rig.source
        .push_poll(vec![source_record("telemetry", 0, 1, Some(b"k"), b"r")]);

    rig.settle(|| rig.source.commit_calls() == 1).await;
    rig.settle(|| rig.source.releases() == 2).await;

    rig.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_idle_forwarder() {
    // No scripted polls: the source blocks forever, as an idle topic would.
    let rig = Rig::start(Direction::Push);
    tokio::task::yield_now().await;

    rig.shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), rig.handle)
        .await
        .expect("forwarder did not stop on cancellation")
        .unwrap();
}
