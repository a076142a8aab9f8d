//! The Ingest Dispatcher: turns frame-reader callbacks into tracker
//! updates, mapper lookups, encoder calls, and Kafka enqueues. Everything
//! here runs on the single event-loop task — see the concurrency notes on
//! [`crate::core::tracker::InFlightRing`].

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::core::encoder::Encoder;
use crate::core::envelope::{MessageEnvelope, RelId};
use crate::core::error::{CoreError, ErrorPolicy, PolicyOutcome};
use crate::core::mapper::TableMapper;
use crate::core::tracker::{InFlightRing, MAX_IN_FLIGHT_TRANSACTIONS};
use crate::kafka::{DeliveryOutcome, KafkaDriver, SendAttempt, SendError};
use crate::registry::SchemaRegistryClient;
use crate::replication::{AvroSchemaInfo, Frame, ReplicationSource};

/// One poll round's worth of Kafka driver attention.
const BACKPRESSURE_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// What the caller of [`IngestDispatcher::step`] should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    Shutdown,
}

/// `on_keepalive`'s response: whether the frame reader may advance its
/// client-side LSN, or must hold back because transactions are still
/// in-flight.
#[derive(Debug, PartialEq, Eq)]
pub enum KeepaliveAck {
    Ok,
    SyncPending,
}

pub struct IngestDispatcher<S: ReplicationSource, R: SchemaRegistryClient, K: KafkaDriver> {
    ring: InFlightRing,
    mapper: TableMapper<R>,
    encoder: Box<dyn Encoder>,
    kafka: K,
    source: S,
    error_policy: ErrorPolicy,
    allow_unkeyed: bool,
    /// Relids whose last `on_table_schema` update failed; the next ingest
    /// call against one of these is rejected as `unknown-relid` instead of
    /// operating on stale or absent metadata.
    failed_relids: HashSet<RelId>,
    /// Set once the synthetic `xid == 0` snapshot transaction has been
    /// observed. A second `xid == 0` begin frame afterward is always
    /// fatal, even once the ring has since drained empty between ordinary
    /// transactions.
    snapshot_seen: bool,
}

impl<S: ReplicationSource, R: SchemaRegistryClient, K: KafkaDriver> IngestDispatcher<S, R, K> {
    pub fn new(
        source: S,
        mapper: TableMapper<R>,
        encoder: Box<dyn Encoder>,
        kafka: K,
        error_policy: ErrorPolicy,
        allow_unkeyed: bool,
    ) -> Self {
        IngestDispatcher {
            ring: InFlightRing::new(MAX_IN_FLIGHT_TRANSACTIONS),
            mapper,
            encoder,
            kafka,
            source,
            error_policy,
            allow_unkeyed,
            failed_relids: HashSet::new(),
            snapshot_seen: false,
        }
    }

    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }

    pub fn fsync_lsn(&self) -> u64 {
        self.source.state().fsync_lsn
    }

    pub fn taking_snapshot(&self) -> bool {
        self.source.state().taking_snapshot
    }

    /// Drops the replication slot; Lifecycle calls this on shutdown only
    /// when an initial snapshot never completed, so it can be retried
    /// cleanly on the next run.
    pub async fn drop_slot(&mut self) -> Result<(), CoreError> {
        self.source.drop_slot().await.map_err(CoreError::from)
    }

    pub fn flush_kafka(&self, timeout: Duration) -> Result<(), rdkafka::error::KafkaError> {
        self.kafka.flush(timeout)
    }

    /// Reads and dispatches exactly one frame from the replication source.
    /// Fatal errors propagate; everything subject to the error policy is
    /// resolved internally before returning.
    pub async fn step(&mut self) -> Result<ControlFlow, CoreError> {
        let frame = self.source.next_frame().await?;
        match frame {
            Frame::Begin { wal_pos, xid } => self.on_begin(wal_pos, xid).await?,
            Frame::Commit { wal_pos, xid } => self.on_commit(wal_pos, xid)?,
            Frame::TableSchema {
                relid,
                key_schema_json,
                row_schema_json,
                avro_key_schema,
                avro_row_schema,
            } => {
                self.on_table_schema(
                    relid,
                    &key_schema_json,
                    &row_schema_json,
                    &avro_key_schema,
                    &avro_row_schema,
                )
                .await;
            }
            Frame::Insert { relid, key, new } => {
                let wal_pos = self.source.state().start_lsn;
                self.on_insert(wal_pos, relid, key, new).await?;
            }
            Frame::Update { relid, key, new } => {
                let wal_pos = self.source.state().start_lsn;
                self.on_update(wal_pos, relid, key, new).await?;
            }
            Frame::Delete { relid, key } => {
                let wal_pos = self.source.state().start_lsn;
                self.on_delete(wal_pos, relid, key).await?;
            }
            Frame::Keepalive { wal_pos: _ } => {
                let _ack = self.on_keepalive();
                let fsync_lsn = self.source.state().fsync_lsn;
                self.source
                    .send_keepalive(fsync_lsn)
                    .await
                    .map_err(|err| CoreError::KeepaliveFailed(err.to_string()))?;
            }
            Frame::Error { message } => {
                let err = CoreError::FrameReaderClient { message };
                if self.error_policy.handle(&err) == PolicyOutcome::Terminate {
                    return Err(err);
                }
            }
        }
        Ok(ControlFlow::Continue)
    }

    async fn on_begin(&mut self, _wal_pos: u64, xid: u32) -> Result<(), CoreError> {
        if xid == 0 {
            // The snapshot transaction is only valid once, as the very
            // first transaction observed: the ring must be empty and no
            // earlier snapshot may have already been seen. A stray
            // `xid == 0` arriving later (e.g. between two ordinary
            // transactions once the ring has drained) is always fatal.
            if self.snapshot_seen || !self.ring.is_empty() {
                return Err(CoreError::UnexpectedSnapshotPosition);
            }
            self.snapshot_seen = true;
        }
        while self.ring.is_full() {
            self.backpressure_iteration().await?;
        }
        self.ring.begin(xid)?;
        Ok(())
    }

    fn on_commit(&mut self, wal_pos: u64, xid: u32) -> Result<(), CoreError> {
        let head_xid = self
            .ring
            .head()
            .ok_or(CoreError::XidMismatch {
                head_xid: 0,
                commit_xid: xid,
            })?
            .xid;
        if head_xid != xid {
            return Err(CoreError::XidMismatch {
                head_xid,
                commit_xid: xid,
            });
        }
        self.ring.set_commit_lsn(wal_pos)?;
        self.checkpoint();
        Ok(())
    }

    async fn on_table_schema(
        &mut self,
        relid: RelId,
        key_schema_json: &str,
        row_schema_json: &str,
        avro_key_schema: &AvroSchemaInfo,
        avro_row_schema: &AvroSchemaInfo,
    ) {
        let result = self
            .mapper
            .update(
                relid,
                &avro_row_schema.namespace,
                &avro_row_schema.name,
                key_schema_json,
                row_schema_json,
            )
            .await;
        match result {
            Ok(_) => {
                self.failed_relids.remove(&relid);
            }
            Err(err) => {
                error!(
                    relid,
                    error = %err,
                    "table schema update failed; enqueue for this relid is rejected until the next successful schema callback"
                );
                self.failed_relids.insert(relid);
            }
        }
    }

    async fn on_insert(
        &mut self,
        wal_pos: u64,
        relid: RelId,
        key: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> Result<PolicyOutcome, CoreError> {
        self.send_kafka_msg(wal_pos, relid, key.as_deref(), new.as_deref())
            .await
    }

    async fn on_update(
        &mut self,
        wal_pos: u64,
        relid: RelId,
        key: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> Result<PolicyOutcome, CoreError> {
        if key.is_none() {
            if self.allow_unkeyed {
                debug!(relid, "update on unkeyed table dropped");
                return Ok(PolicyOutcome::Continue);
            }
            return Err(CoreError::UnkeyedTableNotAllowed { relid });
        }
        self.send_kafka_msg(wal_pos, relid, key.as_deref(), new.as_deref())
            .await
    }

    async fn on_delete(
        &mut self,
        wal_pos: u64,
        relid: RelId,
        key: Option<Vec<u8>>,
    ) -> Result<PolicyOutcome, CoreError> {
        match key {
            Some(k) => self.send_kafka_msg(wal_pos, relid, Some(&k), None).await,
            None => {
                // A delete cannot be represented without a key to
                // tombstone, regardless of --allow-unkeyed: always dropped
                // silently, never enqueued, never fatal.
                debug!(relid, "delete on unkeyed table dropped (no key to tombstone)");
                Ok(PolicyOutcome::Continue)
            }
        }
    }

    fn on_keepalive(&self) -> KeepaliveAck {
        if self.ring.is_empty() {
            KeepaliveAck::Ok
        } else {
            KeepaliveAck::SyncPending
        }
    }

    /// Increments counters, looks up table metadata, encodes, and
    /// enqueues to the Kafka driver, retrying through the Backpressure Loop
    /// on a full producer queue. Structurally-fatal failures (unknown
    /// relid) propagate directly; encode/delivery failures are routed
    /// through [`ErrorPolicy`].
    async fn send_kafka_msg(
        &mut self,
        wal_pos: u64,
        relid: RelId,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Result<PolicyOutcome, CoreError> {
        if self.failed_relids.contains(&relid) {
            return Err(CoreError::UnknownRelId { relid });
        }

        let slot_ref = self
            .ring
            .head_ref()
            .ok_or(CoreError::UnexpectedSnapshotPosition)?;
        self.ring.note_sent(slot_ref)?;

        let table = match self.mapper.lookup(relid).cloned() {
            Some(table) => table,
            None => {
                self.ring.undo_sent(slot_ref)?;
                return Err(CoreError::UnknownRelId { relid });
            }
        };

        let encoded = match self.encoder.encode(&table, key, value) {
            Ok(encoded) => encoded,
            Err(source) => {
                self.ring.undo_sent(slot_ref)?;
                let err = CoreError::Encode { relid, source };
                return match self.error_policy.handle(&err) {
                    PolicyOutcome::Continue => Ok(PolicyOutcome::Continue),
                    PolicyOutcome::Terminate => Err(err),
                };
            }
        };

        let mut envelope = MessageEnvelope {
            slot_ref,
            wal_pos,
            relid,
        };
        loop {
            match self.kafka.send(
                &table.topic_name,
                encoded.key.as_deref(),
                encoded.value.as_deref(),
                envelope,
            ) {
                Ok(SendAttempt::Enqueued) => break,
                Ok(SendAttempt::QueueFull(returned)) => {
                    envelope = *returned;
                    self.backpressure_iteration().await?;
                }
                Err(SendError::Driver(driver_err)) => {
                    self.ring.undo_sent(slot_ref)?;
                    let err = CoreError::DeliveryFailed {
                        topic: table.topic_name.clone(),
                        message: driver_err.to_string(),
                    };
                    return match self.error_policy.handle(&err) {
                        PolicyOutcome::Continue => Ok(PolicyOutcome::Continue),
                        PolicyOutcome::Terminate => Err(err),
                    };
                }
            }
        }
        Ok(PolicyOutcome::Continue)
    }

    /// Poll the Kafka driver, fold delivery outcomes back into the
    /// ring, then report the current fsync-LSN upstream. A keepalive
    /// failure is always fatal.
    pub async fn backpressure_iteration(&mut self) -> Result<(), CoreError> {
        self.kafka.poll(BACKPRESSURE_POLL_TIMEOUT);
        self.apply_delivery_outcomes()?;
        let fsync_lsn = self.source.state().fsync_lsn;
        self.source
            .send_keepalive(fsync_lsn)
            .await
            .map_err(|err| CoreError::KeepaliveFailed(err.to_string()))?;
        Ok(())
    }

    fn apply_delivery_outcomes(&mut self) -> Result<(), CoreError> {
        for outcome in self.kafka.drain_outcomes() {
            match outcome {
                DeliveryOutcome::Success { envelope } => {
                    self.ring.note_acked(envelope.slot_ref)?;
                }
                DeliveryOutcome::Failure {
                    envelope,
                    topic,
                    message,
                } => {
                    self.ring.note_acked(envelope.slot_ref)?;
                    let err = CoreError::DeliveryFailed { topic, message };
                    if self.error_policy.handle(&err) == PolicyOutcome::Terminate {
                        return Err(err);
                    }
                }
            }
        }
        self.checkpoint();
        Ok(())
    }

    /// Walk the ring from `tail` forward, advancing `fsync_lsn`
    /// monotonically and clearing `taking_snapshot` once the snapshot's
    /// synthetic transaction closes.
    fn checkpoint(&mut self) {
        let mut fsync_lsn = self.source.state().fsync_lsn;
        let mut clear_snapshot = false;
        self.ring.drain_closed(|record| {
            if record.commit_lsn > 0 && fsync_lsn > record.commit_lsn {
                warn!(
                    fsync_lsn,
                    commit_lsn = record.commit_lsn,
                    xid = record.xid,
                    "commit observed out of order relative to fsync_lsn; advancing monotonically"
                );
            }
            fsync_lsn = fsync_lsn.max(record.commit_lsn);
            if record.xid == 0 && record.commit_lsn > 0 {
                clear_snapshot = true;
            }
        });
        self.source.state_mut().fsync_lsn = fsync_lsn;
        if clear_snapshot {
            self.source.state_mut().taking_snapshot = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::core::encoder::JsonEncoder;
    use crate::core::error::ErrorPolicy;
    use crate::core::mapper::TableMapper;
    use crate::registry::NullSchemaRegistryClient;
    use crate::replication::{ReplicationError, ReplicationStreamState};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct FakeSource {
        frames: VecDeque<Frame>,
        state: ReplicationStreamState,
        keepalives_sent: u32,
    }

    impl FakeSource {
        fn new(frames: Vec<Frame>) -> Self {
            FakeSource {
                frames: frames.into(),
                state: ReplicationStreamState::new("test_slot", true),
                keepalives_sent: 0,
            }
        }
    }

    #[async_trait]
    impl ReplicationSource for FakeSource {
        async fn next_frame(&mut self) -> Result<Frame, ReplicationError> {
            self.frames.pop_front().ok_or(ReplicationError::Eof)
        }

        async fn send_keepalive(&mut self, fsync_lsn: u64) -> Result<(), ReplicationError> {
            self.state.fsync_lsn = fsync_lsn;
            self.keepalives_sent += 1;
            Ok(())
        }

        async fn drop_slot(&mut self) -> Result<(), ReplicationError> {
            Ok(())
        }

        fn state(&self) -> &ReplicationStreamState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut ReplicationStreamState {
            &mut self.state
        }
    }

    /// Delivers every send immediately (as if `poll` always completed it),
    /// so tests don't need to drive a real backpressure loop unless they
    /// specifically want to exercise queue-full retry.
    struct FakeKafka {
        immediate_outcomes: StdMutex<VecDeque<DeliveryOutcome>>,
        fail_next_n_sends: StdMutex<u32>,
    }

    impl FakeKafka {
        fn new() -> Self {
            FakeKafka {
                immediate_outcomes: StdMutex::new(VecDeque::new()),
                fail_next_n_sends: StdMutex::new(0),
            }
        }

        fn queue_full_for(n: u32) -> Self {
            let fake = FakeKafka::new();
            *fake.fail_next_n_sends.lock().unwrap() = n;
            fake
        }
    }

    impl KafkaDriver for FakeKafka {
        fn send(
            &self,
            _topic_name: &str,
            _key: Option<&[u8]>,
            _value: Option<&[u8]>,
            envelope: MessageEnvelope,
        ) -> Result<SendAttempt, SendError> {
            let mut remaining = self.fail_next_n_sends.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(SendAttempt::QueueFull(Box::new(envelope)));
            }
            self.immediate_outcomes
                .lock()
                .unwrap()
                .push_back(DeliveryOutcome::Success { envelope });
            Ok(SendAttempt::Enqueued)
        }

        fn poll(&self, _timeout: Duration) {}

        fn drain_outcomes(&self) -> Vec<DeliveryOutcome> {
            self.immediate_outcomes.lock().unwrap().drain(..).collect()
        }

        fn flush(&self, _timeout: Duration) -> Result<(), rdkafka::error::KafkaError> {
            Ok(())
        }
    }

    fn dispatcher_with_frames(
        frames: Vec<Frame>,
        kafka: FakeKafka,
        allow_unkeyed: bool,
    ) -> IngestDispatcher<FakeSource, NullSchemaRegistryClient, FakeKafka> {
        let mapper = TableMapper::new(
            NullSchemaRegistryClient,
            OutputFormat::Json,
            None,
            "bottledwater",
        );
        IngestDispatcher::new(
            FakeSource::new(frames),
            mapper,
            Box::new(JsonEncoder),
            kafka,
            ErrorPolicy::Exit,
            allow_unkeyed,
        )
    }

    fn schema_frame(relid: RelId) -> Frame {
        Frame::TableSchema {
            relid,
            key_schema_json: "\"k\"".to_owned(),
            row_schema_json: "\"v\"".to_owned(),
            avro_key_schema: AvroSchemaInfo {
                namespace: "bottledwater.public".to_owned(),
                name: "orders_key".to_owned(),
            },
            avro_row_schema: AvroSchemaInfo {
                namespace: "bottledwater.public".to_owned(),
                name: "orders".to_owned(),
            },
        }
    }

    #[tokio::test]
    async fn snapshot_then_one_commit_advances_fsync_lsn() {
        let frames = vec![
            Frame::Begin { wal_pos: 0, xid: 0 },
            schema_frame(1),
            Frame::Insert {
                relid: 1,
                key: Some(b"1".to_vec()),
                new: Some(b"{}".to_vec()),
            },
            Frame::Commit { wal_pos: 0x100, xid: 0 },
        ];
        let mut dispatcher = dispatcher_with_frames(frames, FakeKafka::new(), false);
        for _ in 0..4 {
            dispatcher.step().await.unwrap();
        }
        // The insert's delivery outcome was queued by FakeKafka but only a
        // driver poll (here, one Backpressure Loop iteration) drains it
        // back into the ring, exactly as a real `BaseProducer::poll` would.
        dispatcher.backpressure_iteration().await.unwrap();
        assert_eq!(dispatcher.fsync_lsn(), 0x100);
        assert_eq!(dispatcher.ring_len(), 0);
    }

    #[tokio::test]
    async fn two_interleaved_transactions_out_of_order_ack() {
        let frames = vec![
            Frame::Begin { wal_pos: 0, xid: 1 },
            schema_frame(5),
            Frame::Insert {
                relid: 5,
                key: Some(b"a".to_vec()),
                new: Some(b"{}".to_vec()),
            },
            Frame::Commit { wal_pos: 10, xid: 1 },
            Frame::Begin { wal_pos: 0, xid: 2 },
            Frame::Insert {
                relid: 5,
                key: Some(b"b".to_vec()),
                new: Some(b"{}".to_vec()),
            },
            Frame::Commit { wal_pos: 20, xid: 2 },
        ];
        // Both sends succeed immediately via FakeKafka, so by the time both
        // commits have been processed, both transactions have already
        // closed in commit order regardless of which ack logically landed
        // "first" at the driver level.
        let mut dispatcher = dispatcher_with_frames(frames, FakeKafka::new(), false);
        for _ in 0..7 {
            dispatcher.step().await.unwrap();
        }
        dispatcher.backpressure_iteration().await.unwrap();
        assert_eq!(dispatcher.fsync_lsn(), 20);
        assert_eq!(dispatcher.ring_len(), 0);
    }

    #[tokio::test]
    async fn queue_full_retries_through_backpressure_loop() {
        let frames = vec![
            Frame::Begin { wal_pos: 0, xid: 1 },
            schema_frame(1),
            Frame::Insert {
                relid: 1,
                key: Some(b"a".to_vec()),
                new: Some(b"{}".to_vec()),
            },
        ];
        let kafka = FakeKafka::queue_full_for(2);
        let mut dispatcher = dispatcher_with_frames(frames, kafka, false);
        for _ in 0..3 {
            dispatcher.step().await.unwrap();
        }
        // The send eventually succeeded (third attempt), producing one
        // pending event against the still-open transaction.
        assert_eq!(dispatcher.ring_len(), 1);
    }

    #[tokio::test]
    async fn unkeyed_delete_is_dropped_even_without_allow_unkeyed() {
        let frames = vec![
            Frame::Begin { wal_pos: 0, xid: 1 },
            schema_frame(1),
            Frame::Delete { relid: 1, key: None },
            Frame::Commit { wal_pos: 5, xid: 1 },
        ];
        // A delete with no key cannot be represented as a tombstone at
        // all, so it is dropped silently regardless of --allow-unkeyed --
        // unlike updates, which are gated by the flag.
        let mut dispatcher = dispatcher_with_frames(frames, FakeKafka::new(), false);
        for _ in 0..4 {
            dispatcher.step().await.unwrap();
        }
        assert_eq!(dispatcher.ring_len(), 0);
        assert_eq!(dispatcher.fsync_lsn(), 5);
    }

    #[tokio::test]
    async fn unkeyed_delete_with_allow_unkeyed_is_dropped() {
        let frames = vec![
            Frame::Begin { wal_pos: 0, xid: 1 },
            schema_frame(1),
            Frame::Delete { relid: 1, key: None },
            Frame::Commit { wal_pos: 5, xid: 1 },
        ];
        let mut dispatcher = dispatcher_with_frames(frames, FakeKafka::new(), true);
        for _ in 0..4 {
            dispatcher.step().await.unwrap();
        }
        assert_eq!(dispatcher.ring_len(), 0);
        assert_eq!(dispatcher.fsync_lsn(), 5);
    }

    #[tokio::test]
    async fn delete_with_key_enqueues_tombstone() {
        let frames = vec![
            Frame::Begin { wal_pos: 0, xid: 1 },
            schema_frame(1),
            Frame::Delete {
                relid: 1,
                key: Some(b"k".to_vec()),
            },
            Frame::Commit { wal_pos: 5, xid: 1 },
        ];
        let mut dispatcher = dispatcher_with_frames(frames, FakeKafka::new(), false);
        for _ in 0..4 {
            dispatcher.step().await.unwrap();
        }
        dispatcher.backpressure_iteration().await.unwrap();
        assert_eq!(dispatcher.ring_len(), 0);
        assert_eq!(dispatcher.fsync_lsn(), 5);
    }

    #[tokio::test]
    async fn unknown_relid_is_fatal() {
        let frames = vec![
            Frame::Begin { wal_pos: 0, xid: 1 },
            Frame::Insert {
                relid: 99,
                key: Some(b"a".to_vec()),
                new: Some(b"{}".to_vec()),
            },
        ];
        let mut dispatcher = dispatcher_with_frames(frames, FakeKafka::new(), false);
        dispatcher.step().await.unwrap();
        let err = dispatcher.step().await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownRelId { relid: 99 }));
    }

    #[tokio::test]
    async fn commit_with_mismatched_xid_is_fatal() {
        let frames = vec![
            Frame::Begin { wal_pos: 0, xid: 1 },
            Frame::Commit { wal_pos: 0, xid: 2 },
        ];
        let mut dispatcher = dispatcher_with_frames(frames, FakeKafka::new(), false);
        dispatcher.step().await.unwrap();
        let err = dispatcher.step().await.unwrap_err();
        assert!(matches!(err, CoreError::XidMismatch { head_xid: 1, commit_xid: 2 }));
    }

    #[tokio::test]
    async fn second_snapshot_begin_after_ring_drains_is_fatal() {
        let frames = vec![
            Frame::Begin { wal_pos: 0, xid: 0 },
            Frame::Commit { wal_pos: 0x100, xid: 0 },
            Frame::Begin { wal_pos: 0, xid: 1 },
            Frame::Commit { wal_pos: 0x200, xid: 1 },
            // The ring has now drained empty between two ordinary
            // transactions; a stray xid == 0 here must still be fatal.
            Frame::Begin { wal_pos: 0, xid: 0 },
        ];
        let mut dispatcher = dispatcher_with_frames(frames, FakeKafka::new(), false);
        for _ in 0..4 {
            dispatcher.step().await.unwrap();
        }
        assert_eq!(dispatcher.ring_len(), 0);
        let err = dispatcher.step().await.unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedSnapshotPosition));
    }

    #[tokio::test]
    async fn keepalive_with_empty_ring_reports_ok() {
        let dispatcher = dispatcher_with_frames(Vec::new(), FakeKafka::new(), false);
        assert_eq!(dispatcher.on_keepalive(), KeepaliveAck::Ok);
    }
}
