//! The Kafka driver boundary, built directly on `rdkafka`'s low-level
//! `BaseProducer`: delivery callbacks run synchronously inside
//! `BaseProducer::poll`, which is never `.await`ed, so they interleave with
//! ingest only at well-defined points — never concurrently with it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, ProducerContext};
use rdkafka::ClientContext;
use thiserror::Error;

use crate::core::envelope::MessageEnvelope;

/// One resolved delivery, ready for the ingest loop to fold back into the
/// transaction ring and checkpoint engine. Collected by the
/// [`KafkaProducerContext`] during `poll` and drained immediately after,
/// always from the single ingest thread.
pub enum DeliveryOutcome {
    Success {
        envelope: MessageEnvelope,
    },
    Failure {
        envelope: MessageEnvelope,
        topic: String,
        message: String,
    },
}

/// `rdkafka::producer::ProducerContext` implementation binding
/// `DeliveryOpaque = Box<MessageEnvelope>`, so the envelope rides through
/// the FFI boundary boxed rather than through a raw pointer / side table.
pub struct KafkaProducerContext {
    outcomes: Mutex<Vec<DeliveryOutcome>>,
}

impl KafkaProducerContext {
    fn new() -> Self {
        KafkaProducerContext {
            outcomes: Mutex::new(Vec::new()),
        }
    }

    /// Takes every outcome collected since the last drain. Called by the
    /// ingest loop immediately after `poll()`, so outcomes are always
    /// processed on the single event-loop thread.
    pub fn drain_outcomes(&self) -> Vec<DeliveryOutcome> {
        std::mem::take(&mut self.outcomes.lock().expect("producer context mutex poisoned"))
    }
}

impl ClientContext for KafkaProducerContext {}

impl ProducerContext for KafkaProducerContext {
    type DeliveryOpaque = Box<MessageEnvelope>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, delivery_opaque: Self::DeliveryOpaque) {
        let envelope = *delivery_opaque;
        let outcome = match delivery_result {
            Ok(_) => DeliveryOutcome::Success { envelope },
            Err((err, borrowed_msg)) => DeliveryOutcome::Failure {
                envelope,
                topic: borrowed_msg.topic().to_owned(),
                message: err.to_string(),
            },
        };
        self.outcomes
            .lock()
            .expect("producer context mutex poisoned")
            .push(outcome);
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("kafka producer error: {0}")]
    Driver(#[from] KafkaError),
}

/// Result of one `send` attempt. `QueueFull` hands the envelope back so the
/// caller can retry it unchanged after a Backpressure Loop iteration,
/// mirroring `rdkafka::producer::BaseProducer::send`'s own contract of
/// returning the untouched record alongside a queue-full error.
pub enum SendAttempt {
    Enqueued,
    QueueFull(Box<MessageEnvelope>),
}

/// The operations the Ingest Dispatcher needs from a Kafka producer,
/// abstracted so tests can exercise the dispatcher against an in-memory
/// fake instead of a real broker connection (see `dispatcher`'s test
/// module).
pub trait KafkaDriver: Send {
    fn send(
        &self,
        topic_name: &str,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        envelope: MessageEnvelope,
    ) -> Result<SendAttempt, SendError>;

    fn poll(&self, timeout: Duration);

    fn drain_outcomes(&self) -> Vec<DeliveryOutcome>;

    fn flush(&self, timeout: Duration) -> Result<(), KafkaError>;
}

/// Thin wrapper around `rdkafka::producer::BaseProducer` matching the
/// operations named in the EXTERNAL INTERFACES section: create-producer,
/// produce, poll, destroy with a bounded drain.
pub struct KafkaSink {
    producer: BaseProducer<KafkaProducerContext>,
}

impl KafkaSink {
    pub fn new(
        broker_list: &str,
        kafka_config: &HashMap<String, String>,
        topic_config: &HashMap<String, String>,
    ) -> Result<Self, KafkaError> {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", broker_list);
        config.set("queue.buffering.max.messages", "100000");
        // librdkafka accepts topic-level properties in the global config and
        // applies them as the default topic config, so `partitioner` set
        // here governs every topic this producer touches.
        config.set("partitioner", "consistent_random");
        for (key, value) in kafka_config {
            config.set(key, value);
        }
        for (key, value) in topic_config {
            config.set(key, value);
        }
        let producer = config.create_with_context(KafkaProducerContext::new())?;
        Ok(KafkaSink { producer })
    }
}

impl KafkaDriver for KafkaSink {
    /// Enqueues one message, partitioned by key (or left unassigned for the
    /// broker-side `consistent_random` partitioner to pick randomly when
    /// the key is absent).
    fn send(
        &self,
        topic_name: &str,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        envelope: MessageEnvelope,
    ) -> Result<SendAttempt, SendError> {
        let mut record: BaseRecord<'_, [u8], [u8], Box<MessageEnvelope>> =
            BaseRecord::with_opaque_to(topic_name, Box::new(envelope));
        if let Some(k) = key {
            record = record.key(k);
        }
        if let Some(v) = value {
            record = record.payload(v);
        }

        match self.producer.send(record) {
            Ok(()) => Ok(SendAttempt::Enqueued),
            Err((err, record)) => {
                if err.rdkafka_error_code() == Some(RDKafkaErrorCode::QueueFull) {
                    Ok(SendAttempt::QueueFull(record.delivery_opaque))
                } else {
                    Err(SendError::Driver(err))
                }
            }
        }
    }

    /// Polls for up to `timeout`, running any delivery callbacks that have
    /// completed. Always call [`Self::drain_outcomes`] right after.
    fn poll(&self, timeout: Duration) {
        self.producer.poll(timeout);
    }

    fn drain_outcomes(&self) -> Vec<DeliveryOutcome> {
        self.producer.context().drain_outcomes()
    }

    /// Destroys the producer with a bounded drain timeout, per the
    /// Lifecycle shutdown order.
    fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        self.producer.flush(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tracker::SlotRef;

    fn envelope() -> MessageEnvelope {
        MessageEnvelope {
            slot_ref: SlotRef {
                index: 0,
                generation: 1,
                xid: 7,
            },
            wal_pos: 0x100,
            relid: 42,
        }
    }

    #[test]
    fn context_collects_and_drains_outcomes() {
        let context = KafkaProducerContext::new();
        context
            .outcomes
            .lock()
            .unwrap()
            .push(DeliveryOutcome::Success { envelope: envelope() });
        let drained = context.drain_outcomes();
        assert_eq!(drained.len(), 1);
        assert!(context.drain_outcomes().is_empty());
    }
}
