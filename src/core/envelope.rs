//! The message envelope threaded through the Kafka driver and handed back to
//! the delivery callback.

use crate::core::tracker::SlotRef;

/// Relation id as assigned by PostgreSQL's catalog.
pub type RelId = u32;

/// Carried through `rdkafka`'s `ProducerContext::DeliveryOpaque` from enqueue
/// to delivery callback. Bound to the transaction that produced it via a
/// [`SlotRef`] rather than a raw pointer, since the ring's backing storage is
/// a `Vec` whose addresses are not pinned.
#[derive(Debug, Clone, Copy)]
pub struct MessageEnvelope {
    pub slot_ref: SlotRef,
    pub wal_pos: u64,
    pub relid: RelId,
}
