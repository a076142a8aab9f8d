//! The upstream frame-reader and replication-stream boundary. Only the
//! Rust-level interface the core is built against is specified here — the
//! exact bytes of the logical-replication wire protocol are an external
//! collaborator's concern (see the PURPOSE & SCOPE notes on collaborator
//! boundaries).

mod pg_source;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::envelope::RelId;

pub use pg_source::PgReplicationSource;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("replication connection error: {0}")]
    Connection(#[from] tokio_postgres::Error),
    #[error("malformed frame from upstream: {0}")]
    MalformedFrame(String),
    #[error("stream ended")]
    Eof,
}

/// The Avro schema name and namespace as supplied by the upstream decoder
/// for a table's row schema; the namespace drives topic-name derivation.
#[derive(Debug, Clone)]
pub struct AvroSchemaInfo {
    pub namespace: String,
    pub name: String,
}

/// One frame produced by the upstream frame reader. Maps directly onto the
/// eight `on_*` callbacks: `Insert`/`Update`/`Delete` fold together the
/// `_bin`/`_val` pairs of the distilled spec into just the wire bytes, since
/// the parsed `_val` forms exist upstream only to feed an optional debug
/// trace sink that is out of scope for this core (see PURPOSE & SCOPE).
#[derive(Debug, Clone)]
pub enum Frame {
    Begin {
        wal_pos: u64,
        xid: u32,
    },
    Commit {
        wal_pos: u64,
        xid: u32,
    },
    TableSchema {
        relid: RelId,
        key_schema_json: String,
        row_schema_json: String,
        avro_key_schema: AvroSchemaInfo,
        avro_row_schema: AvroSchemaInfo,
    },
    Insert {
        relid: RelId,
        key: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    },
    Update {
        relid: RelId,
        key: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    },
    Delete {
        relid: RelId,
        key: Option<Vec<u8>>,
    },
    Keepalive {
        wal_pos: u64,
    },
    Error {
        message: String,
    },
}

/// Mutable fields observed/updated by the core on the replication stream's
/// client-side state. `output_plugin` is always `"bottledwater"`.
#[derive(Debug, Clone)]
pub struct ReplicationStreamState {
    pub fsync_lsn: u64,
    pub slot_name: String,
    pub snapshot_name: Option<String>,
    pub start_lsn: u64,
    pub taking_snapshot: bool,
    pub status: i32,
    pub slot_created: bool,
    pub skip_snapshot: bool,
}

impl ReplicationStreamState {
    pub const OUTPUT_PLUGIN: &'static str = "bottledwater";

    pub fn new(slot_name: impl Into<String>, skip_snapshot: bool) -> Self {
        ReplicationStreamState {
            fsync_lsn: 0,
            slot_name: slot_name.into(),
            snapshot_name: None,
            start_lsn: 0,
            taking_snapshot: !skip_snapshot,
            status: 0,
            slot_created: false,
            skip_snapshot,
        }
    }
}

/// The frame-reader boundary: a source of frames, plus the operations the
/// Backpressure Loop and Checkpoint Engine need against the replication
/// connection itself.
#[async_trait]
pub trait ReplicationSource: Send {
    async fn next_frame(&mut self) -> Result<Frame, ReplicationError>;

    /// Sends a standby-status keepalive reporting the current `fsync_lsn`.
    /// A failure here is always fatal.
    async fn send_keepalive(&mut self, fsync_lsn: u64) -> Result<(), ReplicationError>;

    /// Drops the replication slot; called only when an in-progress initial
    /// snapshot fails, so it can be retried cleanly on the next run.
    async fn drop_slot(&mut self) -> Result<(), ReplicationError>;

    fn state(&self) -> &ReplicationStreamState;
    fn state_mut(&mut self) -> &mut ReplicationStreamState;
}
