//! The error taxonomy of the pipeline and the single policy function every
//! transient-error call site routes through.

use thiserror::Error;
use tracing::{error, warn};

use crate::core::envelope::RelId;

/// Every failure the core can observe, tagged by the taxonomy bucket it
/// belongs to. Structurally-fatal variants bypass [`ErrorPolicy`] entirely
/// and propagate with `?`; the rest are routed through
/// [`ErrorPolicy::handle`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unexpected snapshot position: xid=0 arrived with a non-empty ring")]
    UnexpectedSnapshotPosition,

    #[error("commit for xid {commit_xid} does not match open transaction xid {head_xid}")]
    XidMismatch { head_xid: u32, commit_xid: u32 },

    #[error("no table metadata registered for relid {relid}")]
    UnknownRelId { relid: RelId },

    #[error("update/delete on unkeyed table (relid {relid}) with --allow-unkeyed not set")]
    UnkeyedTableNotAllowed { relid: RelId },

    #[error("encoding failed for relid {relid}: {source}")]
    Encode {
        relid: RelId,
        #[source]
        source: crate::core::encoder::EncodeError,
    },

    #[error("kafka delivery failed for topic {topic}: {message}")]
    DeliveryFailed { topic: String, message: String },

    #[error("frame reader reported a client error: {message}")]
    FrameReaderClient { message: String },

    #[error("failed to send replication keepalive: {0}")]
    KeepaliveFailed(String),

    #[error("failed to drop replication slot {slot}: {source}")]
    SlotDropFailed {
        slot: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("ring buffer invariant violation: {0}")]
    RingInvariant(#[from] crate::core::tracker::RingError),

    #[error("replication stream error: {0}")]
    Replication(#[from] crate::replication::ReplicationError),
}

/// Process-wide setting governing whether a transient failure is swallowed
/// (logged, treated as handled) or fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Any transient or driver error is fatal; the process exits non-zero
    /// after attempting cleanup. The default, since silent data loss should
    /// never be the out-of-the-box behavior.
    #[default]
    Exit,
    /// The error is logged and treated as handled. Explicit data-loss mode:
    /// the operator has chosen availability over completeness.
    Log,
}

/// What the caller should do after routing an error through the policy.
#[derive(Debug, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// The error was logged; the caller should proceed as if it had
    /// succeeded (counters still adjusted as appropriate by the caller).
    Continue,
    /// The error is fatal; the caller should propagate it to trigger
    /// shutdown.
    Terminate,
}

impl ErrorPolicy {
    /// Routes a transient error through the configured policy, logging it
    /// either way. This is the one function every transient-error call site
    /// should use, so policy never diverges per call site.
    pub fn handle(&self, err: &CoreError) -> PolicyOutcome {
        match self {
            ErrorPolicy::Exit => {
                error!(error = %err, "fatal error under on-error=exit policy");
                PolicyOutcome::Terminate
            }
            ErrorPolicy::Log => {
                warn!(error = %err, "error swallowed under on-error=log policy");
                PolicyOutcome::Continue
            }
        }
    }
}
