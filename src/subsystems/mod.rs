//! The `tokio-graceful-shutdown` subsystem tree rooted at a single ingest
//! loop.

mod ingest;

pub use ingest::IngestSubsystem;
