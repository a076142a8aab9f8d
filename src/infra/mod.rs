//! Ambient process concerns: tracing setup and the pidfile singleton lock.

mod logging;
mod pidfile;

pub use logging::configure_tracing;
pub use pidfile::Pidfile;
