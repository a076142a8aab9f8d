use async_trait::async_trait;
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemHandle};
use tracing::{error, info};

use crate::core::dispatcher::ControlFlow;
use crate::Pipeline;

/// Hosts the single-threaded ingest loop inside the
/// `tokio-graceful-shutdown` subsystem tree, racing it against
/// `subsys.on_shutdown_requested()`.
pub struct IngestSubsystem {
    pipeline: Pipeline,
}

impl IngestSubsystem {
    pub fn new(pipeline: Pipeline) -> Self {
        IngestSubsystem { pipeline }
    }

    async fn drive(&mut self, subsys: &SubsystemHandle) -> Result<(), anyhow::Error> {
        loop {
            tokio::select! {
                result = self.pipeline.step() => {
                    match result? {
                        ControlFlow::Continue => continue,
                        ControlFlow::Shutdown => return Ok(()),
                    }
                }
                _ = subsys.on_shutdown_requested() => {
                    info!("shutdown requested; stopping ingest loop");
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl IntoSubsystem<anyhow::Error> for IngestSubsystem {
    async fn run(mut self, subsys: SubsystemHandle) -> Result<(), anyhow::Error> {
        let loop_result = self.drive(&subsys).await;
        if let Err(err) = self.pipeline.shutdown().await {
            error!(error = %err, "error during pipeline shutdown");
        }
        loop_result
    }
}
