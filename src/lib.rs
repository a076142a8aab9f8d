pub mod config;
pub mod core;
pub mod infra;
pub mod kafka;
pub mod registry;
pub mod replication;
pub mod subsystems;

use std::time::Duration;

use anyhow::Context;
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemBuilder, Toplevel};
use tracing::warn;

use crate::config::{Config, OutputFormat};
use crate::core::dispatcher::{ControlFlow, IngestDispatcher};
use crate::core::encoder::{AvroEncoder, Encoder, JsonEncoder};
use crate::core::error::CoreError;
use crate::core::mapper::TableMapper;
use crate::kafka::KafkaSink;
use crate::registry::{HttpSchemaRegistryClient, NullSchemaRegistryClient, SchemaRegistryClient};
use crate::replication::{PgReplicationSource, ReplicationStreamState};
use crate::subsystems::IngestSubsystem;

/// Every wired-up collaborator the event loop drives: replication source,
/// table mapper (and the registry client behind it), encoder, and Kafka
/// sink. Analogous to the teacher's `AppState`, but owned exclusively by
/// the single ingest task rather than shared across request handlers.
pub struct Pipeline {
    dispatcher: IngestDispatcher<PgReplicationSource, Box<dyn SchemaRegistryClient>, KafkaSink>,
}

impl Pipeline {
    pub async fn step(&mut self) -> Result<ControlFlow, CoreError> {
        self.dispatcher.step().await
    }

    /// Shutdown order: drop the replication slot if an initial snapshot
    /// never completed, then drain the Kafka producer with a bounded
    /// timeout.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        if self.dispatcher.taking_snapshot() {
            warn!("snapshot did not complete before shutdown; dropping replication slot so it can be retried");
            self.dispatcher
                .drop_slot()
                .await
                .context("failed to drop replication slot after incomplete snapshot")?;
        }
        self.dispatcher
            .flush_kafka(Duration::from_secs(2))
            .context("failed to drain kafka producer during shutdown")?;
        Ok(())
    }
}

/// Startup order: construct the Kafka producer and table mapper, then
/// connect to PostgreSQL and attach the replication slot. Pidfile
/// acquisition happens in `main`, before this is called, since it must
/// fail fastest of all.
pub async fn construct_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let registry: Box<dyn SchemaRegistryClient> = match (config.output_format, &config.schema_registry_url) {
        (OutputFormat::Avro, Some(url)) => Box::new(HttpSchemaRegistryClient::new(url.clone())),
        (OutputFormat::Avro, None) => {
            unreachable!("Config::try_from_cli always assigns a schema registry url in avro mode")
        }
        (OutputFormat::Json, _) => Box::new(NullSchemaRegistryClient),
    };
    let encoder: Box<dyn Encoder> = match config.output_format {
        OutputFormat::Avro => Box::new(AvroEncoder),
        OutputFormat::Json => Box::new(JsonEncoder),
    };
    let mapper = TableMapper::new(
        registry,
        config.output_format,
        config.topic_prefix.clone(),
        ReplicationStreamState::OUTPUT_PLUGIN,
    );
    let kafka = KafkaSink::new(&config.broker_list, &config.kafka_config, &config.topic_config)
        .context("failed to construct Kafka producer")?;
    let source = PgReplicationSource::connect(&config.postgres_uri, &config.slot_name, config.skip_snapshot)
        .await
        .context("failed to establish replication connection")?;

    let dispatcher = IngestDispatcher::new(
        source,
        mapper,
        encoder,
        kafka,
        config.on_error,
        config.allow_unkeyed,
    );
    Ok(Pipeline { dispatcher })
}

pub fn build_subsystems(pipeline: Pipeline) -> Toplevel {
    Toplevel::new(async move |s| {
        s.start(SubsystemBuilder::new(
            "Ingest",
            IngestSubsystem::new(pipeline).into_subsystem(),
        ));
    })
}

pub async fn start_server(pipeline: Pipeline) -> anyhow::Result<()> {
    build_subsystems(pipeline)
        .catch_signals()
        .handle_shutdown_requests(Duration::from_millis(2000))
        .await
        .map_err(Into::into)
}
