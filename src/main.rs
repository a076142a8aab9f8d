use anyhow::Context;
use bottledwater::config::{Cli, Config};
use bottledwater::{construct_pipeline, infra, start_server};
use clap::Parser;

const CONFIG_HELP: &str = "\
-d/--postgres URI         PostgreSQL connection URI (required)
-s/--slot NAME            Logical replication slot name (default: bottledwater)
-b/--broker LIST          Kafka broker list (default: localhost:9092)
-r/--schema-registry URL  Schema registry URL, avro only (default: http://localhost:8081)
-f/--output-format FMT    avro | json (default: avro)
-u/--allow-unkeyed        Permit tables without a primary key; their updates/deletes are dropped
-p/--topic-prefix PFX     Prefix prepended to every derived topic name
-e/--on-error POLICY      log | exit (default: exit)
-x/--skip-snapshot        Skip the initial snapshot if the slot is new
-C/--kafka-config P=V     Repeatable Kafka producer property override
-T/--topic-config P=V     Repeatable per-topic property override
--config-help             Print this text and exit
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.config_help {
        print!("{CONFIG_HELP}");
        return Ok(());
    }

    let config = Config::try_from_cli(cli).context("invalid configuration")?;

    let _worker_guard = infra::configure_tracing(&config.slot_name);
    let _pidfile = infra::Pidfile::acquire(&config.slot_name)
        .context("failed to acquire process singleton lock")?;

    let pipeline = construct_pipeline(&config).await?;
    start_server(pipeline).await
}
