use clap::Parser;

/// Streams PostgreSQL row changes from a logical-replication slot to Kafka.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// PostgreSQL connection URI.
    #[arg(short = 'd', long = "postgres")]
    pub postgres: String,

    /// Logical replication slot name.
    #[arg(short = 's', long = "slot", default_value = "bottledwater")]
    pub slot: String,

    /// Kafka broker list.
    #[arg(short = 'b', long = "broker", default_value = "localhost:9092")]
    pub broker: String,

    /// Schema registry URL. Only used with --output-format avro; an error
    /// if combined with --output-format json.
    #[arg(short = 'r', long = "schema-registry")]
    pub schema_registry: Option<String>,

    /// Output encoding: "avro" or "json".
    #[arg(short = 'f', long = "output-format", default_value = "avro")]
    pub output_format: String,

    /// Permit tables without a primary key; updates/deletes on such tables
    /// are dropped rather than rejected.
    #[arg(short = 'u', long = "allow-unkeyed")]
    pub allow_unkeyed: bool,

    /// Prefix prepended to every derived topic name.
    #[arg(short = 'p', long = "topic-prefix")]
    pub topic_prefix: Option<String>,

    /// Error policy: "log" or "exit".
    #[arg(short = 'e', long = "on-error", default_value = "exit")]
    pub on_error: String,

    /// Skip the initial snapshot if the replication slot is new.
    #[arg(short = 'x', long = "skip-snapshot")]
    pub skip_snapshot: bool,

    /// Repeatable PROP=VAL overrides passed straight to the Kafka producer.
    #[arg(short = 'C', long = "kafka-config")]
    pub kafka_config: Vec<String>,

    /// Repeatable PROP=VAL overrides passed to per-topic configuration.
    #[arg(short = 'T', long = "topic-config")]
    pub topic_config: Vec<String>,

    /// Print a detailed description of every configuration option and exit.
    #[arg(long = "config-help")]
    pub config_help: bool,
}
