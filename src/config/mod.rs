//! CLI parsing and validation into the immutable [`Config`] the rest of the
//! pipeline is built from.

mod cli;

pub use cli::Cli;

use std::collections::HashMap;

use thiserror::Error;

use crate::core::error::ErrorPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Avro,
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--schema-registry may not be combined with --output-format json")]
    RegistryWithJson,
    #[error("invalid {flag} entry {entry:?}: expected PROP=VAL")]
    MalformedProperty { flag: &'static str, entry: String },
    #[error("invalid --output-format {0:?}: expected \"avro\" or \"json\"")]
    InvalidOutputFormat(String),
    #[error("invalid --on-error {0:?}: expected \"log\" or \"exit\"")]
    InvalidErrorPolicy(String),
}

/// The validated, immutable configuration the pipeline runs with for its
/// entire lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    pub postgres_uri: String,
    pub slot_name: String,
    pub broker_list: String,
    pub schema_registry_url: Option<String>,
    pub output_format: OutputFormat,
    pub allow_unkeyed: bool,
    pub topic_prefix: Option<String>,
    pub on_error: ErrorPolicy,
    pub skip_snapshot: bool,
    pub kafka_config: HashMap<String, String>,
    pub topic_config: HashMap<String, String>,
}

impl Config {
    pub fn try_from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let output_format = match cli.output_format.as_str() {
            "avro" => OutputFormat::Avro,
            "json" => OutputFormat::Json,
            other => return Err(ConfigError::InvalidOutputFormat(other.to_owned())),
        };

        const DEFAULT_SCHEMA_REGISTRY: &str = "http://localhost:8081";
        let schema_registry_url = match (output_format, cli.schema_registry) {
            (OutputFormat::Json, Some(_)) => return Err(ConfigError::RegistryWithJson),
            (OutputFormat::Json, None) => None,
            (OutputFormat::Avro, explicit) => {
                Some(explicit.unwrap_or_else(|| DEFAULT_SCHEMA_REGISTRY.to_owned()))
            }
        };

        let on_error = match cli.on_error.as_str() {
            "log" => ErrorPolicy::Log,
            "exit" => ErrorPolicy::Exit,
            other => return Err(ConfigError::InvalidErrorPolicy(other.to_owned())),
        };

        let kafka_config = parse_properties("-C/--kafka-config", &cli.kafka_config)?;
        let topic_config = parse_properties("-T/--topic-config", &cli.topic_config)?;

        Ok(Config {
            postgres_uri: cli.postgres,
            slot_name: cli.slot,
            broker_list: cli.broker,
            schema_registry_url,
            output_format,
            allow_unkeyed: cli.allow_unkeyed,
            topic_prefix: cli.topic_prefix,
            on_error,
            skip_snapshot: cli.skip_snapshot,
            kafka_config,
            topic_config,
        })
    }
}

fn parse_properties(
    flag: &'static str,
    entries: &[String],
) -> Result<HashMap<String, String>, ConfigError> {
    let mut map = HashMap::new();
    for entry in entries {
        let (key, value) =
            entry
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedProperty {
                    flag,
                    entry: entry.clone(),
                })?;
        map.insert(key.to_owned(), value.to_owned());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            postgres: "postgres://localhost/db".to_owned(),
            slot: "bottledwater".to_owned(),
            broker: "localhost:9092".to_owned(),
            schema_registry: None,
            output_format: "avro".to_owned(),
            allow_unkeyed: false,
            topic_prefix: None,
            on_error: "exit".to_owned(),
            skip_snapshot: false,
            kafka_config: Vec::new(),
            topic_config: Vec::new(),
            config_help: false,
        }
    }

    #[test]
    fn json_with_explicit_registry_is_rejected() {
        let mut cli = base_cli();
        cli.output_format = "json".to_owned();
        cli.schema_registry = Some("http://localhost:8081".to_owned());
        let err = Config::try_from_cli(cli).unwrap_err();
        assert!(matches!(err, ConfigError::RegistryWithJson));
    }

    #[test]
    fn json_without_explicit_registry_has_no_registry_url() {
        let mut cli = base_cli();
        cli.output_format = "json".to_owned();
        let config = Config::try_from_cli(cli).unwrap();
        assert_eq!(config.schema_registry_url, None);
    }

    #[test]
    fn avro_keeps_registry_url() {
        let config = Config::try_from_cli(base_cli()).unwrap();
        assert_eq!(
            config.schema_registry_url.as_deref(),
            Some("http://localhost:8081")
        );
    }

    #[test]
    fn kafka_config_properties_parse() {
        let mut cli = base_cli();
        cli.kafka_config = vec!["compression.type=snappy".to_owned()];
        let config = Config::try_from_cli(cli).unwrap();
        assert_eq!(
            config.kafka_config.get("compression.type").map(String::as_str),
            Some("snappy")
        );
    }

    #[test]
    fn malformed_kafka_config_property_is_rejected() {
        let mut cli = base_cli();
        cli.kafka_config = vec!["no-equals-sign".to_owned()];
        let err = Config::try_from_cli(cli).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedProperty { .. }));
    }
}
