//! Schema registry client boundary: given a subject name and an Avro schema,
//! returns the integer schema id the registry assigned it. Modeled as a
//! trait (per the design note to treat this as a capability the mapper
//! depends on) so JSON mode can supply a no-op implementation without the
//! mapper needing to know the difference.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("schema registry request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("schema registry returned malformed response for subject {subject}: {body}")]
    MalformedResponse { subject: String, body: String },
}

#[async_trait]
pub trait SchemaRegistryClient: Send + Sync {
    async fn register(&self, subject: &str, schema_json: &str) -> Result<i32, RegistryError>;
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    schema: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: i32,
}

/// Confluent-schema-registry-compatible HTTP client, used in Avro mode.
pub struct HttpSchemaRegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSchemaRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpSchemaRegistryClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SchemaRegistryClient for HttpSchemaRegistryClient {
    async fn register(&self, subject: &str, schema_json: &str) -> Result<i32, RegistryError> {
        let url = format!(
            "{}/subjects/{}/versions",
            self.base_url.trim_end_matches('/'),
            subject
        );
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/vnd.schemaregistry.v1+json")
            .json(&RegisterRequest {
                schema: schema_json,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: RegisterResponse = response.json().await.map_err(|_| {
            RegistryError::MalformedResponse {
                subject: subject.to_owned(),
                body: "response body was not valid JSON with an integer `id`".to_owned(),
            }
        })?;
        Ok(body.id)
    }
}

#[async_trait]
impl SchemaRegistryClient for Box<dyn SchemaRegistryClient> {
    async fn register(&self, subject: &str, schema_json: &str) -> Result<i32, RegistryError> {
        (**self).register(subject, schema_json).await
    }
}

/// Used in JSON output mode, where no schema registry is required.
pub struct NullSchemaRegistryClient;

#[async_trait]
impl SchemaRegistryClient for NullSchemaRegistryClient {
    async fn register(&self, _subject: &str, _schema_json: &str) -> Result<i32, RegistryError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_client_always_succeeds() {
        let client = NullSchemaRegistryClient;
        let id = client.register("anything-value", "{}").await.unwrap();
        assert_eq!(id, 0);
    }
}
