//! The two wire encodings a message can be produced in: Avro (Confluent
//! wire format, with a schema-registry-assigned id) and JSON (raw passthrough).

use thiserror::Error;

use crate::core::mapper::TableMetadata;

/// Confluent wire format magic byte preceding every Avro-framed key/value.
const AVRO_MAGIC_BYTE: u8 = 0x00;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("avro output requires a schema id for relid, but none was registered")]
    MissingSchemaId,
}

/// Key and value bytes ready to hand to the Kafka driver. `None` means a
/// null field: a null key for an unkeyed insert/update (left to the
/// partitioner to distribute randomly), or a null value for a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

pub trait Encoder: Send + Sync {
    fn encode(
        &self,
        table: &TableMetadata,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Result<EncodedMessage, EncodeError>;
}

/// Prepends the 5-byte Confluent header (`0x00` + big-endian schema id) to
/// whichever of key/value is present, leaving `None` fields untouched (a
/// null key or tombstone value carries no schema and needs no framing).
pub struct AvroEncoder;

impl AvroEncoder {
    fn frame(schema_id: i32, bytes: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(5 + bytes.len());
        framed.push(AVRO_MAGIC_BYTE);
        framed.extend_from_slice(&schema_id.to_be_bytes());
        framed.extend_from_slice(bytes);
        framed
    }

    /// Strips the 5-byte header back off, returning the schema id and the
    /// raw Avro-binary payload. Exposed for the round-trip property tests;
    /// not used on the hot path (the core never needs to decode its own
    /// output).
    pub fn unframe(framed: &[u8]) -> Option<(i32, &[u8])> {
        if framed.len() < 5 || framed[0] != AVRO_MAGIC_BYTE {
            return None;
        }
        let schema_id = i32::from_be_bytes(framed[1..5].try_into().ok()?);
        Some((schema_id, &framed[5..]))
    }
}

impl Encoder for AvroEncoder {
    fn encode(
        &self,
        table: &TableMetadata,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Result<EncodedMessage, EncodeError> {
        let key = key
            .map(|bytes| {
                let schema_id = table.key_schema_id.ok_or(EncodeError::MissingSchemaId)?;
                Ok::<_, EncodeError>(Self::frame(schema_id, bytes))
            })
            .transpose()?;
        let value = value
            .map(|bytes| {
                let schema_id = table.row_schema_id.ok_or(EncodeError::MissingSchemaId)?;
                Ok::<_, EncodeError>(Self::frame(schema_id, bytes))
            })
            .transpose()?;
        Ok(EncodedMessage { key, value })
    }
}

/// Emits the raw JSON bytes supplied by the frame reader, unmodified.
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(
        &self,
        _table: &TableMetadata,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Result<EncodedMessage, EncodeError> {
        Ok(EncodedMessage {
            key: key.map(|bytes| bytes.to_vec()),
            value: value.map(|bytes| bytes.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_schemas() -> TableMetadata {
        TableMetadata {
            topic_name: "orders".to_owned(),
            key_schema_id: Some(7),
            row_schema_id: Some(9),
        }
    }

    #[test]
    fn avro_framing_round_trips() {
        let table = table_with_schemas();
        let encoded = AvroEncoder
            .encode(&table, Some(b"k1"), Some(b"v1"))
            .unwrap();
        let (schema_id, payload) = AvroEncoder::unframe(&encoded.key.unwrap()).unwrap();
        assert_eq!(schema_id, 7);
        assert_eq!(payload, b"k1");

        let value = encoded.value.unwrap();
        let (schema_id, payload) = AvroEncoder::unframe(&value).unwrap();
        assert_eq!(schema_id, 9);
        assert_eq!(payload, b"v1");
        assert_eq!(value[0], 0x00);
    }

    #[test]
    fn avro_tombstone_preserves_null_value() {
        let table = table_with_schemas();
        let encoded = AvroEncoder.encode(&table, Some(b"k1"), None).unwrap();
        assert!(encoded.value.is_none());
        assert!(encoded.key.is_some());
    }

    #[test]
    fn avro_encode_fails_without_registered_schema() {
        let table = TableMetadata {
            topic_name: "orders".to_owned(),
            key_schema_id: None,
            row_schema_id: None,
        };
        let err = AvroEncoder.encode(&table, Some(b"k1"), None).unwrap_err();
        assert!(matches!(err, EncodeError::MissingSchemaId));
    }

    #[test]
    fn json_encoder_passes_bytes_through_unmodified() {
        let table = TableMetadata {
            topic_name: "orders".to_owned(),
            key_schema_id: None,
            row_schema_id: None,
        };
        let encoded = JsonEncoder
            .encode(&table, Some(b"\"k1\""), Some(b"{\"a\":1}"))
            .unwrap();
        assert_eq!(encoded.key.unwrap(), b"\"k1\"");
        assert_eq!(encoded.value.unwrap(), b"{\"a\":1}");
    }
}
