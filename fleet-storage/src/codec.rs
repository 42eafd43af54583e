//! Serialization adapter for cached entities.
//!
//! # Payload Format
//!
//! ```text
//! [magic "FLC": 3 bytes][format version: 1 byte][schema fingerprint: 8 bytes BE][json body]
//! ```
//!
//! A payload written by a build with a different schema (a field was added,
//! removed or retyped) carries a different fingerprint and decodes as
//! [`CodecError::Corrupt`], the same as a truncated or garbled payload.
//! Field-level entries hold a bare JSON [`Value`] and are type-checked
//! against the field on decode.

use fleet_core::{CodecError, Entity, Field, Schema, Value};

const MAGIC: &[u8; 3] = b"FLC";
/// Current payload format version.
pub const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 12;

/// Encodes and decodes entities of one schema.
#[derive(Debug, Clone, Copy)]
pub struct EntityCodec {
    schema: &'static Schema,
    fingerprint: u64,
}

impl EntityCodec {
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            fingerprint: schema.fingerprint(),
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    fn header(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + 64);
        bytes.extend_from_slice(MAGIC);
        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(&self.fingerprint.to_be_bytes());
        bytes
    }

    /// Strip and verify the header, returning the body.
    fn body<'a>(&self, bytes: &'a [u8]) -> Result<&'a [u8], CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(corrupt(format!("payload is {} bytes", bytes.len())));
        }
        if &bytes[..3] != MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        if bytes[3] != FORMAT_VERSION {
            return Err(corrupt(format!("format version {}", bytes[3])));
        }
        let mut fp = [0u8; 8];
        fp.copy_from_slice(&bytes[4..HEADER_LEN]);
        if u64::from_be_bytes(fp) != self.fingerprint {
            return Err(corrupt(format!(
                "written for another {} schema",
                self.schema.kind()
            )));
        }
        Ok(&bytes[HEADER_LEN..])
    }

    fn check_kind(&self, entity: &Entity) -> Result<(), CodecError> {
        if entity.kind() != self.schema.kind() {
            return Err(CodecError::Encode {
                kind: entity.kind().to_string(),
                reason: format!("codec is for {}", self.schema.kind()),
            });
        }
        Ok(())
    }

    /// Encode one entity.
    pub fn encode(&self, entity: &Entity) -> Result<Vec<u8>, CodecError> {
        self.check_kind(entity)?;
        let mut bytes = self.header();
        serde_json::to_writer(&mut bytes, entity).map_err(|e| CodecError::Encode {
            kind: entity.kind().to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes)
    }

    /// Decode one entity. Any mismatch is reported as corruption.
    pub fn decode(&self, bytes: &[u8]) -> Result<Entity, CodecError> {
        let body = self.body(bytes)?;
        let entity: Entity =
            serde_json::from_slice(body).map_err(|e| corrupt(e.to_string()))?;
        self.verify(&entity)?;
        Ok(entity)
    }

    /// Encode the result list of a filtered fetch.
    pub fn encode_list(&self, entities: &[Entity]) -> Result<Vec<u8>, CodecError> {
        for entity in entities {
            self.check_kind(entity)?;
        }
        let mut bytes = self.header();
        serde_json::to_writer(&mut bytes, entities).map_err(|e| CodecError::Encode {
            kind: self.schema.kind().to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes)
    }

    pub fn decode_list(&self, bytes: &[u8]) -> Result<Vec<Entity>, CodecError> {
        let body = self.body(bytes)?;
        let entities: Vec<Entity> =
            serde_json::from_slice(body).map_err(|e| corrupt(e.to_string()))?;
        for entity in &entities {
            self.verify(entity)?;
        }
        Ok(entities)
    }

    /// Encode a single field value.
    pub fn encode_value(value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            kind: "Value".to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode a single field value and check it against the field's type.
    pub fn decode_value(field: &Field, bytes: &[u8]) -> Result<Value, CodecError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        field.check(&value).map_err(|e| corrupt(e.to_string()))?;
        Ok(value)
    }

    fn verify(&self, entity: &Entity) -> Result<(), CodecError> {
        if entity.kind() != self.schema.kind() {
            return Err(corrupt(format!(
                "payload holds {}, expected {}",
                entity.kind(),
                self.schema.kind()
            )));
        }
        self.schema
            .validate(entity)
            .map_err(|e| corrupt(e.to_string()))
    }
}

fn corrupt(reason: String) -> CodecError {
    CodecError::Corrupt { reason }
}
