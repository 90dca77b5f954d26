//! Table-driven packet body decoding.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::protocol::registry::PacketRegistry;
use crate::types::DecodedData;

/// Decodes packet bodies against the registry.
///
/// Precedence per id: text decoding for the reserved text id, then the
/// registered schema, then raw passthrough. Only a registered schema can
/// fail; text and raw decoding always succeed.
#[derive(Debug, Clone)]
pub struct PacketParser {
    registry: Arc<PacketRegistry>,
}

impl PacketParser {
    pub fn new(registry: Arc<PacketRegistry>) -> Self {
        Self { registry }
    }

    /// Decode one packet body.
    ///
    /// A schema mismatch (wrong body length, undecodable field) is an
    /// error; the caller drops the record and continues.
    pub fn parse(&self, id: u8, body: &[u8]) -> Result<DecodedData> {
        if id == self.registry.text_id() {
            return Ok(DecodedData::Text(parse_text(body)));
        }

        let schema = match self.registry.lookup(id) {
            Some(schema) => schema,
            None => return Ok(DecodedData::Raw),
        };

        if body.len() != schema.byte_size {
            return Err(PipelineError::decode(
                id,
                format!(
                    "payload size {} does not match schema size {} for '{}'",
                    body.len(),
                    schema.byte_size,
                    schema.struct_name
                ),
            ));
        }

        let mut fields = BTreeMap::new();
        for field in &schema.fields {
            let bytes = &body[field.offset..field.offset + field.size];
            let value = field.ty.decode(bytes).ok_or_else(|| {
                PipelineError::decode(id, format!("field '{}' undecodable", field.name))
            })?;
            fields.insert(field.name.clone(), value);
        }
        Ok(DecodedData::Fields(fields))
    }
}

/// Interpret a text payload: UTF-8 up to the first NUL, trailing NULs
/// trimmed. Invalid UTF-8 is replaced rather than rejected so a garbled
/// log line still surfaces.
pub fn parse_text(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&b| b == 0x00)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end])
        .trim_end_matches('\0')
        .to_string()
}
