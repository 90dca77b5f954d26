//! Declared packet schema types.

use serde::{Deserialize, Serialize};

use super::FieldType;
use crate::error::{PipelineError, Result};

/// Layout of a single field within a packet body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name as declared in the firmware struct.
    pub name: String,
    /// Declared C type.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Byte offset within the packet body.
    pub offset: usize,
    /// Declared size in bytes; must match the type's size.
    pub size: usize,
}

/// Declared layout of a packet body, registered per packet id.
///
/// Schemas come from an external annotation scanner and are immutable once
/// registered. Validation happens at registration time so the hot decode
/// path can trust offsets unconditionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketSchema {
    /// Name of the originating C struct.
    pub struct_name: String,
    /// Exact required length of the packet body in bytes.
    pub byte_size: usize,
    /// Whether the struct was declared without inter-field padding.
    pub packed: bool,
    /// Ordered field layout.
    pub fields: Vec<FieldDef>,
}

impl PacketSchema {
    /// Create a schema, validating it.
    pub fn new(
        struct_name: impl Into<String>,
        byte_size: usize,
        packed: bool,
        fields: Vec<FieldDef>,
    ) -> Result<Self> {
        let schema = Self {
            struct_name: struct_name.into(),
            byte_size,
            packed,
            fields,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Validate the schema for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.byte_size == 0 {
            return Err(PipelineError::schema(
                &self.struct_name,
                "byte_size must be positive",
            ));
        }
        if self.fields.is_empty() {
            return Err(PipelineError::schema(
                &self.struct_name,
                "at least one field is required",
            ));
        }
        for field in &self.fields {
            if field.size != field.ty.size() {
                return Err(PipelineError::schema(
                    &self.struct_name,
                    format!(
                        "field '{}' size mismatch: got {} want {}",
                        field.name,
                        field.size,
                        field.ty.size()
                    ),
                ));
            }
            let end = field.offset.checked_add(field.size).ok_or_else(|| {
                PipelineError::schema(
                    &self.struct_name,
                    format!("field '{}' offset overflows", field.name),
                )
            })?;
            if end > self.byte_size {
                return Err(PipelineError::schema(
                    &self.struct_name,
                    format!("field '{}' exceeds packet size", field.name),
                ));
            }
        }
        Ok(())
    }
}
