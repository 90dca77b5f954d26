//! Field type tags for the dynamic packet decoder.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Supported field types for declared packet schemas.
///
/// The vocabulary is the C spelling used by the firmware headers the schema
/// table is scanned from. All multi-byte values are little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Bool,
}

impl FieldType {
    /// Returns the size in bytes of this field type.
    pub const fn size(&self) -> usize {
        match self {
            FieldType::Int8 | FieldType::UInt8 | FieldType::Bool => 1,
            FieldType::Int16 | FieldType::UInt16 => 2,
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float32 => 4,
            FieldType::Int64 | FieldType::UInt64 | FieldType::Float64 => 8,
        }
    }

    /// Canonical C spelling of this type.
    pub const fn c_name(&self) -> &'static str {
        match self {
            FieldType::Int8 => "int8_t",
            FieldType::UInt8 => "uint8_t",
            FieldType::Int16 => "int16_t",
            FieldType::UInt16 => "uint16_t",
            FieldType::Int32 => "int32_t",
            FieldType::UInt32 => "uint32_t",
            FieldType::Int64 => "int64_t",
            FieldType::UInt64 => "uint64_t",
            FieldType::Float32 => "float",
            FieldType::Float64 => "double",
            FieldType::Bool => "bool",
        }
    }

    /// Parse a C type spelling.
    ///
    /// Qualifiers (`const`, `volatile`), case, and interior whitespace are
    /// normalized away; `_Bool` is accepted alongside `bool`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize(raw);
        match normalized.as_str() {
            "int8_t" => Some(FieldType::Int8),
            "uint8_t" => Some(FieldType::UInt8),
            "int16_t" => Some(FieldType::Int16),
            "uint16_t" => Some(FieldType::UInt16),
            "int32_t" => Some(FieldType::Int32),
            "uint32_t" => Some(FieldType::UInt32),
            "int64_t" => Some(FieldType::Int64),
            "uint64_t" => Some(FieldType::UInt64),
            "float" => Some(FieldType::Float32),
            "double" => Some(FieldType::Float64),
            "bool" | "_bool" => Some(FieldType::Bool),
            _ => None,
        }
    }

    /// Decode a little-endian value of this type.
    ///
    /// Returns `None` when `data` is not exactly [`FieldType::size`] bytes.
    pub fn decode(&self, data: &[u8]) -> Option<Value> {
        if data.len() != self.size() {
            return None;
        }
        let value = match self {
            FieldType::Int8 => Value::Int8(data[0] as i8),
            FieldType::UInt8 => Value::UInt8(data[0]),
            FieldType::Int16 => Value::Int16(i16::from_le_bytes(data.try_into().ok()?)),
            FieldType::UInt16 => Value::UInt16(u16::from_le_bytes(data.try_into().ok()?)),
            FieldType::Int32 => Value::Int32(i32::from_le_bytes(data.try_into().ok()?)),
            FieldType::UInt32 => Value::UInt32(u32::from_le_bytes(data.try_into().ok()?)),
            FieldType::Int64 => Value::Int64(i64::from_le_bytes(data.try_into().ok()?)),
            FieldType::UInt64 => Value::UInt64(u64::from_le_bytes(data.try_into().ok()?)),
            FieldType::Float32 => Value::Float32(f32::from_le_bytes(data.try_into().ok()?)),
            FieldType::Float64 => Value::Float64(f64::from_le_bytes(data.try_into().ok()?)),
            FieldType::Bool => Value::Bool(data[0] != 0),
        };
        Some(value)
    }
}

fn normalize(raw: &str) -> String {
    raw.to_ascii_lowercase()
        .split_whitespace()
        .filter(|word| *word != "const" && *word != "volatile")
        .collect::<Vec<_>>()
        .join(" ")
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.c_name())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CTypeVisitor;

        impl Visitor<'_> for CTypeVisitor {
            type Value = FieldType;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a C type spelling such as \"uint32_t\" or \"float\"")
            }

            fn visit_str<E: de::Error>(self, raw: &str) -> Result<FieldType, E> {
                FieldType::parse(raw)
                    .ok_or_else(|| E::custom(format!("unsupported c type {raw:?}")))
            }
        }

        deserializer.deserialize_str(CTypeVisitor)
    }
}

/// Runtime value decoded from a packet field.
///
/// Serializes untagged: a JSON consumer sees plain numbers and booleans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
}

impl Value {
    /// Lossy conversion to `f64`, for consumers that only care about
    /// magnitude (plotting, thresholds). Booleans map to 0.0 / 1.0.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int8(v) => v as f64,
            Value::UInt8(v) => v as f64,
            Value::Int16(v) => v as f64,
            Value::UInt16(v) => v as f64,
            Value::Int32(v) => v as f64,
            Value::UInt32(v) => v as f64,
            Value::Int64(v) => v as f64,
            Value::UInt64(v) => v as f64,
            Value::Float32(v) => v as f64,
            Value::Float64(v) => v,
            Value::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}
