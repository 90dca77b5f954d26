//! Core types for telemetry packet representation.
//!
//! The type system is the data half of the table-driven decoder:
//! - [`PacketSchema`] and [`FieldDef`] describe a packet body's layout as
//!   declared by the firmware (and scanned by an external tool).
//! - [`FieldType`] carries the size and decode rule for each field.
//! - [`PacketRecord`] is the decoded unit that flows through the hub to
//!   every sink, with zero-copy payload sharing via `Arc`.

mod field_type;
mod record;
mod schema;

pub use field_type::{FieldType, Value};
pub use record::{DecodedData, PacketRecord, RecordEnvelope};
pub use schema::{FieldDef, PacketSchema};
