//! Packet schema registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::types::PacketSchema;

/// Table mapping packet ids to declared schemas.
///
/// The registry is populated at startup from the external annotation
/// scanner's output and read concurrently by the decode path. Lookups hold
/// a reader lock for the duration of one probe; mutation takes the writer
/// lock and is expected only during startup or reconfiguration.
///
/// One id is reserved as the *text packet id*, fixed at construction. Text
/// decoding wins over any schema registered on that id: the registration is
/// accepted (so a scanner may emit it without special-casing), but the
/// parser never consults it.
#[derive(Debug)]
pub struct PacketRegistry {
    text_id: u8,
    schemas: RwLock<HashMap<u8, Arc<PacketSchema>>>,
}

impl PacketRegistry {
    /// Create an empty registry with the given text packet id.
    pub fn new(text_id: u8) -> Self {
        Self {
            text_id,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// The reserved text packet id.
    pub fn text_id(&self) -> u8 {
        self.text_id
    }

    /// Register a schema for a packet id.
    ///
    /// The schema is validated; registering an id twice replaces the prior
    /// entry.
    pub fn register(&self, id: u8, schema: PacketSchema) -> Result<()> {
        schema.validate()?;
        let mut schemas = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        schemas.insert(id, Arc::new(schema));
        Ok(())
    }

    /// Look up the schema for a packet id.
    pub fn lookup(&self, id: u8) -> Option<Arc<PacketSchema>> {
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        schemas.get(&id).cloned()
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registered schema (reconfiguration support).
    pub fn clear(&self) {
        let mut schemas = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        schemas.clear();
    }
}
