//! Schema manager: column whitelist + forward-only evolution
//!
//! The manager holds one immutable [`SchemaSnapshot`] behind an atomic
//! pointer swap. Readers always observe either the pre- or post-evolution
//! state, never an intermediate one.

/// Composable per-delta validation pipeline
pub mod validate;

use crate::core::error::SchemaError;
use crate::types::schema::{is_safe_identifier, TableSchema};
use crate::types::{DeltaOp, RowDelta};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Immutable view of the schema at one version
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    /// The declared schema
    pub schema: TableSchema,
    /// Monotonic version, bumped by every successful evolution
    pub version: u64,
    /// Column whitelist derived from the schema
    pub allowed_columns: HashSet<String>,
}

/// Column whitelist with forward-only evolution
#[derive(Debug)]
pub struct SchemaManager {
    snapshot: RwLock<Arc<SchemaSnapshot>>,
}

impl SchemaManager {
    /// Create a manager from an initial schema. Table and column names must
    /// be safe identifiers.
    pub fn new(schema: TableSchema) -> Result<Self, SchemaError> {
        Self::check_identifiers(&schema)?;
        let allowed_columns = schema.columns.iter().map(|c| c.name.clone()).collect();
        let snapshot = SchemaSnapshot { schema, version: 1, allowed_columns };
        Ok(Self { snapshot: RwLock::new(Arc::new(snapshot)) })
    }

    fn check_identifiers(schema: &TableSchema) -> Result<(), SchemaError> {
        if !is_safe_identifier(&schema.table) {
            return Err(SchemaError::UnsafeIdentifier(schema.table.clone()));
        }
        for col in &schema.columns {
            if !is_safe_identifier(&col.name) {
                return Err(SchemaError::UnsafeIdentifier(col.name.clone()));
            }
        }
        Ok(())
    }

    /// The current immutable snapshot
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Current schema version
    pub fn version(&self) -> u64 {
        self.snapshot.read().version
    }

    /// Validate a delta against the column whitelist. A DELETE with no
    /// columns is always valid.
    pub fn validate_delta(&self, delta: &RowDelta) -> Result<(), SchemaError> {
        if delta.op == DeltaOp::Delete && delta.columns.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot();
        for col in &delta.columns {
            if !snapshot.allowed_columns.contains(&col.column) {
                return Err(SchemaError::UnknownColumn {
                    table: delta.table.clone(),
                    column: col.column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Evolve the schema forward. Only column additions are allowed;
    /// removals and type changes are rejected and the table name must
    /// match. Returns the new version on success.
    pub fn evolve(&self, proposed: TableSchema) -> Result<u64, SchemaError> {
        Self::check_identifiers(&proposed)?;

        let mut guard = self.snapshot.write();
        let current = guard.as_ref();

        if proposed.table != current.schema.table {
            return Err(SchemaError::TableMismatch {
                expected: current.schema.table.clone(),
                actual: proposed.table,
            });
        }
        for existing in &current.schema.columns {
            match proposed.columns.iter().find(|c| c.name == existing.name) {
                None => return Err(SchemaError::ColumnRemoved(existing.name.clone())),
                Some(replacement) if replacement.column_type != existing.column_type => {
                    return Err(SchemaError::TypeChanged {
                        column: existing.name.clone(),
                        from: existing.column_type.name().to_string(),
                        to: replacement.column_type.name().to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        let version = current.version + 1;
        let allowed_columns = proposed.columns.iter().map(|c| c.name.clone()).collect();
        *guard = Arc::new(SchemaSnapshot { schema: proposed, version, allowed_columns });
        Ok(version)
    }
}
