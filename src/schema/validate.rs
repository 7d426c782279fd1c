//! Composable per-delta validation
//!
//! An ordered list of pure checks run against every pushed delta.
//! Composition short-circuits on the first failure, so cheap structural
//! checks go before schema lookups.

use crate::core::error::Error;
use crate::schema::SchemaManager;
use crate::types::schema::is_safe_identifier;
use crate::types::RowDelta;
use std::sync::Arc;

/// A single validation check
pub type Validator = Box<dyn Fn(&RowDelta) -> Result<(), Error> + Send + Sync>;

/// Ordered, short-circuiting validator chain
#[derive(Default)]
pub struct ValidationPipeline {
    validators: Vec<Validator>,
}

impl ValidationPipeline {
    /// An empty pipeline; accepts everything
    pub fn new() -> Self {
        Self { validators: Vec::new() }
    }

    /// Append a validator to the end of the chain
    pub fn with(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Append the identifier-safety check for table names
    pub fn with_identifier_safety(self) -> Self {
        self.with(Box::new(|delta: &RowDelta| {
            if is_safe_identifier(&delta.table) {
                Ok(())
            } else {
                Err(Error::validation(format!("unsafe table identifier '{}'", delta.table)))
            }
        }))
    }

    /// Append the schema whitelist check
    pub fn with_schema_manager(self, manager: Arc<SchemaManager>) -> Self {
        self.with(Box::new(move |delta: &RowDelta| {
            manager.validate_delta(delta).map_err(Error::from)
        }))
    }

    /// Run every validator in order; the first failure wins
    pub fn validate(&self, delta: &RowDelta) -> Result<(), Error> {
        for validator in &self.validators {
            validator(delta)?;
        }
        Ok(())
    }

    /// Number of configured validators
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// True when no validators are configured
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}
