//! Table schema definitions
//!
//! Schemas whitelist the columns a table accepts and drive parquet
//! projection during compaction. Table and column names must satisfy the
//! safe-identifier rule `^[A-Za-z_][A-Za-z0-9_]{0,63}$`.

use serde::{Deserialize, Serialize};

/// Column value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// UTF-8 string
    String,
    /// 64-bit number
    Number,
    /// Boolean
    Boolean,
    /// Nested JSON
    Json,
    /// Always-null placeholder column
    Null,
}

impl ColumnType {
    /// Lowercase wire name, used in evolution diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::Json => "json",
            ColumnType::Null => "null",
        }
    }
}

/// One column declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name; must be a safe identifier
    pub name: String,
    /// Column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnDef {
    /// Convenience constructor
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self { name: name.into(), column_type }
    }
}

/// Declarative table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name; must be a safe identifier
    pub table: String,
    /// Whitelisted columns in declaration order
    pub columns: Vec<ColumnDef>,
    /// Optional primary key column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Whether deletes are soft (tombstone column) downstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_delete: Option<bool>,
    /// Optional column carrying an external system id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_column: Option<String>,
}

impl TableSchema {
    /// Position of a column in declaration order, if declared
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Safe identifier rule for table and column names:
/// `^[A-Za-z_][A-Za-z0-9_]{0,63}$`.
pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else { return false };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    if name.len() > 64 {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
