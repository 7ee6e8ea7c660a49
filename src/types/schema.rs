//! Record-store table metadata
//!
//! Schemas are fetched from the store's metadata service and are immutable on
//! the client: the compiler only ever reads them. A [`MetadataProvider`] may
//! block on first access per table and must tolerate concurrent reads from
//! simultaneous compilations, so schemas are handed out as `Arc`s.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The scalar type of a store column, as reported by metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Integer,
    Float,
    Decimal,
    String,
    Date,
    Timestamp,
    Uuid,
    Binary,
}

/// A store column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Logical column name, unique within the table.
    pub name: String,
    pub column_type: ColumnType,
    /// Whether the store accepts native aggregate functions over this column.
    pub is_aggregatable: bool,
    /// Columns not valid for read (virtual write-only columns) are excluded
    /// from `*` expansion and cannot be selected.
    pub is_valid_for_read: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_aggregatable: true,
            is_valid_for_read: true,
        }
    }

    pub fn not_aggregatable(mut self) -> Self {
        self.is_aggregatable = false;
        self
    }

    pub fn not_readable(mut self) -> Self {
        self.is_valid_for_read = false;
        self
    }
}

/// A relationship between two tables, used to sanity-check join keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// A table schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Logical table (entity) name.
    pub name: String,
    /// The primary key column name. Every store table has exactly one.
    pub primary_key: String,
    pub columns: Vec<ColumnSchema>,
    pub relationships: Vec<Relationship>,
}

impl TableSchema {
    pub fn new(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        columns: Vec<ColumnSchema>,
    ) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            columns,
            relationships: Vec::new(),
        }
    }

    /// Returns the column with the given name, if it exists. Column names are
    /// matched case-insensitively, like everything else in the store.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Readable columns in schema name order, as `*` expands them.
    pub fn readable_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| c.is_valid_for_read)
    }
}

/// Source of table schemas. Implementations may block on first access per
/// table; results are shared, so concurrent compilations can reuse them.
pub trait MetadataProvider {
    fn table_schema(&self, table: &str) -> Result<Arc<TableSchema>>;
}

/// In-memory provider, used by tests and by callers that prefetch metadata.
#[derive(Default)]
pub struct StaticMetadata {
    tables: std::collections::HashMap<String, Arc<TableSchema>>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.tables
            .insert(schema.name.to_lowercase(), Arc::new(schema));
        self
    }
}

impl MetadataProvider for StaticMetadata {
    fn table_schema(&self, table: &str) -> Result<Arc<TableSchema>> {
        self.tables
            .get(&table.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_lookup_ignores_case() {
        let schema = TableSchema::new(
            "account",
            "accountid",
            vec![
                ColumnSchema::new("accountid", ColumnType::Uuid),
                ColumnSchema::new("Name", ColumnType::String),
            ],
        );
        assert!(schema.column("name").is_some());
        assert!(schema.column("NAME").is_some());
        assert!(schema.column("missing").is_none());
    }

    #[test]
    fn wildcard_expansion_skips_unreadable() {
        let schema = TableSchema::new(
            "account",
            "accountid",
            vec![
                ColumnSchema::new("accountid", ColumnType::Uuid),
                ColumnSchema::new("secret", ColumnType::String).not_readable(),
            ],
        );
        let names: Vec<_> = schema.readable_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["accountid"]);
    }
}
