//! Core data types shared by the compiler and the execution pipeline

pub mod schema;
pub mod value;

pub use schema::{
    ColumnSchema, ColumnType, MetadataProvider, Relationship, StaticMetadata, TableSchema,
};
pub use value::{Row, Value};
