#![forbid(unsafe_code)]

pub mod bitmask;
pub mod plan;
pub mod schema;
pub mod sql;

pub use bitmask::{Bitmask, BitmaskError};
pub use plan::{PlanError, RebuildPath, RebuildPlan};
pub use schema::{ColumnDefinition, EngineVersion, IndexDefinition, SchemaObject, TableSchema};
