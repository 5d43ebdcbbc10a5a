//! Input and output schemas
//!
//! `raw_event` is the contract with the ingestion adapter (one row of a
//! platform's event log); `registry` is the contract with the sink (the fixed
//! column set of every output stream).

mod raw_event;
pub mod registry;

pub use raw_event::*;
pub use registry::{Column, ColumnType, SchemaViolation, Stream};
