//! The desired-state specification: CSV records and the rows parsed from them.

pub mod csv_source;
pub mod export;
pub mod record;
pub mod row;

pub use csv_source::{
    read_path, read_records, write_path, write_records, SourceError, SourceRow, REQUIRED_COLUMNS,
};
pub use export::{export_records, ExportOptions};
pub use record::{SpecRecord, COLUMNS};
pub use row::{LabelSpec, PingParams, Row, SiteSpec, StructuralError, TestParams, TraceParams};
