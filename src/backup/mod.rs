//! Logical backup and restore of the managed tables
//!
//! A backup is a single JSON object mapping table name to an array of row
//! objects. Binary columns are base64 encoded. Metadata describing a backup
//! is reported alongside the file, never inside it.

pub mod codec;
pub mod dependency;
pub mod export;
pub mod import;
pub mod tables;

pub use export::{count_rows, export, ExportOptions};
pub use import::{import, ImportOptions};
