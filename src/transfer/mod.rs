//! Bulk transfer engine
//!
//! Streams whole databases out as structured JSON or single collections as
//! CSV, tracks each export in a [`SessionRegistry`], reports progress as
//! events, and ingests exported artifacts back one collection at a time.

pub mod broadcast;
pub mod coordinator;
pub mod copy;
pub mod import;
pub mod memory;
pub mod progress;
pub mod schema;
pub mod session;
pub mod sink;
pub mod streaming;
pub mod writers;

pub use broadcast::{EventKind, ProgressEvent, ScanSettings, WatchSettings};
pub use coordinator::{
    CsvExportOptions, ExportCoordinator, ExportOptions, ExportPlan, ExportStatus, ExportSummary,
};
pub use copy::{CopySummary, copy_database};
pub use import::{ImportOptions, ImportPipeline, ImportSummary, IngestState};
pub use memory::MemoryGuard;
pub use progress::ProgressTracker;
pub use schema::{FieldSet, SchemaSampler};
pub use session::{ProgressSnapshot, ProgressUpdate, SessionRegistry, new_session_id};
pub use sink::{ByteSink, ChannelSink, FileSink, GzipSink};
pub use streaming::StreamingQuery;
pub use writers::{CsvOptions, CsvWriter, DocumentWriter, FormatWriter, Termination};
