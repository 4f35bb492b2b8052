//! Domain module - Core business entities and events
//!
//! Contains the entities shared by the import pipeline (staged records,
//! import runs, diff records, audit log entries) together with the event
//! types pushed over the run progress stream and the error taxonomy the
//! service facade exposes.

pub mod entities;
pub mod errors;
pub mod events;

pub use entities::{
    CanonicalRecord, DiffType, ImportDiffRecord, ImportLog, ImportRun, LogType, PartType,
    RawProduct, Resolution, RunProgress, RunStatus, RunSummary, SourceOrigin, StagedRecord,
    SupplierSource, Template,
};
pub use errors::ImportError;
pub use events::{LogBatch, LogEntryWire, ProgressSnapshot, RunEvent};
