//! `filepipe-core` — shared domain types for the ingestion pipeline.
//!
//! This crate is **pure data**: identifiers, file and line records, and the
//! domain error model. Storage, scheduling and IO live in `filepipe-infra`.

pub mod error;
pub mod file;
pub mod id;
pub mod line;

pub use error::DomainError;
pub use file::{BlobLocator, FileRecord, FileStatus, FileUpdate, NewFile};
pub use id::{FileId, JobId};
pub use line::{LineOutcome, LineRecord, LineState};
