//! Streaming ingestion: blob bytes → framed lines → line records → batched writes.

pub mod batch;
pub mod framer;
pub mod interpret;
pub mod processor;

pub use batch::{BatchTotals, LineBatcher};
pub use framer::{FramingError, LineFramer};
pub use interpret::interpret_line;
pub use processor::{FileProcessor, ProcessingError, ProcessingSummary, ProcessorSettings};
