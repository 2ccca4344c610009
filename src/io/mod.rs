//! I/O utilities for capture files.
//!
//! Intercepted exchanges can be written to NDJSON and replayed later
//! through a fresh interceptor.

pub mod capture;
pub mod ndjson;

// Re-export commonly used types and functions
pub use capture::{
    load_capture, replay_capture, CaptureConfig, CaptureRecorder, CapturedExchange, ReplayFetch,
    ReplaySummary,
};
pub use ndjson::{append_ndjson_line, parse_ndjson_file, CaptureError};
