//! Error types and the error-reporting sink.
//!
//! Interception never surfaces failures to the host page. Everything that
//! goes wrong is classified with an [`ErrorCode`] and handed to an
//! [`ErrorReporter`], which by default just logs it.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

use crate::api::ApiError;
use crate::io::CaptureError;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum JaydaiError {
    /// Provider payload had an unexpected shape
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Downstream client could not be built or a save call failed
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Capture file could not be read or written
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Configuration problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Payload file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type JaydaiResult<T> = Result<T, JaydaiError>;

/// Errors raised while decoding provider-specific payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A required field was absent
    #[error("Missing required field '{field}' in {structure}")]
    MissingField { field: String, structure: String },

    /// A field was present but had the wrong JSON type
    #[error("Field '{field}' in {structure} has unexpected type: expected {expected}")]
    UnexpectedType {
        field: String,
        structure: String,
        expected: &'static str,
    },

    /// A timestamp could not be interpreted
    #[error("Invalid timestamp '{value}'")]
    InvalidTimestamp { value: String },

    /// Body was not valid JSON
    #[error("Invalid JSON body: {reason}")]
    InvalidJson { reason: String },
}

impl ParseError {
    pub fn missing_field(field: impl Into<String>, structure: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            structure: structure.into(),
        }
    }

    pub fn unexpected_type(
        field: impl Into<String>,
        structure: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::UnexpectedType {
            field: field.into(),
            structure: structure.into(),
            expected,
        }
    }

    pub fn invalid_timestamp(value: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
        }
    }

    pub fn invalid_json(error: &serde_json::Error) -> Self {
        Self::InvalidJson {
            reason: error.to_string(),
        }
    }
}

/// JSON 本文を解析（失敗は `InvalidJson`）
pub fn parse_json_body(body: &[u8]) -> Result<serde_json::Value, ParseError> {
    serde_json::from_slice(body).map_err(|e| ParseError::invalid_json(&e))
}

/// Classification attached to every reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ErrorCode {
    /// Malformed or unexpected provider payload
    #[display("PARSING_ERROR")]
    ParsingError,
    /// A downstream save call failed
    #[display("API_ERROR")]
    ApiError,
    /// Injection or bootstrap failure
    #[display("EXTENSION_ERROR")]
    ExtensionError,
}

/// A classified error as handed to the reporter.
#[derive(Debug, Clone)]
pub struct AppError {
    pub message: String,
    pub code: ErrorCode,
    /// Rendered source error, if any
    pub source: Option<String>,
}

impl AppError {
    pub fn new(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            code,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::fmt::Display) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn parsing(message: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::new(message, ErrorCode::ParsingError).with_source(source)
    }

    pub fn api(message: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::new(message, ErrorCode::ApiError).with_source(source)
    }

    pub fn extension(message: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::new(message, ErrorCode::ExtensionError).with_source(source)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "[{}] {}: {}", self.code, self.message, source),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Fire-and-forget sink for classified errors.
pub trait ErrorReporter: Send + Sync {
    fn capture_error(&self, error: AppError);
}

/// Logs every captured error and keeps the most recent ones in memory.
pub struct TracingErrorReporter {
    recent: Mutex<VecDeque<AppError>>,
    capacity: usize,
}

impl TracingErrorReporter {
    pub const DEFAULT_CAPACITY: usize = 20;

    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    /// Most recent errors, oldest first.
    pub fn recent_errors(&self) -> Vec<AppError> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn count_by_code(&self, code: ErrorCode) -> usize {
        self.recent.lock().iter().filter(|e| e.code == code).count()
    }

    pub fn clear(&self) {
        self.recent.lock().clear();
    }
}

impl Default for TracingErrorReporter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl ErrorReporter for TracingErrorReporter {
    fn capture_error(&self, error: AppError) {
        match error.code {
            ErrorCode::ParsingError => tracing::warn!(code = %error.code, "⚠️ {}", error),
            ErrorCode::ApiError | ErrorCode::ExtensionError => {
                tracing::error!(code = %error.code, "❌ {}", error)
            }
        }

        let mut recent = self.recent.lock();
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(error);
    }
}
