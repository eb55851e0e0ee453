//! Unified error taxonomy for the edge SDK orchestration core.
//!
//! Every error that crosses a component boundary carries an [`ErrorCode`] (a
//! machine-readable, stable string tag), a human-readable message, an
//! optional cause chain, and arbitrary key-value context. Use the builder
//! returned by [`OrchestratorError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration / deployment manifest parsing.
    Config,
    /// Asset resolution (missing from a deployment).
    Asset,
    /// Asset download (transient, drives retry).
    Download,
    /// Asset load / registration into an executor.
    Load,
    /// Interpreter / script execution.
    Script,
    /// Char/JSON stream parsing.
    Parse,
    /// CommandCenter / CoreSDK lifecycle (readiness, initialization).
    Lifecycle,
    /// Filesystem / transport plumbing.
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Asset => "asset",
            Self::Download => "download",
            Self::Load => "load",
            Self::Script => "script",
            Self::Parse => "parse",
            Self::Lifecycle => "lifecycle",
            Self::Io => "io",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Config --
    /// Deployment or cloud config failed to parse or validate.
    ConfigInvalid,

    // -- Asset --
    /// Asset referenced by the script is missing from the deployment.
    AssetNotFound,

    // -- Download --
    /// Asset download failed (transient, already fed into retry logic).
    DownloadFailed,

    // -- Load --
    /// Parsing/registration of a downloaded asset failed.
    LoadFailed,

    // -- Script --
    /// The interpreter raised an error while running a script.
    ScriptError,

    // -- Parse --
    /// Malformed JSON encountered on a CharStream.
    ParseError,

    // -- Lifecycle --
    /// Host call made before the active CommandCenter is ready.
    NotReady,
    /// An LLM generation was cancelled by the host.
    Cancelled,
    /// `initialize` was called while another call is already in progress.
    AlreadyInitializing,
    /// Retry budget exhausted; operation will not be attempted again until
    /// the next online transition.
    RetriesExhausted,

    // -- Io --
    /// Filesystem or transport failure not otherwise categorised.
    Io,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigInvalid => ErrorCategory::Config,
            Self::AssetNotFound => ErrorCategory::Asset,
            Self::DownloadFailed => ErrorCategory::Download,
            Self::LoadFailed => ErrorCategory::Load,
            Self::ScriptError => ErrorCategory::Script,
            Self::ParseError => ErrorCategory::Parse,
            Self::NotReady | Self::Cancelled | Self::AlreadyInitializing | Self::RetriesExhausted => {
                ErrorCategory::Lifecycle
            }
            Self::Io => ErrorCategory::Io,
        }
    }

    /// Stable numeric status code surfaced across the host boundary (spec
    /// §8 scenario 6: a script exception must return status code `1000`).
    /// Never renumbered once shipped, same discipline as [`Self::as_str`].
    pub fn host_status(&self) -> i32 {
        match self {
            Self::ConfigInvalid => 1,
            Self::AssetNotFound => 2,
            Self::DownloadFailed => 3,
            Self::LoadFailed => 4,
            Self::ParseError => 5,
            Self::NotReady => 6,
            Self::Cancelled => 7,
            Self::AlreadyInitializing => 8,
            Self::RetriesExhausted => 9,
            Self::Io => 10,
            Self::ScriptError => 1000,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"CONFIG_INVALID"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::AssetNotFound => "ASSET_NOT_FOUND",
            Self::DownloadFailed => "DOWNLOAD_FAILED",
            Self::LoadFailed => "LOAD_FAILED",
            Self::ScriptError => "SCRIPT_ERROR",
            Self::ParseError => "PARSE_ERROR",
            Self::NotReady => "NOT_READY",
            Self::Cancelled => "CANCELLED",
            Self::AlreadyInitializing => "ALREADY_INITIALIZING",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
            Self::Io => "IO",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OrchestratorError
// ---------------------------------------------------------------------------

/// Unified orchestration-core error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use edge_error::{OrchestratorError, ErrorCode};
///
/// let err = OrchestratorError::new(ErrorCode::DownloadFailed, "connection reset")
///     .with_context("asset", "m:1")
///     .with_context("attempt", 2);
/// ```
pub struct OrchestratorError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl OrchestratorError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Clone this error into a version with no source (errors don't
    /// implement `Clone` because `source` is a trait object). Used when a
    /// stored job error must be re-raised to more than one `Future::
    /// produce_value()` caller.
    pub fn clone_opaque(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            source: self.source.as_ref().map(|s| {
                Box::new(OpaqueSource(s.to_string())) as Box<dyn std::error::Error + Send + Sync>
            }),
            context: self.context.clone(),
        }
    }
}

/// A source error reduced to its `Display` string, used by
/// [`OrchestratorError::clone_opaque`].
#[derive(Debug)]
struct OpaqueSource(String);

impl fmt::Display for OpaqueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for OpaqueSource {}

impl fmt::Debug for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("OrchestratorError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an [`OrchestratorError`] (without the opaque
/// source), suitable for crossing the host boundary as a status record
/// (see spec §7: "top-level host calls never throw across the boundary").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&OrchestratorError> for OrchestratorErrorDto {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<OrchestratorErrorDto> for OrchestratorError {
    fn from(dto: OrchestratorErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}
