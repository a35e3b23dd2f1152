//! Error types shared across the scan pipeline

use thiserror::Error;

/// Errors surfaced to the caller of a scan
#[derive(Debug, Error)]
pub enum ScanError {
    /// The uploaded bytes could not be decoded into a raster
    #[error("Invalid image: {0}")]
    InvalidInput(#[from] image::ImageError),

    /// A blocking pipeline stage panicked or was cancelled
    #[error("Pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// An inspection pass (regions, words) failed
    #[error("Recognition failed: {0}")]
    Recognition(#[from] RecognitionError),
}

/// Reasons a product lookup did not produce a product.
///
/// None of these reach the caller: the scanner folds every variant into
/// "not found" and falls back to OCR.
#[derive(Debug, Error)]
pub enum LookupError {
    /// No response within the configured timeout
    #[error("Lookup timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Non-2xx response
    #[error("Lookup returned HTTP {status}")]
    Status { status: u16 },

    /// Database answered but has no product for this code
    #[error("No product for barcode {barcode}")]
    NotFound { barcode: String },

    /// Body was not the expected JSON shape
    #[error("Malformed lookup response: {0}")]
    Malformed(String),

    /// Connection-level failure
    #[error("Lookup transport error: {0}")]
    Transport(String),
}

/// Failure of a single recognition pass
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// Candidate raster could not be handed to the engine
    #[error("Failed to stage image for OCR: {0}")]
    Staging(String),

    /// Engine process could not be started
    #[error("Failed to run OCR engine `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Engine exited unsuccessfully
    #[error("OCR engine failed ({status}): {stderr}")]
    Engine { status: String, stderr: String },

    /// Engine output could not be parsed
    #[error("Unreadable OCR output: {0}")]
    Output(String),
}
