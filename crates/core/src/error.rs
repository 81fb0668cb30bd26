//! Error taxonomy shared by the registry, the dispatcher and the stitching
//! engine.
//!
//! [`ConversionError`] is the base kind recorded into a job's log. The
//! download, stitching and dispatch kinds convert into it with `?`.
//! [`InstallError`] stays separate: it only ever surfaces while the module
//! registry is being initialized.

use uuid::Uuid;

/// Boxed error used at plugin seams where the concrete type is unknown.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Any failure that stops a conversion job.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Stitching(#[from] StitchingError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Conversion failed: {0}")]
    Other(String),
}

impl ConversionError {
    /// Short machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Download(_) => "download",
            Self::Stitching(_) => "stitching",
            Self::Dispatch(_) => "dispatch",
            Self::Other(_) => "conversion",
        }
    }
}

/// A single HTTP attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Failed to read response body: {0}")]
    Body(String),
}

/// Content could not be fetched or was unusable.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Error downloading file from {url} after {attempts} attempt(s)")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: HttpError,
    },

    #[error("Invalid source URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Downloaded content from {url} is not a usable image")]
    InvalidContent {
        url: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid conversion properties: {0}")]
    InvalidProperties(String),
}

/// The compositor or one of the cubemap projectors failed.
#[derive(Debug, thiserror::Error)]
pub enum StitchingError {
    #[error("Exactly 6 cube faces are required, got {0}")]
    InvalidFaceCount(usize),

    #[error("No files to stitch")]
    EmptyGrid,

    #[error("All rows must have the same length: row {row} has {found} tiles, expected {expected}")]
    RaggedGrid {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error(
        "All tiles must have the same dimensions: tile ({row}, {column}) is {found_width}x{found_height}, expected {expected_width}x{expected_height}"
    )]
    TileSizeMismatch {
        row: usize,
        column: usize,
        expected_width: u32,
        expected_height: u32,
        found_width: u32,
        found_height: u32,
    },

    #[error("Grid {index} of the batch failed")]
    Batch {
        index: usize,
        #[source]
        source: Box<StitchingError>,
    },

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Renderer binary '{binary}' could not be started: {source}")]
    RendererUnavailable {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cube2sphere stitching failed for conversion {conversion_id} (exit code {exit_code:?}): {stderr}")]
    RendererFailed {
        conversion_id: Uuid,
        exit_code: Option<i32>,
        stderr: String,
        stdout: String,
    },

    #[error("Renderer finished but produced no output at {0}")]
    MissingOutput(String),

    #[error("Stitching task aborted: {0}")]
    Aborted(String),
}

/// The dispatcher could not choose a downloader for a job.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No capable downloader found for {url}")]
    NoCapableDownloader { url: String },

    #[error("Downloader '{identifier}' not found")]
    DownloaderNotFound { identifier: String },

    #[error("Error while testing URL with {identifier}: {source}")]
    ScoringFailed {
        identifier: String,
        #[source]
        source: BoxError,
    },
}

/// A downloader plugin could not be installed into the registry.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Unknown module '{identifier}'")]
    UnknownModule { identifier: String },

    #[error("Module '{identifier}' is already registered")]
    Duplicate { identifier: String },

    #[error("Invalid settings for module '{identifier}': {reason}")]
    InvalidSettings { identifier: String, reason: String },

    #[error("Module '{identifier}' panicked while loading")]
    Panicked { identifier: String },

    #[error("Failed to read module manifest {path}: {source}")]
    ManifestIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse module manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),
}

/// Render an error and its full `source()` chain as a multi-line report.
///
/// This is what ends up in a failed job's log.
pub fn error_report(err: &(dyn std::error::Error + 'static)) -> String {
    let mut report = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        report.push_str("\n  caused by: ");
        report.push_str(&cause.to_string());
        source = cause.source();
    }
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
