//! Error types for EMF conversion
//!
//! Fatal failures surface as [`ConvertError`]. Problems confined to a single
//! record never abort a conversion: they are reported by the reader as
//! [`RecordError`], by the mapper as [`MapperError`], and end up as
//! [`Warning`]s next to the rendered image.

use std::fmt;
use thiserror::Error;

/// Custom error type for conversion operations
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Invalid EMF at byte {offset}: {message}")]
    Format { offset: usize, message: String },

    #[error("PNG encoding error: {0}")]
    Encode(String),

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid data URI: expected prefix '{0}'")]
    InvalidUri(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ConvertError {
    pub(crate) fn format(offset: usize, message: impl Into<String>) -> Self {
        ConvertError::Format {
            offset,
            message: message.into(),
        }
    }
}

/// Result type alias for conversion operations
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Helper to convert serde_json errors
impl From<serde_json::Error> for ConvertError {
    fn from(err: serde_json::Error) -> Self {
        ConvertError::Config(err.to_string())
    }
}

/// Conversion from ConvertError to PyErr
#[cfg(feature = "python")]
impl From<ConvertError> for pyo3::PyErr {
    fn from(err: ConvertError) -> Self {
        match err {
            ConvertError::Io(e) => pyo3::PyErr::new::<pyo3::exceptions::PyIOError, _>(e.to_string()),
            other => pyo3::PyErr::new::<pyo3::exceptions::PyValueError, _>(other.to_string()),
        }
    }
}

/// Errors yielded by the record stream after the header was accepted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The buffer ended before an EOF record. Terminal.
    #[error("Record stream truncated at byte {offset}")]
    Truncated { offset: usize },

    /// A correctly framed record whose payload did not decode. The stream
    /// continues with the next record.
    #[error("Malformed record {record_type} at byte {offset}: {reason}")]
    Malformed {
        offset: usize,
        record_type: u32,
        reason: String,
    },

    /// The cancellation token fired between two records. Terminal.
    #[error("Record stream cancelled at byte {offset}")]
    Cancelled { offset: usize },
}

/// Errors raised while mapping logical coordinates to pixels
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperError {
    #[error("Degenerate transform: {0}")]
    DegenerateTransform(DegenerateAxis),
}

/// Which part of the mapping collapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegenerateAxis {
    WindowExtent,
    ViewportExtent,
    WorldTransform,
}

impl fmt::Display for DegenerateAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegenerateAxis::WindowExtent => f.write_str("zero window extent"),
            DegenerateAxis::ViewportExtent => f.write_str("zero viewport extent"),
            DegenerateAxis::WorldTransform => f.write_str("singular world transform"),
        }
    }
}

/// Non-fatal problem attached to one record of the stream
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    /// Byte offset of the record inside the EMF buffer
    pub offset: usize,
    /// EMR_* type code of the record
    pub record_type: u32,
    pub kind: WarningKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WarningKind {
    UnsupportedRecord,
    Truncated,
    Malformed(String),
    DegenerateTransform(DegenerateAxis),
    UnknownHandle(u32),
    HandleInUse(u32),
    InvalidHandle(u32),
    InvalidRestore(i32),
    UnsupportedBitmap(String),
    MissingGlyphs,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = crate::emf_records::get_record_type_name(self.record_type);
        write!(f, "{} at byte {}: ", name, self.offset)?;
        match &self.kind {
            WarningKind::UnsupportedRecord => write!(f, "unsupported record type {}", self.record_type),
            WarningKind::Truncated => f.write_str("stream truncated before EOF record"),
            WarningKind::Malformed(reason) => write!(f, "malformed record ({})", reason),
            WarningKind::DegenerateTransform(axis) => write!(f, "record skipped, {}", axis),
            WarningKind::UnknownHandle(h) => write!(f, "selected unknown handle {}", h),
            WarningKind::HandleInUse(h) => write!(f, "handle {} is selected and cannot be deleted", h),
            WarningKind::InvalidHandle(h) => write!(f, "invalid object handle {}", h),
            WarningKind::InvalidRestore(n) => write!(f, "no saved state for RestoreDC({})", n),
            WarningKind::UnsupportedBitmap(reason) => write!(f, "bitmap skipped ({})", reason),
            WarningKind::MissingGlyphs => f.write_str("no glyph outlines available for text"),
        }
    }
}
