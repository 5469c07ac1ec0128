use thiserror::Error;

use crate::document::TextTarget;
use crate::zones::ZoneId;

/// Failures of the wire frame codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame encoding failed: {0}")]
    Encode(String),
    #[error("frame decoding failed: {0}")]
    Decode(String),
    #[error("snapshot decompression failed: {0}")]
    Decompress(String),
}

/// Failures at the merge-capability boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("malformed update: {0}")]
    Decode(String),
    #[error("update could not be integrated: {0}")]
    Apply(String),
    #[error("no text for {0}")]
    UnknownTarget(TextTarget),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Zone operations are validated up front; an error means nothing changed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZoneError {
    #[error("cannot fork a zone from an empty selection")]
    EmptyRange,
    #[error("selection {start}..{end} is reversed")]
    InvalidRange { start: usize, end: usize },
    #[error("selection end {end} is past the end of the text ({len} chars)")]
    OutOfBounds { end: usize, len: usize },
    #[error("zone {0} does not exist")]
    UnknownZone(ZoneId),
    #[error("zone metadata could not be encoded: {0}")]
    Metadata(String),
}
