//! Error types for sara-core.

use thiserror::Error;

use crate::frame::Beacon;

/// Problems with a header field or the options string that feeds it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagError {
    /// The field does not exist for this frame type.
    #[error("{frame}: unknown field \"{field}\"")]
    UnknownField { frame: &'static str, field: String },

    /// The field exists but the token (or wire code) is not in its table.
    #[error("{frame}: illegal value \"{value}\" for field \"{field}\"")]
    IllegalValue {
        frame: &'static str,
        field: String,
        value: String,
    },

    /// The field may only be set implicitly, or only after another field.
    #[error("{frame}: field \"{field}\" cannot be set here")]
    NotApplicable { frame: &'static str, field: String },

    /// Options segment without `=`, empty key, or similar.
    #[error("malformed option \"{0}\"")]
    Malformed(String),
}

/// Main error type for frame construction, decoding and registry updates.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid flag: {0}")]
    InvalidFlag(#[from] FlagError),

    #[error("{kind} frame too short: need {need} bytes, got {got}")]
    FrameTooShort {
        kind: &'static str,
        need: usize,
        got: usize,
    },

    #[error("unknown frame type {0}")]
    UnknownFrameType(u32),

    #[error("unsupported checksum type \"{0}\"")]
    UnsupportedChecksum(String),

    #[error("checksum length mismatch: expected {expected} bytes, got {got}")]
    ChecksumLengthMismatch { expected: usize, got: usize },

    #[error("checksums cannot be computed on a stream transfer")]
    ChecksumOnStream,

    /// Unrecognized free-space width. On decode `partial` carries the beacon
    /// with every field that could still be recovered (endpoint id included).
    #[error("unsupported freespace width code {code}")]
    UnsupportedFreespaceWidth {
        code: u32,
        partial: Option<Box<Beacon>>,
    },

    #[error("size {0} is not supported")]
    UnsupportedSize(u128),

    #[error("transfer type \"{0}\" is not supported")]
    UnsupportedTransfer(&'static str),

    #[error("value {value} does not fit descriptor {descriptor}")]
    DescriptorOverflow {
        descriptor: &'static str,
        value: u128,
    },

    #[error("{path}: not a {expected}")]
    TransferTypeMismatch {
        path: String,
        expected: &'static str,
    },

    #[error("transfer already exists for {peer} session {session}")]
    DuplicateTransfer { peer: String, session: u32 },

    #[error("no transfer for {peer} session {session}")]
    UnknownTransfer { peer: String, session: u32 },

    #[error("buffer already allocated with {allocated} bytes, metadata declares {declared}")]
    SizeMismatch { allocated: u64, declared: u64 },

    #[error("offset {offset}+{len} outside declared size {size}")]
    BadOffset { offset: u64, len: u64, size: u64 },

    #[error("hole {start}..{end} is empty")]
    InvalidHole { start: u64, end: u64 },

    #[error("{kind}: {field} is not valid UTF-8")]
    InvalidText {
        kind: &'static str,
        field: &'static str,
    },

    #[error("bad address \"{0}\"")]
    BadAddress(String),

    #[error("bad timestamp: {0}")]
    BadTimestamp(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Status `errcode` token a receiver answers with for this error.
    pub fn errcode(&self) -> &'static str {
        match self {
            Error::InvalidFlag(_) => "badflags",
            Error::FrameTooShort { .. }
            | Error::UnknownFrameType(_)
            | Error::InvalidHole { .. }
            | Error::InvalidText { .. } => "badpacket",
            Error::DuplicateTransfer { .. } | Error::UnknownTransfer { .. } => "unknownid",
            Error::SizeMismatch { .. } | Error::BadOffset { .. } => "badoffset",
            Error::DescriptorOverflow { .. } | Error::UnsupportedSize(_) => "filetoobig",
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => "filenotfound",
            Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => "accessdenied",
            Error::Io(_) => "internalerror",
            Error::TransportFailure(_) => "cantsend",
            _ => "unspecified",
        }
    }
}
