use std::io;
use thiserror::Error;

/// The buffer is not a readable C3D file at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid magic byte: expected 0x50, found {0:#04x}")]
    BadMagic(u8),
    #[error("File too short for a C3D header: {0} bytes")]
    TooShort(usize),
    #[error("Unsupported processor type {0} (only Intel little-endian files are supported)")]
    UnsupportedProcessor(u8),
    #[error("Unknown processor type {0}")]
    UnknownProcessor(u8),
    #[error("Parameter section pointer is zero")]
    NoParameterSection,
}

/// The parameter section could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptionError {
    #[error("Parameter record truncated at byte {offset} of the parameter section")]
    TruncatedRecord { offset: usize },
    #[error("Parameter record at byte {offset} has group id -128, ids span 1..=127")]
    GroupIdOutOfRange { offset: usize },
    #[error("Unsupported parameter element type code {0}")]
    UnsupportedType(i8),
    #[error("Parameter {name} declares {needed} payload bytes but only {available} remain")]
    PayloadOverflow { name: String, needed: usize, available: usize },
    #[error("Parameter {name} holds {actual} payload bytes, its dimensions require {expected}")]
    PayloadMismatch { name: String, expected: usize, actual: usize },
}

/// A frame's payload ended before the declared frame size.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Frame data truncated: needed {expected} bytes, {available} available")]
pub struct TruncatedFrame {
    pub expected:  usize,
    pub available: usize,
}

#[derive(Error, Debug)]
pub enum C3dError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Corruption(#[from] CorruptionError),
    #[error(transparent)]
    TruncatedFrame(#[from] TruncatedFrame),
    #[error("Inconsistent metadata: {0}")]
    InconsistentMetadata(String),
    /// Metadata edit or frame with a shape or type that cannot be encoded.
    #[error("Invalid shape or type: {0}")]
    Shape(String),
    #[error("Key already exists: {0}")]
    Duplicate(String),
    #[error("Attempted to write a file without frames")]
    EmptyWriter,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of a [`C3dError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not this format, or a variant of it that is not supported.
    Format,
    Corruption,
    TruncatedFrame,
    InconsistentMetadata,
    /// Caller supplied a value of the wrong shape or type.
    Type,
    Io,
}

impl C3dError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            C3dError::Format(_)               => ErrorKind::Format,
            C3dError::Corruption(_)           => ErrorKind::Corruption,
            C3dError::TruncatedFrame(_)       => ErrorKind::TruncatedFrame,
            C3dError::InconsistentMetadata(_) => ErrorKind::InconsistentMetadata,
            C3dError::Shape(_)
            | C3dError::Duplicate(_)
            | C3dError::EmptyWriter           => ErrorKind::Type,
            C3dError::Io(_)                   => ErrorKind::Io,
        }
    }
}

pub type Result<T> = std::result::Result<T, C3dError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_separate_format_from_corruption() {
        let e: C3dError = FormatError::BadMagic(0x10).into();
        assert_eq!(e.kind(), ErrorKind::Format);
        let e: C3dError = CorruptionError::UnsupportedType(3).into();
        assert_eq!(e.kind(), ErrorKind::Corruption);
        let e: C3dError = TruncatedFrame { expected: 8, available: 2 }.into();
        assert_eq!(e.kind(), ErrorKind::TruncatedFrame);
    }

    #[test]
    fn messages_carry_context() {
        let e = CorruptionError::PayloadOverflow { name: "LABELS".into(), needed: 40, available: 12 };
        assert_eq!(
            e.to_string(),
            "Parameter LABELS declares 40 payload bytes but only 12 remain"
        );
    }
}
