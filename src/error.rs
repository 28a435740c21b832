//! Error results that can occur working with disk images
#![warn(missing_docs)]
#![warn(unsafe_code)]
use std::{
    fmt::{Debug, Display, Formatter, Result},
    io,
};

/// An error that can occur when opening, parsing, or validating a
/// disk image.
pub struct Error {
    kind: ErrorKind,
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}", self.kind)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create a new Error with a given ErrorKind variant
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind }
    }

    /// Return the kind of this error
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io(e))
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(e: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::new(ErrorKind::Invalid(InvalidErrorKind::Invalid(e.to_string())))
    }
}

impl<'a> nom::error::ParseError<&'a [u8]> for Error {
    fn from_error_kind(_input: &'a [u8], kind: nom::error::ErrorKind) -> Self {
        Error::new(ErrorKind::Invalid(InvalidErrorKind::Invalid(
            kind.description().to_string(),
        )))
    }

    fn append(_input: &'a [u8], _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

/// The kinds of errors that can occur when processing a disk image.
pub enum ErrorKind {
    /// Generic error type
    Message(String),

    /// An error that occurs while reading image data.
    Io(io::Error),

    /// An error that occurs when dealing with invalid or unexpected
    /// data: bad geometry, a broken chain, a BAM inconsistency.
    Invalid(InvalidErrorKind),

    /// The image uses a feature that is recognized but not yet
    /// implemented, for example CMD-native file content or the
    /// DHD/D60/D90/D16 formats.
    Unimplemented(String),

    /// The data requested was not found in the image: an unknown
    /// format, a missing block, or a directory entry that doesn't
    /// exist.
    NotFound(String),
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            ErrorKind::Message(message) => write!(f, "An error occurred: {}", message),
            ErrorKind::Io(e) => write!(f, "{}", e),
            ErrorKind::Invalid(e) => write!(f, "{}", e),
            ErrorKind::Unimplemented(message) => {
                write!(f, "Unimplemented feature: {}", message)
            }
            ErrorKind::NotFound(message) => {
                write!(f, "Data not found: {}", message)
            }
        }
    }
}

impl ErrorKind {
    /// Return a new generic ErrorKind::Message with a given string message.
    pub fn new(message: &str) -> ErrorKind {
        ErrorKind::Message(message.to_string())
    }
}

/// An InvalidErrorKind is returned when on-disk data fails a
/// geometry, addressing, or structural check. BAM bit/counter
/// mismatches and other soft inconsistencies are reported instead as
/// [crate::cbm::validator::ValidationIssue]s, since validation never
/// aborts on them.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum InvalidErrorKind {
    /// The data was invalid; the string describes what failed.
    Invalid(String),
    /// A track/sector or LBA address falls outside the active
    /// geometry.
    BadAddress(String),
    /// Advancing an address walked past the end of the image, the
    /// current track, or the active partition.
    AddressOverflow(String),
    /// A block chain revisited a block it had already visited.
    Loop(String),
}

impl Display for InvalidErrorKind {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self {
            InvalidErrorKind::Invalid(message) => write!(f, "image is invalid: {}", message),
            InvalidErrorKind::BadAddress(message) => write!(f, "bad address: {}", message),
            InvalidErrorKind::AddressOverflow(message) => {
                write!(f, "address overflow: {}", message)
            }
            InvalidErrorKind::Loop(message) => write!(f, "loop detected: {}", message),
        }
    }
}
