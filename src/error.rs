//! Error types shared by every component of the core.
//!
//! The external surface of this crate only ever exposes the six kinds
//! enumerated by [`ErrorKind`]; the richer [`Error`] variants exist so
//! internal call sites and logs keep the detail that produced them.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds observable by callers of the driver, resource codec,
/// and session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input, non-sensical configuration, or protocol violation.
    Invalid,
    /// Passphrase required/wrong, or certificate validation rejected.
    Unauthorized,
    /// Clean or unclean peer shutdown surfaced as end-of-stream.
    Eof,
    /// Requested option combination not supported in this build.
    NotImplemented,
    /// Underlying cryptographic primitive failure.
    Crypto,
}

/// The crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, nonsensical configuration, or a protocol violation.
    #[error("invalid: {0}")]
    Invalid(String),

    /// A passphrase was required/wrong, or peer validation rejected the
    /// session.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Clean or unclean end of the peer's stream.
    #[error("eof")]
    Eof,

    /// The requested option combination is not supported in this build.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The underlying cryptographic primitive failed.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// I/O failure reading or writing an encoded form.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error into the externally observable [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Invalid(_) => ErrorKind::Invalid,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Eof => ErrorKind::Eof,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::Io(_) => ErrorKind::Invalid,
        }
    }

    /// Shorthand for building an [`Error::Invalid`] from anything
    /// `Display`-able.
    pub fn invalid(msg: impl std::fmt::Display) -> Self {
        Error::Invalid(msg.to_string())
    }

    /// Shorthand for building an [`Error::Unauthorized`].
    pub fn unauthorized(msg: impl std::fmt::Display) -> Self {
        Error::Unauthorized(msg.to_string())
    }

    /// Shorthand for building an [`Error::Crypto`].
    pub fn crypto(msg: impl std::fmt::Display) -> Self {
        Error::Crypto(msg.to_string())
    }

    /// Shorthand for building an [`Error::NotImplemented`].
    pub fn not_implemented(msg: impl std::fmt::Display) -> Self {
        Error::NotImplemented(msg.to_string())
    }
}

impl From<rcgen::Error> for Error {
    fn from(e: rcgen::Error) -> Self {
        Error::crypto(e)
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::invalid(e)
    }
}

impl From<rsa::Error> for Error {
    fn from(e: rsa::Error) -> Self {
        Error::crypto(e)
    }
}

impl From<rsa::pkcs8::Error> for Error {
    fn from(e: rsa::pkcs8::Error) -> Self {
        Error::invalid(e)
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        Error::crypto(e)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::invalid(e)
    }
}

impl From<pem::PemError> for Error {
    fn from(e: pem::PemError) -> Self {
        Error::invalid(e)
    }
}

impl From<der::Error> for Error {
    fn from(e: der::Error) -> Self {
        Error::invalid(e)
    }
}

impl From<x509_parser::error::X509Error> for Error {
    fn from(e: x509_parser::error::X509Error) -> Self {
        Error::invalid(e)
    }
}

impl<'a> From<x509_parser::nom::Err<x509_parser::error::X509Error>> for Error {
    fn from(e: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        Error::invalid(e)
    }
}

