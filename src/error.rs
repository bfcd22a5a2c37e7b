// src/error.rs

//! Crate-wide error type
//!
//! Every data model, transaction and bootstrap operation reports one of the
//! LwM2M error kinds below. Each kind maps onto the CoAP response code the
//! request layer sends back to the server.

use thiserror::Error;

/// Errors produced by the data model, transaction and bootstrap engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Object, instance or resource is absent
    #[error("not found")]
    NotFound,

    /// Operation not supported by this object
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Handler is absent from the object's capability set
    #[error("not implemented")]
    NotImplemented,

    /// Malformed path or payload, or a policy violation
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Transaction failed validation
    #[error("not acceptable")]
    NotAcceptable,

    /// Engine-level invariant violation
    #[error("internal error: {0}")]
    Internal(String),

    /// Allocation or capacity exhaustion
    #[error("out of memory")]
    OutOfMemory,

    /// Network exchange timed out
    #[error("network timeout")]
    NetworkTimeout,

    /// Any other network or protocol failure
    #[error("network error: {0}")]
    NetworkOther(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure outside the data model
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for [`Error::BadRequest`]
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Shorthand for [`Error::Internal`]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// CoAP response code (class, detail) sent for this error
    pub fn coap_code(&self) -> (u8, u8) {
        match self {
            Self::BadRequest(_) => (4, 0),
            Self::NotFound => (4, 4),
            Self::MethodNotAllowed => (4, 5),
            Self::NotAcceptable => (4, 6),
            Self::NotImplemented => (5, 1),
            Self::NetworkTimeout => (5, 4),
            Self::Internal(_)
            | Self::OutOfMemory
            | Self::NetworkOther(_)
            | Self::Config(_)
            | Self::Io(_) => (5, 0),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Merge `next` into `acc`, keeping the first error encountered
///
/// Used where a sequence of independent steps must all run even if an
/// earlier one failed.
pub fn keep_first(acc: &mut Result<()>, next: Result<()>) {
    if acc.is_ok() {
        *acc = next;
    }
}
