//! Error handling in [`informer_client`][crate]
use informer_core::{ErrorResponse, ParseSelectorError};
use thiserror::Error;

/// Type-erased transport failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Possible errors when talking to the cluster API
#[derive(Error, Debug)]
pub enum Error {
    /// The object, or the namespace it should live in, does not exist
    #[error("NotFound: {0}")]
    NotFound(#[source] ErrorResponse),

    /// An object with the same identity already exists
    #[error("AlreadyExists: {0}")]
    AlreadyExists(#[source] ErrorResponse),

    /// The requested resource version is no longer retained by the server
    ///
    /// Watchers recover from this by relisting.
    #[error("Expired: {0}")]
    Expired(#[source] ErrorResponse),

    /// The server could not be reached or asked us to back off
    ///
    /// This is the only transient error, callers may retry.
    #[error("Unavailable: {0}")]
    Unavailable(#[source] BoxError),

    /// Any other rejection from the server, e.g. validation failures
    #[error("ApiError: {0} ({0:?})")]
    Api(#[source] ErrorResponse),

    /// An object could not be converted to or from its wire form
    #[error("invalid object: {0}")]
    InvalidObject(#[source] serde_json::Error),

    /// A label selector could not be parsed
    #[error("invalid label selector: {0}")]
    InvalidSelector(#[source] ParseSelectorError),
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Classify a server status into the client taxonomy
    pub fn from_response(resp: ErrorResponse) -> Self {
        if resp.is_not_found() {
            Error::NotFound(resp)
        } else if resp.is_conflict() {
            Error::AlreadyExists(resp)
        } else if resp.is_gone() {
            Error::Expired(resp)
        } else if resp.is_transient() {
            Error::Unavailable(Box::new(resp))
        } else {
            Error::Api(resp)
        }
    }

    /// A transport-level failure with a plain message
    pub fn unavailable(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Error::Unavailable(msg.into())
    }

    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}
