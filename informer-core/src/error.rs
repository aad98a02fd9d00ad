//! Error responses returned by the cluster API
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error response from the API.
///
/// This mirrors the `Status` object an apiserver returns for rejected requests,
/// and the payload of an `ERROR` frame on a watch stream.
#[derive(Error, Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[error("{message}: {reason}")]
pub struct ErrorResponse {
    /// The status
    pub status: String,
    /// A message about the error
    #[serde(default)]
    pub message: String,
    /// The reason for the error
    #[serde(default)]
    pub reason: String,
    /// The error code
    pub code: u16,
}

impl ErrorResponse {
    /// Build a `Failure` status with the given code, reason and message
    pub fn failure(code: u16, reason: &str, message: impl Into<String>) -> Self {
        Self {
            status: "Failure".into(),
            message: message.into(),
            reason: reason.into(),
            code,
        }
    }

    /// The requested object or namespace does not exist
    pub fn is_not_found(&self) -> bool {
        self.code == 404
    }

    /// The object collides with an existing identity
    pub fn is_conflict(&self) -> bool {
        self.code == 409
    }

    /// The requested resource version is no longer retained by the server
    ///
    /// The apiserver answers `410 Gone` with reason `Expired` (or `Gone`) when a watch
    /// is opened from a point outside its history window.
    pub fn is_gone(&self) -> bool {
        self.code == 410
    }

    /// The server asked us to back off or failed internally
    pub fn is_transient(&self) -> bool {
        self.code == 429 || self.code >= 500
    }
}
