//! Registry client errors.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use super::reference::ReferenceError;

/// Errors that can occur while listing tags from a registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid repository: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The ping got a response, but it could not be interpreted.
    #[error("Invalid ping response: {0}")]
    PingResponse(String),

    #[error("Token request to {realm} failed with {status}: {body}")]
    TokenRequest {
        realm: String,
        status: StatusCode,
        body: String,
    },

    #[error("Token response could not be decoded: {0}")]
    TokenDecode(String),

    #[error("Registry rejected credentials for {url} ({status})")]
    Unauthorized { url: String, status: StatusCode },

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: StatusCode },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A `Link` header pointed back at a page already fetched.
    #[error("Pagination loop: {url} was already listed")]
    PaginationLoop { url: String },

    #[error("Response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },
}

impl RegistryError {
    /// Whether the registry (or its token service) refused the identity used.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            RegistryError::Unauthorized { .. } | RegistryError::TokenRequest { .. }
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::Reference(_) => "reference",
            RegistryError::Transport(_) => "transport",
            RegistryError::PingResponse(_) => "ping_response",
            RegistryError::TokenRequest { .. } | RegistryError::TokenDecode(_) => "token",
            RegistryError::Unauthorized { .. } => "unauthorized",
            RegistryError::UnexpectedStatus { .. } => "status",
            RegistryError::InvalidUrl(_) => "url",
            RegistryError::PaginationLoop { .. } => "pagination_loop",
            RegistryError::Decode(_) => "decode",
            RegistryError::Timeout { .. } => "timeout",
        }
    }
}
