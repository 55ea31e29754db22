//! Error types for the CMIS client.
//!
//! # Design
//! Path resolution gets its own `ObjectNotFound` variant because callers
//! routinely branch on "nothing lives at that path". Every other non-2xx
//! response lands in `RequestFailed` with the operation name, status code and
//! raw body, so the caller can decide whether to retry. Transport failures are
//! split into timeouts and everything else; neither produces an exchange
//! record on the session.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CmisError>;

/// Errors returned by session operations and the XML codec.
#[derive(Debug, Error)]
pub enum CmisError {
    /// The HTTP exchange did not complete within the configured deadline.
    #[error("{method} {url} timed out after {timeout:?}")]
    TransportTimeout {
        method: String,
        url: String,
        timeout: Duration,
    },

    /// The transport failed before a response was received.
    #[error("transport failure for {method} {url}: {reason}")]
    Transport {
        method: String,
        url: String,
        reason: String,
    },

    /// The response body could not be decoded into the expected XML shape.
    #[error("could not decode response: {reason}")]
    ProtocolDecode { reason: String, body: Vec<u8> },

    /// The service document lacks something the session needs.
    #[error("repository discovery failed: {0}")]
    RepositoryDiscovery(String),

    /// Path or id resolution returned no object.
    #[error("{operation}: no object at {target} (HTTP {status})")]
    ObjectNotFound {
        operation: &'static str,
        target: String,
        status: u16,
        body: Vec<u8>,
    },

    /// The server answered with a non-2xx status.
    #[error("{operation} failed with HTTP {status}: {}", String::from_utf8_lossy(.body))]
    RequestFailed {
        operation: &'static str,
        status: u16,
        body: Vec<u8>,
    },

    /// A content stream fetch returned a non-2xx status or no payload.
    #[error("content stream for {object_id} unavailable: {reason}")]
    ContentRetrieval {
        operation: &'static str,
        object_id: String,
        status: Option<u16>,
        reason: String,
        /// Raw response body; empty when no response was involved.
        body: Vec<u8>,
    },

    /// A request body could not be encoded.
    #[error("could not encode request: {0}")]
    Encode(String),

    /// Caller input rejected before any request was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CmisError {
    pub(crate) fn decode(reason: impl Into<String>, body: &[u8]) -> Self {
        Self::ProtocolDecode {
            reason: reason.into(),
            body: body.to_vec(),
        }
    }

    /// HTTP status behind this error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ObjectNotFound { status, .. } | Self::RequestFailed { status, .. } => {
                Some(*status)
            }
            Self::ContentRetrieval { status, .. } => *status,
            _ => None,
        }
    }

    /// Name of the operation that produced this error, for classified HTTP outcomes.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::ObjectNotFound { operation, .. }
            | Self::RequestFailed { operation, .. }
            | Self::ContentRetrieval { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Raw response body attached to this error, if any.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            Self::ProtocolDecode { body, .. }
            | Self::ObjectNotFound { body, .. }
            | Self::RequestFailed { body, .. }
            | Self::ContentRetrieval { body, .. } => Some(body),
            _ => None,
        }
    }
}
