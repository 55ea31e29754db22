//! Synchronous CMIS client over the AtomPub binding.
//!
//! # Overview
//! A [`Session`] discovers a repository's workspace from its service
//! document, then exposes one method per CMIS capability: path resolution,
//! navigation, create, update, delete, move, content streams, CMISQL query
//! and type definitions. Responses are decoded into a typed object model.
//!
//! # Design
//! - The XML codec (`codec`) is pure: bytes in, object model out, and back.
//! - HTTP is plain data (`http`). A session drives any [`Transport`]; the
//!   bundled [`UreqTransport`] is blocking and applies a per-exchange
//!   deadline.
//! - The session records the last completed exchange (method, URL, status,
//!   body) for diagnostics. A timed-out exchange records nothing.
//! - Errors are one enum, [`CmisError`]; nothing is retried internally.

mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;
pub mod types;
pub mod workspace;

pub use config::{ContentUpload, SessionConfig};
pub use error::{CmisError, Result};
pub use http::{Exchange, HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};
pub use session::{Credential, Session};
pub use transport::UreqTransport;
pub use types::{
    BaseType, CmisObject, ContentStream, Link, ObjectList, Paging, Properties, PropertyType,
    PropertyValue, TypeDefinition,
};
pub use workspace::Workspace;
