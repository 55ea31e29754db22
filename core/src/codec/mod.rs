//! XML codec for the CMIS AtomPub binding.
//!
//! # Design
//! Responses are first read into a small namespace-resolved element tree and
//! then walked by the decoders. Servers disagree on prefixes, element order
//! and which optional elements they send, so decoders match on resolved
//! namespace plus local name and treat absent optional elements as absent.
//! Encoders emit only what the caller supplied.

mod decode;
mod encode;
mod tree;

pub use decode::{parse_entry, parse_feed, parse_service_document, parse_type_definition};
pub use encode::{build_entry, build_multipart, build_query, EntryContent};

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const APP_NS: &str = "http://www.w3.org/2007/app";
pub const CMIS_NS: &str = "http://docs.oasis-open.org/ns/cmis/core/200908/";
pub const CMISRA_NS: &str = "http://docs.oasis-open.org/ns/cmis/restatom/200908/";

pub const ATOM_ENTRY_TYPE: &str = "application/atom+xml;type=entry";
pub const ATOM_FEED_TYPE: &str = "application/atom+xml;type=feed";
pub const APP_SERVICE_TYPE: &str = "application/atomsvc+xml";
pub const CMIS_QUERY_TYPE: &str = "application/cmisquery+xml";
pub const CMIS_TREE_TYPE: &str = "application/cmistree+xml";

pub const FOLDER_TREE_REL: &str = "http://docs.oasis-open.org/ns/cmis/link/200908/foldertree";
