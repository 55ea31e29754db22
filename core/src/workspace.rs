//! Repository workspace discovered from the AtomPub service document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::error::{CmisError, Result};
use crate::types::Link;

pub const ROOT_COLLECTION: &str = "root";
pub const QUERY_COLLECTION: &str = "query";
pub const TYPES_COLLECTION: &str = "types";

pub const OBJECT_BY_ID: &str = "objectbyid";
pub const OBJECT_BY_PATH: &str = "objectbypath";
pub const TYPE_BY_ID: &str = "typebyid";

const MULTIPART_RELATED: &str = "multipart/related";

/// An `app:collection` in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub href: String,
    /// Media types listed in `app:accept`.
    pub accepts: Vec<String>,
}

/// A `cmisra:uritemplate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriTemplate {
    pub template: String,
    pub template_type: String,
    pub media_type: Option<String>,
}

impl UriTemplate {
    /// Substitutes every `{name}` placeholder. Values are form-urlencoded;
    /// placeholders without a supplied value become empty.
    pub fn expand(&self, params: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            out.push_str(&rest[..open]);
            let name = &rest[open + 1..open + close];
            if let Some((_, value)) = params.iter().find(|(key, _)| *key == name) {
                out.extend(form_urlencoded::byte_serialize(value.as_bytes()));
            }
            rest = &rest[open + close + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// Discovered repository state: collections, URI templates, capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Workspace {
    pub repository_id: Option<String>,
    pub repository_name: Option<String>,
    pub root_folder_id: Option<String>,
    /// Keyed by `cmisra:collectionType` (root, query, types, ...).
    pub collections: BTreeMap<String, Collection>,
    /// Keyed by template type (objectbyid, objectbypath, typebyid, ...).
    pub uri_templates: BTreeMap<String, UriTemplate>,
    /// Keyed without the `capability` prefix, e.g. `Query` -> `bothcombined`.
    pub capabilities: BTreeMap<String, String>,
    pub links: Vec<Link>,
}

impl Workspace {
    pub fn collection_url(&self, name: &str) -> Option<&str> {
        self.collections.get(name).map(|c| c.href.as_str())
    }

    pub fn uri_template(&self, name: &str) -> Option<&UriTemplate> {
        self.uri_templates.get(name)
    }

    /// Collection href or raw URI template registered under `name`.
    pub fn url_for(&self, name: &str) -> Option<&str> {
        self.collection_url(name)
            .or_else(|| self.uri_template(name).map(|t| t.template.as_str()))
    }

    pub fn capability(&self, name: &str) -> Option<&str> {
        self.capabilities.get(name).map(String::as_str)
    }

    /// Whether the root collection advertises `multipart/related` uploads.
    pub fn accepts_multipart(&self) -> bool {
        self.collections.get(ROOT_COLLECTION).is_some_and(|c| {
            c.accepts
                .iter()
                .any(|accept| accept.trim_start().starts_with(MULTIPART_RELATED))
        })
    }

    /// A workspace without root and query collections cannot serve a session.
    pub fn ensure_usable(&self) -> Result<()> {
        for required in [ROOT_COLLECTION, QUERY_COLLECTION] {
            if self.collection_url(required).is_none() {
                return Err(CmisError::RepositoryDiscovery(format!(
                    "service document has no {required} collection"
                )));
            }
        }
        Ok(())
    }
}
