//! Operation layer: one method per CMIS capability.
//!
//! # Design
//! Every operation is a short, sequential script of exchanges on the session:
//! look the target up through the `objectbyid` (or `objectbypath`) URI
//! template, follow the link the server advertised on that entry, then
//! classify the response. Nothing is cached between calls, so each operation
//! reflects current server state. Failures are never retried here; they are
//! returned with the operation name, status and body attached.

use tracing::warn;
use url::Url;

use crate::codec::{
    build_entry, build_multipart, build_query, parse_entry, parse_feed, parse_type_definition,
    EntryContent, ATOM_ENTRY_TYPE, ATOM_FEED_TYPE, CMIS_QUERY_TYPE, CMIS_TREE_TYPE,
    FOLDER_TREE_REL,
};
use crate::config::ContentUpload;
use crate::error::{CmisError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::session::Session;
use crate::types::{
    BaseType, CmisObject, ContentStream, ObjectList, Paging, Properties, PropertyValue,
    TypeDefinition, CONTENT_STREAM_MIME_TYPE, NAME, OBJECT_ID,
};
use crate::workspace::{Workspace, OBJECT_BY_ID, OBJECT_BY_PATH, QUERY_COLLECTION, TYPE_BY_ID};

const ATOM_MEDIA: &str = "application/atom+xml";
const OCTET_STREAM: &str = "application/octet-stream";

/// Values for optional template parameters the caller did not supply.
const TEMPLATE_DEFAULTS: &[(&str, &str)] = &[
    ("filter", ""),
    ("includeAllowableActions", "false"),
    ("includePolicyIds", "false"),
    ("includeRelationships", "none"),
    ("includeACL", "false"),
    ("renditionFilter", ""),
];

/// Maps a non-2xx response to `RequestFailed`.
pub(crate) fn check_status(response: &HttpResponse, operation: &'static str) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    warn!(operation, status = response.status, "cmis request failed");
    Err(CmisError::RequestFailed {
        operation,
        status: response.status,
        body: response.body.clone(),
    })
}

fn decoded<T>(operation: &'static str, result: Result<T>) -> Result<T> {
    result.inspect_err(|err| warn!(operation, error = %err, "could not decode response"))
}

fn with_query(url: &str, pairs: &[(&str, String)]) -> Result<String> {
    if pairs.is_empty() {
        return Ok(url.to_string());
    }
    let mut parsed = Url::parse(url)
        .map_err(|e| CmisError::InvalidArgument(format!("invalid URL {url}: {e}")))?;
    {
        let mut query = parsed.query_pairs_mut();
        for (name, value) in pairs {
            query.append_pair(name, value);
        }
    }
    Ok(parsed.into())
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CmisError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}

fn get(url: String, accept: &str) -> HttpRequest {
    HttpRequest::new(HttpMethod::Get, url).with_header("accept", accept)
}

impl<T: Transport> Session<T> {
    // -----------------------------------------------------------------------
    // Lookup helpers
    // -----------------------------------------------------------------------

    fn template_url(&mut self, name: &str, params: &[(&str, &str)]) -> Result<String> {
        let template = self.workspace()?.uri_template(name).cloned().ok_or_else(|| {
            CmisError::RepositoryDiscovery(format!("service document has no {name} URI template"))
        })?;
        let mut all = params.to_vec();
        all.extend_from_slice(TEMPLATE_DEFAULTS);
        self.resolve(&template.expand(&all))
    }

    fn collection(&mut self, name: &str) -> Result<String> {
        let href = self
            .workspace()?
            .collection_url(name)
            .map(str::to_string)
            .ok_or_else(|| {
                CmisError::RepositoryDiscovery(format!("service document has no {name} collection"))
            })?;
        self.resolve(&href)
    }

    fn link_href(
        &self,
        object: &CmisObject,
        href: Option<&str>,
        rel: &str,
        operation: &'static str,
    ) -> Result<String> {
        let href = href.ok_or_else(|| {
            CmisError::InvalidArgument(format!(
                "{operation}: object {} has no {rel} link",
                object.id().unwrap_or("<unknown>")
            ))
        })?;
        self.resolve(href)
    }

    fn fetch_entry(&mut self, operation: &'static str, url: String) -> Result<CmisObject> {
        let response = self.execute(get(url, ATOM_ENTRY_TYPE))?;
        check_status(&response, operation)?;
        decoded(operation, parse_entry(&response.body))
    }

    fn fetch_feed(&mut self, operation: &'static str, url: String) -> Result<ObjectList> {
        let response = self.execute(get(url, ATOM_FEED_TYPE))?;
        check_status(&response, operation)?;
        decoded(operation, parse_feed(&response.body))
    }

    fn fetch_type(&mut self, operation: &'static str, url: String) -> Result<TypeDefinition> {
        let response = self.execute(get(url, ATOM_ENTRY_TYPE))?;
        check_status(&response, operation)?;
        decoded(operation, parse_type_definition(&response.body))
    }

    /// Fetches an entry by id; any non-2xx is `RequestFailed` for `operation`.
    fn lookup(&mut self, operation: &'static str, id: &str) -> Result<CmisObject> {
        require("object id", id)?;
        let url = self.template_url(OBJECT_BY_ID, &[("id", id)])?;
        self.fetch_entry(operation, url)
    }

    fn send_entry(
        &mut self,
        operation: &'static str,
        method: HttpMethod,
        url: String,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<HttpResponse> {
        let request = HttpRequest::new(method, url)
            .with_header("accept", ATOM_ENTRY_TYPE)
            .with_body(content_type, body);
        let response = self.execute(request)?;
        check_status(&response, operation)?;
        Ok(response)
    }

    /// The feed (not tree) `down` link of a folder.
    fn children_url(&self, folder: &CmisObject, operation: &'static str) -> Result<String> {
        self.link_href(folder, folder.link_typed("down", ATOM_MEDIA), "down", operation)
    }

    // -----------------------------------------------------------------------
    // Repository
    // -----------------------------------------------------------------------

    /// Re-reads the service document and returns the repository's workspace.
    pub fn get_repository_info(&mut self) -> Result<Workspace> {
        self.discover_workspace().cloned()
    }

    // -----------------------------------------------------------------------
    // Objects and navigation
    // -----------------------------------------------------------------------

    /// Resolves an absolute repository path such as `/Demo/TextFile.txt`.
    pub fn resolve_path(&mut self, path: &str) -> Result<CmisObject> {
        const OP: &str = "resolvePath";
        if !path.starts_with('/') {
            return Err(CmisError::InvalidArgument(format!(
                "path {path:?} must start at the root folder"
            )));
        }
        let url = self.template_url(OBJECT_BY_PATH, &[("path", path)])?;
        let response = self.execute(get(url, ATOM_ENTRY_TYPE))?;
        if !response.is_success() {
            warn!(path, status = response.status, "path did not resolve");
            return Err(CmisError::ObjectNotFound {
                operation: OP,
                target: path.to_string(),
                status: response.status,
                body: response.body,
            });
        }
        let object = decoded(OP, parse_entry(&response.body))?;
        if object.id().is_none() {
            return Err(CmisError::decode(
                format!("entry for {path} has no {OBJECT_ID}"),
                &response.body,
            ));
        }
        Ok(object)
    }

    /// Fetches an object by id.
    pub fn get_object(&mut self, object_id: &str) -> Result<CmisObject> {
        self.lookup("getObject", object_id).map_err(|err| match err {
            CmisError::RequestFailed {
                operation,
                status: 404,
                body,
            } => CmisError::ObjectNotFound {
                operation,
                target: object_id.to_string(),
                status: 404,
                body,
            },
            other => other,
        })
    }

    /// Lists the immediate children of a folder in server order.
    pub fn get_children(&mut self, folder_id: &str, paging: Paging) -> Result<ObjectList> {
        const OP: &str = "getChildren";
        let folder = self.lookup(OP, folder_id)?;
        let href = self.children_url(&folder, OP)?;
        let url = with_query(&href, &paging.query_pairs())?;
        self.fetch_feed(OP, url)
    }

    pub fn get_folder_parent(&mut self, folder_id: &str) -> Result<CmisObject> {
        const OP: &str = "getFolderParent";
        let folder = self.lookup(OP, folder_id)?;
        let Some(up) = folder.link("up") else {
            return Err(CmisError::InvalidArgument(format!(
                "{OP}: folder {folder_id} has no parent"
            )));
        };
        let url = self.resolve(up)?;
        self.fetch_entry(OP, url)
    }

    // -----------------------------------------------------------------------
    // Create, update, delete, move
    // -----------------------------------------------------------------------

    /// Creates a folder named `name` under `parent_id`.
    pub fn create_folder(&mut self, parent_id: &str, name: &str) -> Result<CmisObject> {
        const OP: &str = "createFolder";
        require("folder name", name)?;
        let parent = self.lookup(OP, parent_id)?;
        let url = self.children_url(&parent, OP)?;

        let mut properties = Properties::new();
        properties.insert(NAME.to_string(), PropertyValue::string(name));
        let body = build_entry(Some(BaseType::Folder.as_str()), &properties, None)?;

        let response = self.send_entry(OP, HttpMethod::Post, url, ATOM_ENTRY_TYPE, body)?;
        decoded(OP, parse_entry(&response.body))
    }

    /// Creates a document with content under `parent_id`.
    ///
    /// `overrides` are sent alongside `cmis:name` and win over it; a
    /// `cmis:objectTypeId` among them replaces the default `cmis:document`.
    pub fn create_document(
        &mut self,
        parent_id: &str,
        name: &str,
        overrides: &Properties,
        content: &[u8],
        media_type: &str,
    ) -> Result<CmisObject> {
        const OP: &str = "createDocument";
        require("document name", name)?;
        let parent = self.lookup(OP, parent_id)?;
        let url = self.children_url(&parent, OP)?;

        let mut properties = Properties::new();
        properties.insert(NAME.to_string(), PropertyValue::string(name));
        for (id, value) in overrides {
            properties.insert(id.clone(), value.clone());
        }

        let multipart = match self.config().content_upload {
            ContentUpload::Auto => self.workspace()?.accepts_multipart(),
            ContentUpload::Base64 => false,
            ContentUpload::Multipart => true,
        };
        let document = Some(BaseType::Document.as_str());
        let content = EntryContent {
            bytes: content,
            media_type,
        };
        let (content_type, body) = if multipart {
            let entry = build_entry(document, &properties, None)?;
            build_multipart(&entry, content)
        } else {
            let entry = build_entry(document, &properties, Some(content))?;
            (ATOM_ENTRY_TYPE.to_string(), entry)
        };

        let response = self.send_entry(OP, HttpMethod::Post, url, &content_type, body)?;
        decoded(OP, parse_entry(&response.body))
    }

    /// Replaces the given properties on an object and returns its new state.
    pub fn update_properties(
        &mut self,
        object_id: &str,
        properties: &Properties,
    ) -> Result<CmisObject> {
        const OP: &str = "updateProperties";
        let object = self.lookup(OP, object_id)?;
        let edit = object.link("edit").or_else(|| object.link("self"));
        let url = self.link_href(&object, edit, "edit", OP)?;
        let body = build_entry(None, properties, None)?;

        let response = self.send_entry(OP, HttpMethod::Put, url, ATOM_ENTRY_TYPE, body)?;
        if response.body.is_empty() {
            return self.lookup(OP, object_id);
        }
        decoded(OP, parse_entry(&response.body))
    }

    /// Deletes one object. A non-empty folder is refused by the repository.
    pub fn delete_object(&mut self, object_id: &str, all_versions: bool) -> Result<()> {
        const OP: &str = "deleteObject";
        let object = self.lookup(OP, object_id)?;
        let edit = object.link("edit").or_else(|| object.link("self"));
        let href = self.link_href(&object, edit, "edit", OP)?;
        let pairs = if all_versions {
            vec![("allVersions", "true".to_string())]
        } else {
            Vec::new()
        };
        let url = with_query(&href, &pairs)?;

        let response = self.execute(HttpRequest::new(HttpMethod::Delete, url))?;
        check_status(&response, OP)
    }

    /// Deletes a folder and everything below it.
    pub fn delete_tree(&mut self, folder_id: &str, continue_on_failure: bool) -> Result<()> {
        const OP: &str = "deleteTree";
        let folder = self.lookup(OP, folder_id)?;
        let tree = folder.link(FOLDER_TREE_REL).or_else(|| {
            folder
                .links
                .iter()
                .find(|link| {
                    link.rel == "down" && link.media_type.as_deref() == Some(CMIS_TREE_TYPE)
                })
                .map(|link| link.href.as_str())
        });
        let href = self.link_href(&folder, tree, "folder tree", OP)?;
        let url = with_query(
            &href,
            &[("continueOnFailure", continue_on_failure.to_string())],
        )?;

        let response = self.execute(HttpRequest::new(HttpMethod::Delete, url))?;
        check_status(&response, OP)
    }

    /// Moves an object from `source_folder_id` into `target_folder_id`.
    ///
    /// The binding has no in-place move: the object is posted to the target's
    /// children collection with a reference to the source folder.
    pub fn move_object(
        &mut self,
        object_id: &str,
        target_folder_id: &str,
        source_folder_id: &str,
    ) -> Result<CmisObject> {
        const OP: &str = "moveObject";
        require("object id", object_id)?;
        require("source folder id", source_folder_id)?;
        let target = self.lookup(OP, target_folder_id)?;
        let href = self.children_url(&target, OP)?;
        let url = with_query(&href, &[("sourceFolderId", source_folder_id.to_string())])?;

        let mut properties = Properties::new();
        properties.insert(OBJECT_ID.to_string(), PropertyValue::id(object_id));
        let body = build_entry(None, &properties, None)?;

        let response = self.send_entry(OP, HttpMethod::Post, url, ATOM_ENTRY_TYPE, body)?;
        decoded(OP, parse_entry(&response.body))
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    /// Downloads a document's content stream.
    pub fn get_content_stream(&mut self, object_id: &str) -> Result<ContentStream> {
        const OP: &str = "getContentStream";
        let object = self.lookup(OP, object_id).map_err(|err| match err {
            CmisError::RequestFailed { status, body, .. } => CmisError::ContentRetrieval {
                operation: OP,
                object_id: object_id.to_string(),
                status: Some(status),
                reason: format!("lookup failed: {}", String::from_utf8_lossy(&body)),
                body,
            },
            other => other,
        })?;

        let content = object.content.clone().unwrap_or_default();
        let declared = content.media_type.clone().or_else(|| {
            object
                .property(CONTENT_STREAM_MIME_TYPE)
                .and_then(PropertyValue::as_str)
                .map(str::to_string)
        });
        let src = content.src.as_deref().or_else(|| object.link("edit-media"));

        let Some(src) = src else {
            return match content.inline {
                Some(text) if !text.is_empty() => Ok(ContentStream::new(
                    text,
                    declared.unwrap_or_else(|| "text/plain".to_string()),
                )),
                _ => Err(CmisError::ContentRetrieval {
                    operation: OP,
                    object_id: object_id.to_string(),
                    status: None,
                    reason: "object has no content stream".to_string(),
                    body: Vec::new(),
                }),
            };
        };

        let url = self.resolve(src)?;
        let response = self.execute(get(url, "*/*"))?;
        if !response.is_success() {
            warn!(object_id, status = response.status, "content fetch failed");
            return Err(CmisError::ContentRetrieval {
                operation: OP,
                object_id: object_id.to_string(),
                status: Some(response.status),
                reason: format!("HTTP {}: {}", response.status, response.text()),
                body: response.body,
            });
        }
        if response.body.is_empty() {
            return Err(CmisError::ContentRetrieval {
                operation: OP,
                object_id: object_id.to_string(),
                status: Some(response.status),
                reason: "empty content stream".to_string(),
                body: Vec::new(),
            });
        }

        let media_type = response
            .header("content-type")
            .map(str::to_string)
            .or(declared)
            .unwrap_or_else(|| OCTET_STREAM.to_string());
        Ok(ContentStream::new(response.body, media_type))
    }

    /// Replaces a document's content stream.
    pub fn set_content_stream(
        &mut self,
        object_id: &str,
        content: &[u8],
        media_type: &str,
    ) -> Result<()> {
        const OP: &str = "setContentStream";
        let object = self.lookup(OP, object_id)?;
        let media = object
            .link("edit-media")
            .or_else(|| object.content.as_ref().and_then(|c| c.src.as_deref()));
        let url = self.link_href(&object, media, "edit-media", OP)?;

        let request =
            HttpRequest::new(HttpMethod::Put, url).with_body(media_type, content.to_vec());
        let response = self.execute(request)?;
        check_status(&response, OP)
    }

    // -----------------------------------------------------------------------
    // Query and types
    // -----------------------------------------------------------------------

    /// Runs a CMISQL statement. Each row holds exactly the selected columns.
    pub fn query(&mut self, statement: &str, paging: Paging) -> Result<ObjectList> {
        const OP: &str = "query";
        require("query statement", statement)?;
        let url = self.collection(QUERY_COLLECTION)?;
        let body = build_query(statement, false, paging)?;
        let request = HttpRequest::new(HttpMethod::Post, url)
            .with_header("accept", ATOM_FEED_TYPE)
            .with_body(CMIS_QUERY_TYPE, body);

        let response = self.execute(request)?;
        check_status(&response, OP)?;
        decoded(OP, parse_feed(&response.body))
    }

    /// Type definition of the object's type, via its `describedby` link when
    /// present and the `typebyid` template otherwise.
    pub fn get_object_type_definition(&mut self, object_id: &str) -> Result<TypeDefinition> {
        const OP: &str = "getObjectTypeDefinition";
        let object = self.lookup(OP, object_id)?;
        let url = match object.link("describedby") {
            Some(href) => self.resolve(href)?,
            None => {
                let type_id = object.object_type_id().ok_or_else(|| {
                    CmisError::InvalidArgument(format!(
                        "{OP}: object {object_id} reports no object type"
                    ))
                })?;
                let type_id = type_id.to_string();
                self.template_url(TYPE_BY_ID, &[("id", &type_id)])?
            }
        };
        self.fetch_type(OP, url)
    }

    pub fn get_type_definition(&mut self, type_id: &str) -> Result<TypeDefinition> {
        const OP: &str = "getTypeDefinition";
        require("type id", type_id)?;
        let url = self.template_url(TYPE_BY_ID, &[("id", type_id)])?;
        self.fetch_type(OP, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::http::TransportError;
    use crate::session::testing::*;
    use crate::session::Credential;

    fn session(transport: &ScriptedTransport) -> Session<&ScriptedTransport> {
        Session::new(
            BASE,
            Credential::basic("admin", "admin"),
            SessionConfig::default(),
            transport,
        )
    }

    const EMPTY_FEED: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom"/>"#;

    #[test]
    fn check_status_classifies_non_success() {
        let response = HttpResponse {
            status: 500,
            headers: Vec::new(),
            body: b"boom".to_vec(),
        };
        let err = check_status(&response, "getChildren").unwrap_err();
        assert!(matches!(
            err,
            CmisError::RequestFailed { operation: "getChildren", status: 500, .. }
        ));
    }

    #[test]
    fn get_children_follows_down_link_with_paging() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            ok(entry("f1", "Demo", "cmis:folder")),
            ok(EMPTY_FEED),
        ]);
        let mut session = session(&transport);
        let children = session.get_children("f1", Paging::new(5, 10)).unwrap();
        assert!(children.is_empty());

        let lookup = transport.request(1);
        assert!(lookup.url.starts_with("http://repo/objects?id=f1&filter="));
        let listing = transport.request(2);
        assert_eq!(listing.url, "http://repo/children/f1?maxItems=5&skipCount=10");
        assert_eq!(session.last_exchange().unwrap().url, listing.url);
    }

    #[test]
    fn resolve_path_maps_any_failure_to_not_found() {
        let transport = ScriptedTransport::new(vec![ok(SERVICE_DOC), status(404, "")]);
        let mut session = session(&transport);
        let err = session.resolve_path("/Missing Folder").unwrap_err();
        assert!(matches!(
            err,
            CmisError::ObjectNotFound { operation: "resolvePath", status: 404, ref target, .. }
                if target == "/Missing Folder"
        ));
        assert_eq!(transport.request(1).url, "http://repo/path?path=%2FMissing+Folder");
    }

    #[test]
    fn relative_path_is_rejected_before_any_request() {
        let transport = ScriptedTransport::default();
        let mut session = session(&transport);
        let err = session.resolve_path("Demo").unwrap_err();
        assert!(matches!(err, CmisError::InvalidArgument(_)));
        assert_eq!(transport.count(), 0);
    }

    #[test]
    fn not_found_on_lookup_depends_on_operation() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            status(404, ""),
            status(404, ""),
        ]);
        let mut session = session(&transport);
        let err = session.get_object("gone").unwrap_err();
        assert!(matches!(err, CmisError::ObjectNotFound { status: 404, .. }));
        let err = session.delete_object("gone", false).unwrap_err();
        assert!(matches!(
            err,
            CmisError::RequestFailed { operation: "deleteObject", status: 404, .. }
        ));
    }

    #[test]
    fn create_folder_posts_typed_entry_to_children() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            ok(entry("root", "Company Home", "cmis:folder")),
            status(201, entry("f1", "Demo", "cmis:folder")),
        ]);
        let mut session = session(&transport);
        let folder = session.create_folder("root", "Demo").unwrap();
        assert_eq!(folder.id(), Some("f1"));
        assert!(folder.is_folder());

        let post = transport.request(2);
        assert_eq!(post.method, HttpMethod::Post);
        assert_eq!(post.url, "http://repo/children/root");
        assert_eq!(post.header("content-type"), Some(ATOM_ENTRY_TYPE));
        let sent = parse_entry(post.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent.object_type_id(), Some("cmis:folder"));
        assert_eq!(sent.name(), Some("Demo"));
        assert_eq!(sent.properties.len(), 2);
    }

    #[test]
    fn create_document_uses_multipart_when_forced() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            ok(entry("f1", "Demo", "cmis:folder")),
            status(201, entry("d1", "TextFile.txt", "cmis:document")),
        ]);
        let config = SessionConfig::default().with_content_upload(ContentUpload::Multipart);
        let mut session = Session::new(BASE, Credential::basic("u", "p"), config, &transport);
        let doc = session
            .create_document("f1", "TextFile.txt", &Properties::new(), b"hello", "text/plain")
            .unwrap();
        assert!(doc.is_document());

        let post = transport.request(2);
        assert!(post
            .header("content-type")
            .unwrap()
            .starts_with("multipart/related;"));
        let body = String::from_utf8(post.body.unwrap()).unwrap();
        assert!(body.contains("\r\n\r\nhello\r\n"));
        assert!(!body.contains("cmisra:base64"));
    }

    #[test]
    fn move_posts_object_id_with_source_reference() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            ok(entry("f2", "Target", "cmis:folder")),
            status(201, entry("d1", "TextFile.txt", "cmis:document")),
        ]);
        let mut session = session(&transport);
        session.move_object("d1", "f2", "f1").unwrap();

        let post = transport.request(2);
        assert_eq!(post.url, "http://repo/children/f2?sourceFolderId=f1");
        let sent = parse_entry(post.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent.id(), Some("d1"));
        assert_eq!(sent.properties.len(), 1);
    }

    #[test]
    fn query_failure_preserves_server_diagnostic() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            status(400, "invalid CMISQL near FORM"),
        ]);
        let mut session = session(&transport);
        let err = session.query("SELECT * FORM cmis:document", Paging::default()).unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.body(), Some(&b"invalid CMISQL near FORM"[..]));

        let post = transport.request(1);
        assert_eq!(post.url, "http://repo/query");
        assert_eq!(post.header("content-type"), Some(CMIS_QUERY_TYPE));
        assert_eq!(session.last_exchange().unwrap().body_text(), "invalid CMISQL near FORM");
    }

    #[test]
    fn content_stream_prefers_response_media_type() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            ok(entry("d1", "TextFile.txt", "cmis:document")),
            Ok(HttpResponse {
                status: 200,
                headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
                body: b"THIS IS A NEW DOCUMENT".to_vec(),
            }),
        ]);
        let mut session = session(&transport);
        let stream = session.get_content_stream("d1").unwrap();
        assert_eq!(stream.bytes, b"THIS IS A NEW DOCUMENT");
        assert_eq!(stream.media_type, "text/plain");
        assert_eq!(transport.request(2).url, "http://repo/content/d1");
    }

    #[test]
    fn empty_content_stream_is_a_retrieval_error() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            ok(entry("d1", "Empty.txt", "cmis:document")),
            ok(""),
        ]);
        let mut session = session(&transport);
        let err = session.get_content_stream("d1").unwrap_err();
        assert!(matches!(err, CmisError::ContentRetrieval { status: Some(200), .. }));
    }

    #[test]
    fn failed_content_fetch_keeps_status_and_body() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            ok(entry("d1", "TextFile.txt", "cmis:document")),
            status(500, "boom"),
        ]);
        let mut session = session(&transport);
        let err = session.get_content_stream("d1").unwrap_err();
        assert!(matches!(err, CmisError::ContentRetrieval { .. }));
        assert_eq!(err.operation(), Some("getContentStream"));
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.body(), Some(&b"boom"[..]));
    }

    #[test]
    fn failed_content_lookup_keeps_lookup_body() {
        let transport = ScriptedTransport::new(vec![ok(SERVICE_DOC), status(403, "denied")]);
        let mut session = session(&transport);
        let err = session.get_content_stream("d1").unwrap_err();
        assert!(matches!(err, CmisError::ContentRetrieval { status: Some(403), .. }));
        assert_eq!(err.body(), Some(&b"denied"[..]));
    }

    #[test]
    fn timeout_mid_operation_is_surfaced() {
        let transport = ScriptedTransport::new(vec![ok(SERVICE_DOC), Err(TransportError::Timeout)]);
        let mut session = session(&transport);
        let err = session.get_object("d1").unwrap_err();
        assert!(matches!(err, CmisError::TransportTimeout { .. }));
        assert_eq!(session.last_exchange().unwrap().url, BASE);
    }

    #[test]
    fn type_definition_falls_back_to_type_template() {
        let type_entry = r#"<entry xmlns="http://www.w3.org/2005/Atom"
       xmlns:cmis="http://docs.oasis-open.org/ns/cmis/core/200908/"
       xmlns:cmisra="http://docs.oasis-open.org/ns/cmis/restatom/200908/">
  <cmisra:type><cmis:id>cmis:folder</cmis:id><cmis:baseId>cmis:folder</cmis:baseId></cmisra:type>
</entry>"#;
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            ok(entry("f1", "Demo", "cmis:folder")),
            ok(type_entry),
        ]);
        let mut session = session(&transport);
        let definition = session.get_object_type_definition("f1").unwrap();
        assert_eq!(definition.id, "cmis:folder");
        assert_eq!(transport.request(2).url, "http://repo/types?id=cmis%3Afolder");
    }

    #[test]
    fn folder_without_up_link_has_no_parent() {
        let transport = ScriptedTransport::new(vec![
            ok(SERVICE_DOC),
            ok(entry("root", "Company Home", "cmis:folder")),
        ]);
        let mut session = session(&transport);
        let err = session.get_folder_parent("root").unwrap_err();
        assert!(matches!(err, CmisError::InvalidArgument(_)));
    }
}
