//! In-memory CMIS repository speaking the AtomPub binding.
//!
//! Serves a service document at `/cmis` and the collections, URI templates
//! and links it advertises. Every href is built from the request's `Host`
//! header, so the same router works behind any bound port.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub mod atom;
pub mod query;

use atom::{Page, PostedEntry};

pub const ROOT_ID: &str = "root";
pub const ROOT_NAME: &str = "Company Home";

const OBJECT_ID: &str = "cmis:objectId";
const NAME: &str = "cmis:name";
const OBJECT_TYPE_ID: &str = "cmis:objectTypeId";
const SYSTEM_PROPERTIES: [&str; 3] = [OBJECT_ID, NAME, OBJECT_TYPE_ID];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Folder,
    Document,
}

impl Kind {
    pub fn from_type_id(type_id: &str) -> Option<Self> {
        match type_id {
            "cmis:folder" => Some(Self::Folder),
            "cmis:document" => Some(Self::Document),
            _ => None,
        }
    }

    pub fn type_id(self) -> &'static str {
        match self {
            Self::Folder => "cmis:folder",
            Self::Document => "cmis:document",
        }
    }
}

/// A property as it appears on the wire: element name plus lexical values.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub id: String,
    /// Local element name, e.g. `propertyString`.
    pub element: String,
    pub values: Vec<String>,
}

impl Property {
    fn new(id: &str, element: &str, value: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            element: element.to_string(),
            values: vec![value.into()],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Content {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Object {
    pub id: String,
    /// Creation order; children and query results are listed by it.
    pub seq: u64,
    pub name: String,
    pub kind: Kind,
    pub parent: Option<String>,
    pub extra: Vec<Property>,
    pub content: Option<Content>,
}

/// Error response: a status code and a plain-text diagnostic body.
#[derive(Debug)]
pub struct Failure {
    pub status: StatusCode,
    pub message: String,
}

impl Failure {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}

#[derive(Debug)]
pub struct Repository {
    objects: HashMap<String, Object>,
    next_seq: u64,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    /// A repository holding only the root folder.
    pub fn new() -> Self {
        let root = Object {
            id: ROOT_ID.to_string(),
            seq: 0,
            name: ROOT_NAME.to_string(),
            kind: Kind::Folder,
            parent: None,
            extra: Vec::new(),
            content: None,
        };
        Self {
            objects: HashMap::from([(ROOT_ID.to_string(), root)]),
            next_seq: 1,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Object> {
        self.objects.get(id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    fn require(&self, id: &str) -> Result<&Object, Failure> {
        self.get(id)
            .ok_or_else(|| Failure::not_found(format!("object {id} does not exist")))
    }

    fn require_folder(&self, id: &str) -> Result<&Object, Failure> {
        let object = self.require(id)?;
        if object.kind != Kind::Folder {
            return Err(Failure::bad_request(format!("object {id} is not a folder")));
        }
        Ok(object)
    }

    /// Children of a folder in creation order.
    pub fn children(&self, folder_id: &str) -> Vec<&Object> {
        let mut children: Vec<&Object> = self
            .objects
            .values()
            .filter(|o| o.parent.as_deref() == Some(folder_id))
            .collect();
        children.sort_by_key(|o| o.seq);
        children
    }

    fn child_named(&self, folder_id: &str, name: &str) -> Option<&Object> {
        self.objects
            .values()
            .find(|o| o.parent.as_deref() == Some(folder_id) && o.name == name)
    }

    pub fn by_path(&self, path: &str) -> Option<&Object> {
        let mut current = self.get(ROOT_ID)?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self.child_named(&current.id, segment)?;
        }
        Some(current)
    }

    pub fn path_of(&self, object: &Object) -> String {
        let mut names = Vec::new();
        let mut cursor = Some(object);
        while let Some(current) = cursor {
            if current.parent.is_none() {
                break;
            }
            names.push(current.name.as_str());
            cursor = current.parent.as_deref().and_then(|id| self.get(id));
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    /// Whether `id` lies strictly below `ancestor`.
    pub fn is_descendant(&self, id: &str, ancestor: &str) -> bool {
        let mut cursor = self.get(id).and_then(|o| o.parent.as_deref());
        while let Some(parent) = cursor {
            if parent == ancestor {
                return true;
            }
            cursor = self.get(parent).and_then(|o| o.parent.as_deref());
        }
        false
    }

    /// Every property the repository reports for an object, system ones first.
    pub fn properties_of(&self, object: &Object) -> Vec<Property> {
        let mut properties = vec![
            Property::new(OBJECT_ID, "propertyId", object.id.clone()),
            Property::new(NAME, "propertyString", object.name.clone()),
            Property::new("cmis:baseTypeId", "propertyId", object.kind.type_id()),
            Property::new(OBJECT_TYPE_ID, "propertyId", object.kind.type_id()),
            Property::new("cmis:createdBy", "propertyString", "admin"),
        ];
        match object.kind {
            Kind::Folder => {
                if let Some(parent) = &object.parent {
                    properties.push(Property::new("cmis:parentId", "propertyId", parent.clone()));
                }
                properties.push(Property::new("cmis:path", "propertyString", self.path_of(object)));
            }
            Kind::Document => {
                if let Some(content) = &object.content {
                    properties.push(Property::new(
                        "cmis:contentStreamLength",
                        "propertyInteger",
                        content.bytes.len().to_string(),
                    ));
                    properties.push(Property::new(
                        "cmis:contentStreamMimeType",
                        "propertyString",
                        content.media_type.clone(),
                    ));
                }
            }
        }
        properties.extend(object.extra.iter().cloned());
        properties
    }

    fn ensure_unique(
        &self,
        folder_id: &str,
        name: &str,
        except: Option<&str>,
    ) -> Result<(), Failure> {
        match self.child_named(folder_id, name) {
            Some(existing) if Some(existing.id.as_str()) != except => Err(Failure::conflict(
                format!("an object named {name} already exists in folder {folder_id}"),
            )),
            _ => Ok(()),
        }
    }

    pub fn create(
        &mut self,
        parent_id: &str,
        posted: PostedEntry,
        attached: Option<Content>,
    ) -> Result<String, Failure> {
        self.require_folder(parent_id)?;
        let type_id = posted
            .value(OBJECT_TYPE_ID)
            .ok_or_else(|| Failure::bad_request("cmis:objectTypeId is required"))?;
        let kind = Kind::from_type_id(type_id)
            .ok_or_else(|| Failure::bad_request(format!("unknown object type {type_id}")))?;
        let name = posted
            .value(NAME)
            .or(posted.title.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Failure::bad_request("cmis:name is required"))?
            .to_string();
        self.ensure_unique(parent_id, &name, None)?;

        let content = match kind {
            Kind::Document => attached.or(posted.content),
            Kind::Folder => None,
        };
        let extra = posted
            .properties
            .into_iter()
            .filter(|p| !SYSTEM_PROPERTIES.contains(&p.id.as_str()))
            .collect();

        let id = Uuid::new_v4().to_string();
        let object = Object {
            id: id.clone(),
            seq: self.next_seq,
            name,
            kind,
            parent: Some(parent_id.to_string()),
            extra,
            content,
        };
        self.next_seq += 1;
        tracing::debug!(%id, name = %object.name, kind = ?object.kind, "created object");
        self.objects.insert(id.clone(), object);
        Ok(id)
    }

    pub fn move_object(
        &mut self,
        posted: &PostedEntry,
        target_id: &str,
        source_id: &str,
    ) -> Result<String, Failure> {
        let id = posted
            .value(OBJECT_ID)
            .ok_or_else(|| Failure::bad_request("cmis:objectId is required to move"))?
            .to_string();
        self.require_folder(target_id)?;
        let object = self.require(&id)?;
        if object.parent.as_deref() != Some(source_id) {
            return Err(Failure::bad_request(format!(
                "object {id} is not in source folder {source_id}"
            )));
        }
        if object.kind == Kind::Folder && (target_id == id || self.is_descendant(target_id, &id)) {
            return Err(Failure::bad_request("cannot move a folder below itself"));
        }
        let name = object.name.clone();
        self.ensure_unique(target_id, &name, Some(&id))?;

        if let Some(object) = self.objects.get_mut(&id) {
            object.parent = Some(target_id.to_string());
        }
        tracing::debug!(%id, from = source_id, to = target_id, "moved object");
        Ok(id)
    }

    pub fn update(&mut self, id: &str, posted: PostedEntry) -> Result<(), Failure> {
        let object = self.require(id)?;
        if let (Some(name), Some(parent)) = (posted.value(NAME), object.parent.clone()) {
            self.ensure_unique(&parent, name, Some(id))?;
        }
        let Some(object) = self.objects.get_mut(id) else {
            return Err(Failure::not_found(format!("object {id} does not exist")));
        };
        for property in posted.properties {
            if property.id == NAME {
                if let Some(name) = property.values.into_iter().next() {
                    object.name = name;
                }
            } else if !SYSTEM_PROPERTIES.contains(&property.id.as_str()) {
                match object.extra.iter_mut().find(|p| p.id == property.id) {
                    Some(existing) => *existing = property,
                    None => object.extra.push(property),
                }
            }
        }
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<(), Failure> {
        let object = self.require(id)?;
        if object.parent.is_none() {
            return Err(Failure::conflict("the root folder cannot be deleted"));
        }
        if object.kind == Kind::Folder && !self.children(id).is_empty() {
            return Err(Failure::conflict(format!("folder {id} is not empty")));
        }
        self.objects.remove(id);
        tracing::debug!(%id, "deleted object");
        Ok(())
    }

    pub fn delete_tree(&mut self, id: &str) -> Result<usize, Failure> {
        let folder = self.require_folder(id)?;
        if folder.parent.is_none() {
            return Err(Failure::conflict("the root folder cannot be deleted"));
        }
        let doomed: Vec<String> = self
            .objects
            .keys()
            .filter(|candidate| candidate.as_str() == id || self.is_descendant(candidate, id))
            .cloned()
            .collect();
        for key in &doomed {
            self.objects.remove(key);
        }
        tracing::debug!(%id, removed = doomed.len(), "deleted tree");
        Ok(doomed.len())
    }

    pub fn set_content(&mut self, id: &str, content: Content) -> Result<(), Failure> {
        let object = self
            .objects
            .get_mut(id)
            .ok_or_else(|| Failure::not_found(format!("object {id} does not exist")))?;
        if object.kind != Kind::Document {
            return Err(Failure::conflict(format!("object {id} cannot hold content")));
        }
        object.content = Some(content);
        Ok(())
    }
}

pub type Db = Arc<RwLock<Repository>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Repository::new()));
    Router::new()
        .route("/cmis", get(service))
        .route("/objects", get(object_by_id))
        .route("/path", get(object_by_path))
        .route("/types", get(type_by_id))
        .route("/entries/{id}", get(get_entry).put(update_entry).delete(delete_entry))
        .route("/children/{id}", get(list_children).post(post_child))
        .route("/tree/{id}", delete(delete_tree))
        .route("/content/{id}", get(get_content).put(put_content))
        .route("/parent/{id}", get(get_parent))
        .route("/query", post(run_query))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

#[derive(Deserialize)]
struct ById {
    id: String,
}

#[derive(Deserialize)]
struct ByPath {
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paging {
    skip_count: Option<usize>,
    max_items: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostTarget {
    source_folder_id: Option<String>,
}

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

fn xml(status: StatusCode, content_type: &'static str, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

fn entry_response(status: StatusCode, base: &str, repo: &Repository, object: &Object) -> Response {
    let location = format!("{base}/entries/{}", object.id);
    (
        status,
        [
            (header::CONTENT_TYPE, atom::ENTRY_TYPE.to_string()),
            (header::LOCATION, location),
        ],
        atom::entry_document(base, repo, object),
    )
        .into_response()
}

fn page<T>(items: Vec<T>, skip: usize, max: Option<usize>) -> (Vec<T>, usize, bool) {
    let total = items.len();
    let window: Vec<T> = items
        .into_iter()
        .skip(skip)
        .take(max.unwrap_or(usize::MAX))
        .collect();
    let has_more = skip + window.len() < total;
    (window, total, has_more)
}

async fn service(headers: HeaderMap) -> Response {
    xml(
        StatusCode::OK,
        atom::SERVICE_TYPE,
        atom::service_document(&base_url(&headers)),
    )
}

async fn object_by_id(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(ById { id }): Query<ById>,
) -> Result<Response, Failure> {
    let repo = db.read().await;
    let object = repo.require(&id)?;
    Ok(entry_response(StatusCode::OK, &base_url(&headers), &repo, object))
}

async fn object_by_path(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(ByPath { path }): Query<ByPath>,
) -> Result<Response, Failure> {
    let repo = db.read().await;
    let object = repo
        .by_path(&path)
        .ok_or_else(|| Failure::not_found(format!("nothing at path {path}")))?;
    Ok(entry_response(StatusCode::OK, &base_url(&headers), &repo, object))
}

async fn type_by_id(Query(ById { id }): Query<ById>) -> Result<Response, Failure> {
    let kind = Kind::from_type_id(&id)
        .ok_or_else(|| Failure::not_found(format!("type {id} does not exist")))?;
    Ok(xml(StatusCode::OK, atom::ENTRY_TYPE, atom::type_entry(kind)))
}

async fn get_entry(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Failure> {
    let repo = db.read().await;
    let object = repo.require(&id)?;
    Ok(entry_response(StatusCode::OK, &base_url(&headers), &repo, object))
}

async fn update_entry(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, Failure> {
    let posted = atom::parse_entry(&body).map_err(Failure::bad_request)?;
    let mut repo = db.write().await;
    repo.update(&id, posted)?;
    let object = repo.require(&id)?;
    Ok(entry_response(StatusCode::OK, &base_url(&headers), &repo, object))
}

async fn delete_entry(State(db): State<Db>, Path(id): Path<String>) -> Result<StatusCode, Failure> {
    db.write().await.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_tree(State(db): State<Db>, Path(id): Path<String>) -> Result<StatusCode, Failure> {
    db.write().await.delete_tree(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_children(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(paging): Query<Paging>,
) -> Result<Response, Failure> {
    let (skip, max) = (paging.skip_count.unwrap_or(0), paging.max_items);
    let base = base_url(&headers);
    let repo = db.read().await;
    let folder = repo.require_folder(&id)?;
    let (children, total, has_more) = page(repo.children(&id), skip, max);
    let next = has_more.then(|| {
        let max = max.map(|m| format!("&maxItems={m}")).unwrap_or_default();
        format!("{base}/children/{id}?skipCount={}{max}", skip + children.len())
    });
    let feed = atom::children_feed(
        &base,
        &repo,
        folder,
        &children,
        &Page {
            total,
            has_more,
            next,
        },
    );
    Ok(xml(StatusCode::OK, atom::FEED_TYPE, feed))
}

async fn post_child(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(folder_id): Path<String>,
    Query(target): Query<PostTarget>,
    body: Bytes,
) -> Result<Response, Failure> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let (entry, attached) = if content_type.starts_with("multipart/related") {
        atom::split_multipart(content_type, &body).map_err(Failure::bad_request)?
    } else {
        (body.to_vec(), None)
    };
    let posted = atom::parse_entry(&entry).map_err(Failure::bad_request)?;

    let mut repo = db.write().await;
    let id = match target.source_folder_id.as_deref() {
        Some(source) => repo.move_object(&posted, &folder_id, source)?,
        None => repo.create(&folder_id, posted, attached)?,
    };
    let object = repo.require(&id)?;
    Ok(entry_response(StatusCode::CREATED, &base_url(&headers), &repo, object))
}

async fn get_content(State(db): State<Db>, Path(id): Path<String>) -> Result<Response, Failure> {
    let repo = db.read().await;
    let content = repo
        .require(&id)?
        .content
        .clone()
        .ok_or_else(|| Failure::not_found(format!("object {id} has no content stream")))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content.media_type)],
        content.bytes,
    )
        .into_response())
}

async fn put_content(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, Failure> {
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    db.write().await.set_content(
        &id,
        Content {
            media_type,
            bytes: body.to_vec(),
        },
    )?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_parent(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Failure> {
    let repo = db.read().await;
    let parent_id = repo
        .require(&id)?
        .parent
        .clone()
        .ok_or_else(|| Failure::not_found(format!("object {id} has no parent")))?;
    let parent = repo.require(&parent_id)?;
    Ok(entry_response(StatusCode::OK, &base_url(&headers), &repo, parent))
}

async fn run_query(State(db): State<Db>, body: Bytes) -> Result<Response, Failure> {
    let request = query::parse_request(&body).map_err(Failure::bad_request)?;
    let statement = query::parse(&request.statement)
        .map_err(|reason| Failure::bad_request(format!("invalid CMISQL: {reason}")))?;
    let repo = db.read().await;
    let rows = query::evaluate(&repo, &statement);
    let (rows, total, has_more) = page(rows, request.skip_count, request.max_items);
    let feed = atom::query_feed(
        &rows,
        &Page {
            total,
            has_more,
            next: None,
        },
    );
    Ok(xml(StatusCode::OK, atom::FEED_TYPE, feed))
}
