//! AtomPub rendering and request-body parsing for the mock repository.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{Content, Kind, Object, Property, Repository};

pub const ENTRY_TYPE: &str = "application/atom+xml;type=entry";
pub const FEED_TYPE: &str = "application/atom+xml;type=feed";
pub const SERVICE_TYPE: &str = "application/atomsvc+xml";
pub const QUERY_TYPE: &str = "application/cmisquery+xml";
pub const TREE_TYPE: &str = "application/cmistree+xml";
pub const FOLDER_TREE_REL: &str = "http://docs.oasis-open.org/ns/cmis/link/200908/foldertree";

const NAMESPACES: &str = concat!(
    r#"xmlns:atom="http://www.w3.org/2005/Atom" "#,
    r#"xmlns:app="http://www.w3.org/2007/app" "#,
    r#"xmlns:cmis="http://docs.oasis-open.org/ns/cmis/core/200908/" "#,
    r#"xmlns:cmisra="http://docs.oasis-open.org/ns/cmis/restatom/200908/""#,
);
const DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

fn esc(raw: &str) -> Cow<'_, str> {
    escape(raw)
}

pub fn service_document(base: &str) -> String {
    format!(
        r#"{DECL}
<app:service {NAMESPACES}>
  <app:workspace>
    <atom:title>Mock Repository</atom:title>
    <cmisra:repositoryInfo>
      <cmis:repositoryId>mock</cmis:repositoryId>
      <cmis:repositoryName>Mock Repository</cmis:repositoryName>
      <cmis:rootFolderId>{root}</cmis:rootFolderId>
      <cmis:cmisVersionSupported>1.0</cmis:cmisVersionSupported>
      <cmis:capabilities>
        <cmis:capabilityQuery>bothcombined</cmis:capabilityQuery>
        <cmis:capabilityMultifiling>false</cmis:capabilityMultifiling>
        <cmis:capabilityGetDescendants>true</cmis:capabilityGetDescendants>
      </cmis:capabilities>
    </cmisra:repositoryInfo>
    <app:collection href="{base}/children/{root}">
      <atom:title>Root Collection</atom:title>
      <cmisra:collectionType>root</cmisra:collectionType>
      <app:accept>{ENTRY_TYPE}</app:accept>
    </app:collection>
    <app:collection href="{base}/query">
      <atom:title>Query Collection</atom:title>
      <cmisra:collectionType>query</cmisra:collectionType>
      <app:accept>{QUERY_TYPE}</app:accept>
    </app:collection>
    <app:collection href="{base}/types">
      <atom:title>Types Collection</atom:title>
      <cmisra:collectionType>types</cmisra:collectionType>
    </app:collection>
    <cmisra:uritemplate>
      <cmisra:template>{base}/objects?id={{id}}&amp;filter={{filter}}&amp;includeAllowableActions={{includeAllowableActions}}</cmisra:template>
      <cmisra:type>objectbyid</cmisra:type>
      <cmisra:mediatype>{ENTRY_TYPE}</cmisra:mediatype>
    </cmisra:uritemplate>
    <cmisra:uritemplate>
      <cmisra:template>{base}/path?path={{path}}&amp;filter={{filter}}</cmisra:template>
      <cmisra:type>objectbypath</cmisra:type>
      <cmisra:mediatype>{ENTRY_TYPE}</cmisra:mediatype>
    </cmisra:uritemplate>
    <cmisra:uritemplate>
      <cmisra:template>{base}/types?id={{id}}</cmisra:template>
      <cmisra:type>typebyid</cmisra:type>
      <cmisra:mediatype>{ENTRY_TYPE}</cmisra:mediatype>
    </cmisra:uritemplate>
  </app:workspace>
</app:service>"#,
        root = crate::ROOT_ID,
    )
}

fn properties_xml(properties: &[Property], key_attr: &str) -> String {
    let mut out = String::from("<cmis:properties>");
    for property in properties {
        out.push_str(&format!(
            r#"<cmis:{element} {key_attr}="{id}">"#,
            element = property.element,
            id = esc(&property.id),
        ));
        for value in &property.values {
            out.push_str(&format!("<cmis:value>{}</cmis:value>", esc(value)));
        }
        out.push_str(&format!("</cmis:{}>", property.element));
    }
    out.push_str("</cmis:properties>");
    out
}

fn link(rel: &str, href: &str, media_type: Option<&str>) -> String {
    match media_type {
        Some(media_type) => {
            format!(r#"<atom:link rel="{rel}" type="{media_type}" href="{}"/>"#, esc(href))
        }
        None => format!(r#"<atom:link rel="{rel}" href="{}"/>"#, esc(href)),
    }
}

fn entry_xml(base: &str, repo: &Repository, object: &Object) -> String {
    let id = &object.id;
    let mut links = vec![
        link("self", &format!("{base}/entries/{id}"), Some(ENTRY_TYPE)),
        link("edit", &format!("{base}/entries/{id}"), Some(ENTRY_TYPE)),
        link(
            "describedby",
            &format!("{base}/types?id={}", object.kind.type_id()),
            Some(ENTRY_TYPE),
        ),
    ];
    let mut content = String::new();
    match object.kind {
        Kind::Folder => {
            links.push(link("down", &format!("{base}/children/{id}"), Some(FEED_TYPE)));
            links.push(link("down", &format!("{base}/tree/{id}"), Some(TREE_TYPE)));
            links.push(link(FOLDER_TREE_REL, &format!("{base}/tree/{id}"), Some(FEED_TYPE)));
            if object.parent.is_some() {
                links.push(link("up", &format!("{base}/parent/{id}"), Some(ENTRY_TYPE)));
            }
        }
        Kind::Document => {
            let href = format!("{base}/content/{id}");
            links.push(link("edit-media", &href, None));
            if let Some(stream) = &object.content {
                content = format!(
                    r#"<atom:content type="{}" src="{}"/>"#,
                    esc(&stream.media_type),
                    esc(&href)
                );
            }
        }
    }

    format!(
        r#"<atom:entry {NAMESPACES}><atom:id>urn:uuid:{id}</atom:id><atom:title>{title}</atom:title><atom:author><atom:name>mock</atom:name></atom:author>{links}{content}<cmisra:object>{properties}</cmisra:object></atom:entry>"#,
        title = esc(&object.name),
        links = links.concat(),
        properties = properties_xml(&repo.properties_of(object), "propertyDefinitionId"),
    )
}

pub fn entry_document(base: &str, repo: &Repository, object: &Object) -> String {
    format!("{DECL}{}", entry_xml(base, repo, object))
}

/// Paging metadata shared by children and query feeds.
pub struct Page {
    pub total: usize,
    pub has_more: bool,
    pub next: Option<String>,
}

fn feed_head(title: &str, page: &Page) -> String {
    let next = page
        .next
        .as_deref()
        .map(|href| link("next", href, Some(FEED_TYPE)))
        .unwrap_or_default();
    format!(
        r#"{DECL}<atom:feed {NAMESPACES}><atom:title>{}</atom:title>{next}<cmisra:numItems>{}</cmisra:numItems><cmisra:hasMoreItems>{}</cmisra:hasMoreItems>"#,
        esc(title),
        page.total,
        page.has_more,
    )
}

pub fn children_feed(
    base: &str,
    repo: &Repository,
    folder: &Object,
    children: &[&Object],
    page: &Page,
) -> String {
    let mut out = feed_head(&folder.name, page);
    out.push_str(&link("via", &format!("{base}/entries/{}", folder.id), Some(ENTRY_TYPE)));
    for child in children {
        out.push_str(&entry_xml(base, repo, child));
    }
    out.push_str("</atom:feed>");
    out
}

pub fn query_feed(rows: &[Vec<Property>], page: &Page) -> String {
    let mut out = feed_head("query", page);
    for (index, row) in rows.iter().enumerate() {
        out.push_str(&format!(
            r#"<atom:entry><atom:id>urn:row:{index}</atom:id><atom:title>row {index}</atom:title><cmisra:object>{}</cmisra:object></atom:entry>"#,
            properties_xml(row, "queryName"),
        ));
    }
    out.push_str("</atom:feed>");
    out
}

pub fn type_entry(kind: Kind) -> String {
    let (id, display) = match kind {
        Kind::Folder => ("cmis:folder", "Folder"),
        Kind::Document => ("cmis:document", "Document"),
    };
    let mut definitions = vec![
        ("cmis:name", "String", "string", "readwrite", true),
        ("cmis:objectId", "Id", "id", "readonly", false),
        ("cmis:baseTypeId", "Id", "id", "readonly", false),
        ("cmis:objectTypeId", "Id", "id", "oncreate", true),
    ];
    match kind {
        Kind::Folder => {
            definitions.push(("cmis:parentId", "Id", "id", "readonly", false));
            definitions.push(("cmis:path", "String", "string", "readonly", false));
        }
        Kind::Document => {
            definitions.push(("cmis:contentStreamLength", "Integer", "integer", "readonly", false));
            definitions.push(("cmis:contentStreamMimeType", "String", "string", "readonly", false));
        }
    }

    let mut body = String::new();
    for (property, element, property_type, updatability, required) in definitions {
        body.push_str(&format!(
            "<cmis:property{element}Definition><cmis:id>{property}</cmis:id><cmis:queryName>{property}</cmis:queryName><cmis:propertyType>{property_type}</cmis:propertyType><cmis:cardinality>single</cmis:cardinality><cmis:updatability>{updatability}</cmis:updatability><cmis:required>{required}</cmis:required></cmis:property{element}Definition>"
        ));
    }

    format!(
        r#"{DECL}<atom:entry {NAMESPACES}><atom:id>urn:type:{id}</atom:id><atom:title>{display}</atom:title><cmisra:type><cmis:id>{id}</cmis:id><cmis:localName>{id}</cmis:localName><cmis:queryName>{id}</cmis:queryName><cmis:displayName>{display}</cmis:displayName><cmis:baseId>{id}</cmis:baseId><cmis:description>{display} type</cmis:description><cmis:creatable>true</cmis:creatable><cmis:fileable>true</cmis:fileable><cmis:queryable>true</cmis:queryable>{body}</cmisra:type></atom:entry>"#
    )
}

/// The parts of a posted `atom:entry` the repository acts on.
#[derive(Debug, Default)]
pub struct PostedEntry {
    pub title: Option<String>,
    pub properties: Vec<Property>,
    pub content: Option<Content>,
}

impl PostedEntry {
    pub fn value(&self, id: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.id == id)
            .and_then(|p| p.values.first())
            .map(String::as_str)
    }
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

fn property_start(start: &BytesStart<'_>, element: String) -> Result<Property, String> {
    let id = start
        .try_get_attribute("propertyDefinitionId")
        .map_err(|e| format!("bad attribute on {element}: {e}"))?
        .ok_or_else(|| format!("{element} without propertyDefinitionId"))?
        .unescape_value()
        .map_err(|e| format!("bad attribute on {element}: {e}"))?
        .into_owned();
    Ok(Property {
        id,
        element,
        values: Vec::new(),
    })
}

fn is_property(name: &str, parent: Option<&String>) -> bool {
    name.starts_with("property") && parent.is_some_and(|p| p == "properties")
}

pub fn parse_entry(body: &[u8]) -> Result<PostedEntry, String> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut entry = PostedEntry::default();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<Property> = None;
    let mut media_type: Option<String> = None;
    let mut encoded = String::new();
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("malformed entry: {e}"))?;
        match event {
            Event::Start(start) => {
                let name = local_name(&start);
                if !saw_root {
                    if name != "entry" {
                        return Err(format!("expected entry root, found {name}"));
                    }
                    saw_root = true;
                }
                if is_property(&name, path.last()) {
                    current = Some(property_start(&start, name.clone())?);
                }
                path.push(name);
            }
            Event::Empty(start) => {
                let name = local_name(&start);
                if !saw_root {
                    return Err(format!("expected entry root, found empty {name}"));
                }
                if is_property(&name, path.last()) {
                    entry.properties.push(property_start(&start, name)?);
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| format!("bad text: {e}"))?
                    .into_owned();
                match path.last().map(String::as_str) {
                    Some("value") => {
                        if let Some(property) = current.as_mut() {
                            property.values.push(text);
                        }
                    }
                    Some("title") if path.len() == 2 => entry.title = Some(text),
                    Some("mediatype") => media_type = Some(text),
                    Some("base64") => encoded.push_str(&text),
                    _ => {}
                }
            }
            Event::End(_) => {
                if let Some(name) = path.pop() {
                    if is_property(&name, path.last()) {
                        if let Some(property) = current.take() {
                            entry.properties.push(property);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err("empty entry document".to_string());
    }
    if let Some(media_type) = media_type {
        let compact: String = encoded.split_whitespace().collect();
        let bytes = STANDARD
            .decode(compact)
            .map_err(|e| format!("invalid base64 content: {e}"))?;
        entry.content = Some(Content { media_type, bytes });
    }
    Ok(entry)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits a `multipart/related` body into the entry part and the content part.
pub fn split_multipart(
    content_type: &str,
    body: &[u8],
) -> Result<(Vec<u8>, Option<Content>), String> {
    let boundary = content_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("boundary="))
        .map(|value| value.trim_matches('"'))
        .next()
        .ok_or("multipart body without boundary")?;
    let delimiter = format!("--{boundary}");

    let mut parts = Vec::new();
    let mut rest = body;
    while let Some(start) = find(rest, delimiter.as_bytes()) {
        rest = &rest[start + delimiter.len()..];
        if rest.starts_with(b"--") {
            break;
        }
        let end = find(rest, delimiter.as_bytes()).ok_or("unterminated multipart body")?;
        let part = rest[..end]
            .strip_prefix(b"\r\n")
            .unwrap_or(&rest[..end]);
        let part = part.strip_suffix(b"\r\n").unwrap_or(part);
        parts.push(part);
        rest = &rest[end..];
    }

    let mut parts = parts.into_iter().map(|part| {
        let split = find(part, b"\r\n\r\n").ok_or("multipart part without headers")?;
        let headers = String::from_utf8_lossy(&part[..split]).into_owned();
        Ok::<_, String>((headers, part[split + 4..].to_vec()))
    });

    let (_, entry) = parts.next().ok_or("multipart body without parts")??;
    let content = match parts.next() {
        Some(part) => {
            let (headers, bytes) = part?;
            let media_type = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.trim()
                        .eq_ignore_ascii_case("content-type")
                        .then(|| value.trim().to_string())
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());
            Some(Content { media_type, bytes })
        }
        None => None,
    };
    Ok((entry, content))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSTED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<atom:entry xmlns:atom="http://www.w3.org/2005/Atom"
    xmlns:cmis="http://docs.oasis-open.org/ns/cmis/core/200908/"
    xmlns:cmisra="http://docs.oasis-open.org/ns/cmis/restatom/200908/">
  <atom:title>TextFile.txt</atom:title>
  <cmisra:content>
    <cmisra:mediatype>text/plain</cmisra:mediatype>
    <cmisra:base64>VEhJUyBJUyBBIE5FVyBET0NVTUVOVA==</cmisra:base64>
  </cmisra:content>
  <cmisra:object><cmis:properties>
    <cmis:propertyId propertyDefinitionId="cmis:objectTypeId"><cmis:value>cmis:document</cmis:value></cmis:propertyId>
    <cmis:propertyString propertyDefinitionId="cmis:name"><cmis:value>TextFile.txt</cmis:value></cmis:propertyString>
    <cmis:propertyString propertyDefinitionId="my:tags"><cmis:value>a</cmis:value><cmis:value>b</cmis:value></cmis:propertyString>
  </cmis:properties></cmisra:object>
</atom:entry>"#;

    #[test]
    fn posted_entry_yields_properties_and_content() {
        let entry = parse_entry(POSTED.as_bytes()).unwrap();
        assert_eq!(entry.title.as_deref(), Some("TextFile.txt"));
        assert_eq!(entry.value("cmis:objectTypeId"), Some("cmis:document"));
        assert_eq!(entry.value("cmis:name"), Some("TextFile.txt"));
        let tags = entry.properties.iter().find(|p| p.id == "my:tags").unwrap();
        assert_eq!(tags.values, ["a", "b"]);
        assert_eq!(tags.element, "propertyString");
        let content = entry.content.unwrap();
        assert_eq!(content.media_type, "text/plain");
        assert_eq!(content.bytes, b"THIS IS A NEW DOCUMENT");
    }

    #[test]
    fn non_entry_root_is_rejected() {
        let err = parse_entry(b"<feed/>").unwrap_err();
        assert!(err.contains("expected entry root"));
    }

    #[test]
    fn multipart_parts_are_split() {
        let body = b"--b1\r\nContent-Type: application/atom+xml;type=entry\r\n\r\n<entry/>\r\n--b1\r\nContent-Type: text/plain\r\nContent-ID: <content>\r\n\r\nhello\r\n--b1--\r\n";
        let (entry, content) =
            split_multipart(r#"multipart/related; type="x"; boundary="b1""#, body).unwrap();
        assert_eq!(entry, b"<entry/>");
        let content = content.unwrap();
        assert_eq!(content.media_type, "text/plain");
        assert_eq!(content.bytes, b"hello");
    }
}
