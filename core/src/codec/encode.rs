//! Encoders for request bodies: entries, multipart uploads and queries.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{APP_NS, ATOM_ENTRY_TYPE, ATOM_NS, CMISRA_NS, CMIS_NS};
use crate::error::{CmisError, Result};
use crate::types::{Paging, Properties, PropertyValue, NAME, OBJECT_TYPE_ID};

/// Content to embed in an entry as a `cmisra:content` element.
#[derive(Debug, Clone, Copy)]
pub struct EntryContent<'a> {
    pub bytes: &'a [u8],
    pub media_type: &'a str,
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| CmisError::Encode(e.to_string()))
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

fn property_element(
    writer: &mut Writer<Vec<u8>>,
    id: &str,
    value: &PropertyValue,
) -> Result<()> {
    if let PropertyValue::Decimal(values) = value {
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(CmisError::Encode(format!(
                "property {id}: {bad} is not a valid decimal"
            )));
        }
    }
    let name = format!("cmis:{}", value.property_type().element_name());
    let mut start = BytesStart::new(name.as_str());
    start.push_attribute(("propertyDefinitionId", id));
    emit(writer, Event::Start(start))?;
    for lexical in value.lexical_values() {
        text_element(writer, "cmis:value", &lexical)?;
    }
    emit(writer, Event::End(BytesEnd::new(name.as_str())))
}

/// Builds an `atom:entry` carrying exactly the supplied properties.
///
/// `object_type_id`, when given and not already present in `properties`, is
/// emitted as `cmis:objectTypeId`. No other property is added.
pub fn build_entry(
    object_type_id: Option<&str>,
    properties: &Properties,
    content: Option<EntryContent<'_>>,
) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut entry = BytesStart::new("atom:entry");
    entry.push_attribute(("xmlns:atom", ATOM_NS));
    entry.push_attribute(("xmlns:app", APP_NS));
    entry.push_attribute(("xmlns:cmis", CMIS_NS));
    entry.push_attribute(("xmlns:cmisra", CMISRA_NS));
    emit(&mut writer, Event::Start(entry))?;

    if let Some(title) = properties.get(NAME).and_then(PropertyValue::as_str) {
        text_element(&mut writer, "atom:title", title)?;
    }

    if let Some(content) = content {
        emit(&mut writer, Event::Start(BytesStart::new("cmisra:content")))?;
        text_element(&mut writer, "cmisra:mediatype", content.media_type)?;
        text_element(&mut writer, "cmisra:base64", &STANDARD.encode(content.bytes))?;
        emit(&mut writer, Event::End(BytesEnd::new("cmisra:content")))?;
    }

    emit(&mut writer, Event::Start(BytesStart::new("cmisra:object")))?;
    emit(&mut writer, Event::Start(BytesStart::new("cmis:properties")))?;
    if let Some(type_id) = object_type_id {
        if !properties.contains_key(OBJECT_TYPE_ID) {
            property_element(&mut writer, OBJECT_TYPE_ID, &PropertyValue::id(type_id))?;
        }
    }
    for (id, value) in properties {
        property_element(&mut writer, id, value)?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("cmis:properties")))?;
    emit(&mut writer, Event::End(BytesEnd::new("cmisra:object")))?;
    emit(&mut writer, Event::End(BytesEnd::new("atom:entry")))?;

    Ok(writer.into_inner())
}

/// Builds a `cmis:query` document.
pub fn build_query(statement: &str, search_all_versions: bool, paging: Paging) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    let mut query = BytesStart::new("cmis:query");
    query.push_attribute(("xmlns:cmis", CMIS_NS));
    emit(&mut writer, Event::Start(query))?;
    text_element(&mut writer, "cmis:statement", statement)?;
    text_element(
        &mut writer,
        "cmis:searchAllVersions",
        if search_all_versions { "true" } else { "false" },
    )?;
    if let Some(max) = paging.max_items {
        text_element(&mut writer, "cmis:maxItems", &max.to_string())?;
    }
    if let Some(skip) = paging.skip_count {
        text_element(&mut writer, "cmis:skipCount", &skip.to_string())?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("cmis:query")))?;
    Ok(writer.into_inner())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Wraps an entry and raw content in a `multipart/related` body.
///
/// Returns the `Content-Type` header value (with boundary) and the body.
pub fn build_multipart(entry: &[u8], content: EntryContent<'_>) -> (String, Vec<u8>) {
    let boundary = (0u32..)
        .map(|n| format!("cmis-related-boundary-{n}"))
        .find(|b| !contains(entry, b.as_bytes()) && !contains(content.bytes, b.as_bytes()))
        .unwrap_or_default();

    let mut body = Vec::with_capacity(entry.len() + content.bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {ATOM_ENTRY_TYPE}\r\n\r\n").as_bytes());
    body.extend_from_slice(entry);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n", content.media_type).as_bytes());
    body.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n");
    body.extend_from_slice(b"Content-ID: <content>\r\n\r\n");
    body.extend_from_slice(content.bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let content_type =
        format!("multipart/related; type=\"{ATOM_ENTRY_TYPE}\"; boundary=\"{boundary}\"");
    (content_type, body)
}
