//! Object model returned by session operations.
//!
//! # Design
//! CMIS properties are a dynamically typed bag. Each value is a closed sum
//! type over the CMIS property types and always holds a list, since any
//! property may be multi-valued; single-valued properties hold one element.
//! Properties keep the order the server sent them in, which query results
//! rely on. Objects carry no reference back to the session that produced
//! them: a fresh fetch yields a fresh value.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const OBJECT_ID: &str = "cmis:objectId";
pub const NAME: &str = "cmis:name";
pub const BASE_TYPE_ID: &str = "cmis:baseTypeId";
pub const OBJECT_TYPE_ID: &str = "cmis:objectTypeId";
pub const CONTENT_STREAM_MIME_TYPE: &str = "cmis:contentStreamMimeType";

/// Property id to value, in document order.
pub type Properties = IndexMap<String, PropertyValue>;

/// The data type of a CMIS property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    String,
    Id,
    Integer,
    Decimal,
    Boolean,
    DateTime,
    Uri,
    Html,
    /// A property element this client does not know, kept by element name.
    Other(String),
}

impl PropertyType {
    /// Maps a CMISRA element local name such as `propertyString`.
    pub fn from_element(local_name: &str) -> Self {
        match local_name {
            "propertyString" => Self::String,
            "propertyId" => Self::Id,
            "propertyInteger" => Self::Integer,
            "propertyDecimal" => Self::Decimal,
            "propertyBoolean" => Self::Boolean,
            "propertyDateTime" => Self::DateTime,
            "propertyUri" => Self::Uri,
            "propertyHtml" => Self::Html,
            other => Self::Other(other.to_string()),
        }
    }

    /// Maps the value of a `cmis:propertyType` element in a type definition.
    pub fn from_definition(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "id" => Self::Id,
            "integer" => Self::Integer,
            "decimal" => Self::Decimal,
            "boolean" => Self::Boolean,
            "datetime" => Self::DateTime,
            "uri" => Self::Uri,
            "html" => Self::Html,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn element_name(&self) -> &str {
        match self {
            Self::String => "propertyString",
            Self::Id => "propertyId",
            Self::Integer => "propertyInteger",
            Self::Decimal => "propertyDecimal",
            Self::Boolean => "propertyBoolean",
            Self::DateTime => "propertyDateTime",
            Self::Uri => "propertyUri",
            Self::Html => "propertyHtml",
            Self::Other(element) => element,
        }
    }
}

/// A typed, possibly multi-valued property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(Vec<String>),
    Id(Vec<String>),
    Integer(Vec<i64>),
    Decimal(Vec<f64>),
    Boolean(Vec<bool>),
    DateTime(Vec<DateTime<FixedOffset>>),
    Uri(Vec<String>),
    Html(Vec<String>),
    /// Values of an unrecognized property element, kept verbatim.
    Opaque { element: String, values: Vec<String> },
}

impl PropertyValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(vec![value.into()])
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::Id(vec![value.into()])
    }

    pub fn integer(value: i64) -> Self {
        Self::Integer(vec![value])
    }

    pub fn decimal(value: f64) -> Self {
        Self::Decimal(vec![value])
    }

    pub fn boolean(value: bool) -> Self {
        Self::Boolean(vec![value])
    }

    pub fn datetime(value: DateTime<FixedOffset>) -> Self {
        Self::DateTime(vec![value])
    }

    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::String(_) => PropertyType::String,
            Self::Id(_) => PropertyType::Id,
            Self::Integer(_) => PropertyType::Integer,
            Self::Decimal(_) => PropertyType::Decimal,
            Self::Boolean(_) => PropertyType::Boolean,
            Self::DateTime(_) => PropertyType::DateTime,
            Self::Uri(_) => PropertyType::Uri,
            Self::Html(_) => PropertyType::Html,
            Self::Opaque { element, .. } => PropertyType::Other(element.clone()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::String(v) | Self::Id(v) | Self::Uri(v) | Self::Html(v) => v.len(),
            Self::Opaque { values, .. } => values.len(),
            Self::Integer(v) => v.len(),
            Self::Decimal(v) => v.len(),
            Self::Boolean(v) => v.len(),
            Self::DateTime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First value of a textual property (string, id, uri, html, opaque).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Id(v) | Self::Uri(v) | Self::Html(v) => {
                v.first().map(String::as_str)
            }
            Self::Opaque { values, .. } => values.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Decimal(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Self::DateTime(v) => v.first(),
            _ => None,
        }
    }

    /// Lexical (wire) form of every value.
    pub fn lexical_values(&self) -> Vec<String> {
        match self {
            Self::String(v) | Self::Id(v) | Self::Uri(v) | Self::Html(v) => v.clone(),
            Self::Opaque { values, .. } => values.clone(),
            Self::Integer(v) => v.iter().map(i64::to_string).collect(),
            Self::Decimal(v) => v.iter().map(f64::to_string).collect(),
            Self::Boolean(v) => v.iter().map(bool::to_string).collect(),
            Self::DateTime(v) => v
                .iter()
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                .collect(),
        }
    }

    /// Builds a value of `property_type` from wire strings.
    pub fn from_lexical(
        property_type: &PropertyType,
        raw: Vec<String>,
    ) -> Result<Self, String> {
        let value = match property_type {
            PropertyType::String => Self::String(raw),
            PropertyType::Id => Self::Id(raw),
            PropertyType::Uri => Self::Uri(raw),
            PropertyType::Html => Self::Html(raw),
            PropertyType::Other(element) => Self::Opaque {
                element: element.clone(),
                values: raw,
            },
            PropertyType::Integer => Self::Integer(
                raw.iter()
                    .map(|s| {
                        s.trim()
                            .parse::<i64>()
                            .map_err(|e| format!("invalid integer {s:?}: {e}"))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            PropertyType::Decimal => Self::Decimal(
                raw.iter()
                    .map(|s| {
                        s.trim()
                            .parse::<f64>()
                            .map_err(|e| format!("invalid decimal {s:?}: {e}"))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            PropertyType::Boolean => Self::Boolean(
                raw.iter()
                    .map(|s| match s.trim() {
                        "true" | "1" => Ok(true),
                        "false" | "0" => Ok(false),
                        other => Err(format!("invalid boolean {other:?}")),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            PropertyType::DateTime => Self::DateTime(
                raw.iter()
                    .map(|s| parse_datetime(s.trim()))
                    .collect::<Result<_, _>>()?,
            ),
        };
        Ok(value)
    }
}

/// Parses an `xsd:dateTime`; values without a zone are taken as UTC.
fn parse_datetime(raw: &str) -> Result<DateTime<FixedOffset>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc().fixed_offset())
        .map_err(|e| format!("invalid datetime {raw:?}: {e}"))
}

/// The four CMIS base types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseType {
    Document,
    Folder,
    Relationship,
    Policy,
}

impl BaseType {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "cmis:document" => Some(Self::Document),
            "cmis:folder" => Some(Self::Folder),
            "cmis:relationship" => Some(Self::Relationship),
            "cmis:policy" => Some(Self::Policy),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "cmis:document",
            Self::Folder => "cmis:folder",
            Self::Relationship => "cmis:relationship",
            Self::Policy => "cmis:policy",
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An `atom:link` on an entry or feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// The `atom:content` element of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AtomContent {
    pub src: Option<String>,
    pub media_type: Option<String>,
    /// Inline text when the server embeds content instead of linking it.
    pub inline: Option<String>,
}

/// A repository object decoded from an Atom entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CmisObject {
    pub properties: Properties,
    pub links: Vec<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<AtomContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl CmisObject {
    pub fn property(&self, id: &str) -> Option<&PropertyValue> {
        self.properties.get(id)
    }

    fn property_str(&self, id: &str) -> Option<&str> {
        self.property(id).and_then(PropertyValue::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.property_str(OBJECT_ID)
    }

    pub fn name(&self) -> Option<&str> {
        self.property_str(NAME)
    }

    pub fn base_type_id(&self) -> Option<&str> {
        self.property_str(BASE_TYPE_ID)
    }

    pub fn object_type_id(&self) -> Option<&str> {
        self.property_str(OBJECT_TYPE_ID)
    }

    pub fn base_type(&self) -> Option<BaseType> {
        self.base_type_id().and_then(BaseType::from_id)
    }

    pub fn is_folder(&self) -> bool {
        self.base_type() == Some(BaseType::Folder)
    }

    pub fn is_document(&self) -> bool {
        self.base_type() == Some(BaseType::Document)
    }

    /// Href of the first link with the given relation.
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == rel)
            .map(|link| link.href.as_str())
    }

    /// Href of the first link with the given relation whose media type
    /// starts with `media_prefix`, falling back to any link with that relation.
    pub fn link_typed(&self, rel: &str, media_prefix: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|link| {
                link.rel == rel
                    && link
                        .media_type
                        .as_deref()
                        .is_some_and(|t| t.starts_with(media_prefix))
            })
            .map(|link| link.href.as_str())
            .or_else(|| self.link(rel))
    }
}

/// A page of objects decoded from an Atom feed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectList {
    pub objects: Vec<CmisObject>,
    /// Advisory: the server has more results past this page.
    pub has_more_items: bool,
    /// Total number of results, when the server reports it.
    pub num_items: Option<u64>,
}

impl ObjectList {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CmisObject> {
        self.objects.iter()
    }
}

impl IntoIterator for ObjectList {
    type Item = CmisObject;
    type IntoIter = std::vec::IntoIter<CmisObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.into_iter()
    }
}

impl<'a> IntoIterator for &'a ObjectList {
    type Item = &'a CmisObject;
    type IntoIter = std::slice::Iter<'a, CmisObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.iter()
    }
}

/// Page window for listings and queries, sent as `maxItems`/`skipCount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Paging {
    pub max_items: Option<u32>,
    pub skip_count: Option<u32>,
}

impl Paging {
    pub fn new(max_items: u32, skip_count: u32) -> Self {
        Self {
            max_items: Some(max_items),
            skip_count: Some(skip_count),
        }
    }

    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(max) = self.max_items {
            pairs.push(("maxItems", max.to_string()));
        }
        if let Some(skip) = self.skip_count {
            pairs.push(("skipCount", skip.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    Single,
    Multi,
}

impl Cardinality {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "single" => Some(Self::Single),
            "multi" => Some(Self::Multi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Updatability {
    ReadOnly,
    ReadWrite,
    WhenCheckedOut,
    OnCreate,
}

impl Updatability {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "readonly" => Some(Self::ReadOnly),
            "readwrite" => Some(Self::ReadWrite),
            "whencheckedout" => Some(Self::WhenCheckedOut),
            "oncreate" => Some(Self::OnCreate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub id: String,
    pub property_type: PropertyType,
    pub cardinality: Cardinality,
    pub updatability: Updatability,
    pub required: bool,
    pub display_name: Option<String>,
    pub query_name: Option<String>,
}

/// Why a property set does not fit a type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    Unknown(String),
    WrongType {
        id: String,
        expected: PropertyType,
        found: PropertyType,
    },
    NotMultiValued(String),
    ReadOnly(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub id: String,
    pub base_id: String,
    pub parent_id: Option<String>,
    pub display_name: Option<String>,
    pub query_name: Option<String>,
    pub description: Option<String>,
    pub creatable: bool,
    pub fileable: bool,
    pub queryable: bool,
    pub property_definitions: BTreeMap<String, PropertyDefinition>,
}

impl TypeDefinition {
    pub fn property_definition(&self, id: &str) -> Option<&PropertyDefinition> {
        self.property_definitions.get(id)
    }

    /// Checks a property set intended for creating an object of this type.
    ///
    /// Required properties are not enforced; that is the repository's call.
    pub fn validate(&self, properties: &Properties) -> Result<(), Vec<PropertyViolation>> {
        let mut violations = Vec::new();
        for (id, value) in properties {
            let Some(definition) = self.property_definition(id) else {
                violations.push(PropertyViolation::Unknown(id.clone()));
                continue;
            };
            let found = value.property_type();
            if found != definition.property_type {
                violations.push(PropertyViolation::WrongType {
                    id: id.clone(),
                    expected: definition.property_type.clone(),
                    found,
                });
            }
            if definition.cardinality == Cardinality::Single && value.len() > 1 {
                violations.push(PropertyViolation::NotMultiValued(id.clone()));
            }
            if definition.updatability == Updatability::ReadOnly && id != OBJECT_TYPE_ID {
                violations.push(PropertyViolation::ReadOnly(id.clone()));
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Raw content of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStream {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl ContentStream {
    pub fn new(bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder() -> CmisObject {
        let mut properties = Properties::new();
        properties.insert(OBJECT_ID.to_string(), PropertyValue::id("f1"));
        properties.insert(NAME.to_string(), PropertyValue::string("Demo"));
        properties.insert(BASE_TYPE_ID.to_string(), PropertyValue::id("cmis:folder"));
        CmisObject {
            properties,
            links: vec![
                Link {
                    rel: "down".to_string(),
                    href: "http://host/tree/f1".to_string(),
                    media_type: Some("application/cmistree+xml".to_string()),
                },
                Link {
                    rel: "down".to_string(),
                    href: "http://host/children/f1".to_string(),
                    media_type: Some("application/atom+xml;type=feed".to_string()),
                },
            ],
            ..CmisObject::default()
        }
    }

    #[test]
    fn accessors_read_core_properties() {
        let obj = folder();
        assert_eq!(obj.id(), Some("f1"));
        assert_eq!(obj.name(), Some("Demo"));
        assert_eq!(obj.base_type(), Some(BaseType::Folder));
        assert!(obj.is_folder());
        assert!(!obj.is_document());
    }

    #[test]
    fn link_typed_prefers_matching_media_type() {
        let obj = folder();
        assert_eq!(
            obj.link_typed("down", "application/atom+xml"),
            Some("http://host/children/f1")
        );
        assert_eq!(obj.link("down"), Some("http://host/tree/f1"));
        assert_eq!(obj.link_typed("up", "application/atom+xml"), None);
    }

    #[test]
    fn lexical_values_parse_back() {
        let raw = vec!["42".to_string(), " -7 ".to_string()];
        let value = PropertyValue::from_lexical(&PropertyType::Integer, raw).unwrap();
        assert_eq!(value, PropertyValue::Integer(vec![42, -7]));
        assert_eq!(value.lexical_values(), vec!["42", "-7"]);
    }

    #[test]
    fn invalid_integer_is_reported() {
        let err = PropertyValue::from_lexical(&PropertyType::Integer, vec!["x".to_string()])
            .unwrap_err();
        assert!(err.contains("invalid integer"));
    }

    #[test]
    fn zoneless_datetime_is_utc() {
        let value = PropertyValue::from_lexical(
            &PropertyType::DateTime,
            vec!["2010-01-27T12:34:56.000".to_string()],
        )
        .unwrap();
        let dt = value.as_datetime().unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 0);
        assert_eq!(dt.to_rfc3339_opts(SecondsFormat::Secs, true), "2010-01-27T12:34:56Z");
    }

    #[test]
    fn validate_flags_unknown_and_mistyped_properties() {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            NAME.to_string(),
            PropertyDefinition {
                id: NAME.to_string(),
                property_type: PropertyType::String,
                cardinality: Cardinality::Single,
                updatability: Updatability::ReadWrite,
                required: true,
                display_name: None,
                query_name: Some(NAME.to_string()),
            },
        );
        let definition = TypeDefinition {
            id: "cmis:folder".to_string(),
            base_id: "cmis:folder".to_string(),
            parent_id: None,
            display_name: None,
            query_name: None,
            description: None,
            creatable: true,
            fileable: true,
            queryable: true,
            property_definitions: definitions,
        };

        let mut ok = Properties::new();
        ok.insert(NAME.to_string(), PropertyValue::string("x"));
        assert!(definition.validate(&ok).is_ok());

        let mut bad = Properties::new();
        bad.insert(NAME.to_string(), PropertyValue::integer(1));
        bad.insert("my:extra".to_string(), PropertyValue::string("y"));
        let violations = definition.validate(&bad).unwrap_err();
        assert_eq!(violations.len(), 2);
        assert!(violations.contains(&PropertyViolation::Unknown("my:extra".to_string())));
    }
}
