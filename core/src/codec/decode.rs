//! Decoders from AtomPub/CMISRA documents to the object model.

use std::collections::BTreeMap;

use super::tree::{self, Element, Ns};
use crate::error::{CmisError, Result};
use crate::types::{
    AtomContent, Cardinality, CmisObject, Link, ObjectList, Properties, PropertyDefinition,
    PropertyType, PropertyValue, TypeDefinition, Updatability,
};
use crate::workspace::{Collection, UriTemplate, Workspace};

/// Decodes an `atom:entry` document into an object.
///
/// The object holds exactly the properties the server sent; nothing is
/// required beyond the `atom:entry` root.
pub fn parse_entry(body: &[u8]) -> Result<CmisObject> {
    let root = tree::parse(body)?;
    if !root.is(Ns::Atom, "entry") {
        return Err(CmisError::decode(
            format!("expected atom:entry root, found <{}>", root.name),
            body,
        ));
    }
    entry_to_object(&root, body)
}

/// Decodes an `atom:feed` document, preserving entry order.
pub fn parse_feed(body: &[u8]) -> Result<ObjectList> {
    let root = tree::parse(body)?;
    if !root.is(Ns::Atom, "feed") {
        return Err(CmisError::decode(
            format!("expected atom:feed root, found <{}>", root.name),
            body,
        ));
    }

    let objects = root
        .children_named(Ns::Atom, "entry")
        .map(|entry| entry_to_object(entry, body))
        .collect::<Result<Vec<_>>>()?;

    let num_items = match root.child_text(Ns::Cmisra, "numItems") {
        Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| {
            CmisError::decode(format!("invalid cmisra:numItems {raw:?}: {e}"), body)
        })?),
        None => None,
    };
    let has_more_flag = root
        .child_text(Ns::Cmisra, "hasMoreItems")
        .is_some_and(|raw| raw.trim() == "true");
    let has_next_link = links_of(&root).iter().any(|link| link.rel == "next");

    Ok(ObjectList {
        objects,
        has_more_items: has_more_flag || has_next_link,
        num_items,
    })
}

/// Decodes a type definition, either an `atom:entry` wrapping `cmisra:type`
/// or a bare `cmisra:type` document.
pub fn parse_type_definition(body: &[u8]) -> Result<TypeDefinition> {
    let root = tree::parse(body)?;
    let type_element = if root.is(Ns::Atom, "entry") {
        root.child(Ns::Cmisra, "type")
    } else if root.is(Ns::Cmisra, "type") {
        Some(&root)
    } else {
        None
    };
    let type_element = type_element
        .ok_or_else(|| CmisError::decode("expected atom:entry with cmisra:type", body))?;

    let text = |name: &str| {
        type_element
            .child_text(Ns::Cmis, name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let flag = |name: &str| text(name).is_some_and(|v| v == "true");

    let id = text("id").ok_or_else(|| CmisError::decode("type definition has no cmis:id", body))?;
    let base_id = text("baseId")
        .ok_or_else(|| CmisError::decode(format!("type {id} has no cmis:baseId"), body))?;

    let mut property_definitions = BTreeMap::new();
    for element in &type_element.children {
        if element.ns == Ns::Cmis
            && element.name.starts_with("property")
            && element.name.ends_with("Definition")
        {
            let definition = property_definition(element, body)?;
            property_definitions.insert(definition.id.clone(), definition);
        }
    }

    Ok(TypeDefinition {
        parent_id: text("parentId"),
        display_name: text("displayName"),
        query_name: text("queryName"),
        description: text("description"),
        creatable: flag("creatable"),
        fileable: flag("fileable"),
        queryable: flag("queryable"),
        id,
        base_id,
        property_definitions,
    })
}

/// Decodes the first workspace of an `app:service` document.
pub fn parse_service_document(body: &[u8]) -> Result<Workspace> {
    let root = tree::parse(body)?;
    if !root.is(Ns::App, "service") {
        return Err(CmisError::decode(
            format!("expected app:service root, found <{}>", root.name),
            body,
        ));
    }
    let workspace = root.child(Ns::App, "workspace").ok_or_else(|| {
        CmisError::RepositoryDiscovery("service document lists no workspace".to_string())
    })?;

    let mut collections = BTreeMap::new();
    for collection in workspace.children_named(Ns::App, "collection") {
        let (Some(href), Some(kind)) = (
            collection.attr("href"),
            collection.child_text(Ns::Cmisra, "collectionType"),
        ) else {
            continue;
        };
        let accepts = collection
            .children_named(Ns::App, "accept")
            .map(|a| a.text.trim().to_string())
            .collect();
        collections.insert(
            kind.trim().to_string(),
            Collection {
                href: href.to_string(),
                accepts,
            },
        );
    }

    let mut uri_templates = BTreeMap::new();
    for element in workspace.children_named(Ns::Cmisra, "uritemplate") {
        let (Some(template), Some(kind)) = (
            element.child_text(Ns::Cmisra, "template"),
            element.child_text(Ns::Cmisra, "type"),
        ) else {
            continue;
        };
        let kind = kind.trim().to_string();
        uri_templates.insert(
            kind.clone(),
            UriTemplate {
                template: template.trim().to_string(),
                template_type: kind,
                media_type: element
                    .child_text(Ns::Cmisra, "mediatype")
                    .map(|m| m.trim().to_string()),
            },
        );
    }

    let info = workspace.child(Ns::Cmisra, "repositoryInfo");
    let info_text = |name: &str| {
        info.and_then(|i| i.child_text(Ns::Cmis, name))
            .map(|v| v.trim().to_string())
    };
    let capabilities: BTreeMap<String, String> = info
        .and_then(|i| i.child(Ns::Cmis, "capabilities"))
        .map(|caps| {
            caps.children
                .iter()
                .map(|c| {
                    let key = c.name.strip_prefix("capability").unwrap_or(&c.name);
                    (key.to_string(), c.text.trim().to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Workspace {
        repository_id: info_text("repositoryId"),
        repository_name: info_text("repositoryName"),
        root_folder_id: info_text("rootFolderId"),
        collections,
        uri_templates,
        capabilities,
        links: links_of(workspace),
    })
}

fn entry_to_object(entry: &Element, body: &[u8]) -> Result<CmisObject> {
    let properties = match entry
        .child(Ns::Cmisra, "object")
        .and_then(|object| object.child(Ns::Cmis, "properties"))
    {
        Some(element) => properties_of(element, body)?,
        None => Properties::new(),
    };

    let content = entry.child(Ns::Atom, "content").map(|c| AtomContent {
        src: c.attr("src").map(str::to_string),
        media_type: c.attr("type").map(str::to_string),
        inline: (c.attr("src").is_none() && !c.text.is_empty()).then(|| c.text.clone()),
    });

    Ok(CmisObject {
        properties,
        links: links_of(entry),
        content,
        title: entry.child_text(Ns::Atom, "title").map(str::to_string),
    })
}

fn properties_of(element: &Element, body: &[u8]) -> Result<Properties> {
    let mut properties = Properties::new();
    for property in &element.children {
        let key = ["propertyDefinitionId", "queryName", "localName", "displayName"]
            .iter()
            .find_map(|attr| property.attr(attr))
            .unwrap_or(property.name.as_str())
            .to_string();

        let property_type = if property.ns == Ns::Cmis {
            PropertyType::from_element(&property.name)
        } else {
            PropertyType::Other(property.name.clone())
        };

        let mut raw: Vec<String> = property
            .children
            .iter()
            .filter(|c| c.name == "value")
            .map(|c| c.text.clone())
            .collect();
        if raw.is_empty() && property.children.is_empty() && !property.text.trim().is_empty() {
            raw.push(property.text.clone());
        }

        let value = PropertyValue::from_lexical(&property_type, raw)
            .map_err(|reason| CmisError::decode(format!("property {key}: {reason}"), body))?;
        properties.insert(key, value);
    }
    Ok(properties)
}

fn property_definition(element: &Element, body: &[u8]) -> Result<PropertyDefinition> {
    let text = |name: &str| {
        element
            .child_text(Ns::Cmis, name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let id = text("id")
        .ok_or_else(|| CmisError::decode("property definition has no cmis:id", body))?
        .to_string();

    let property_type = match text("propertyType") {
        Some(name) => PropertyType::from_definition(name),
        None => {
            let element_name = element.name.trim_end_matches("Definition");
            PropertyType::from_element(element_name)
        }
    };
    let cardinality = match text("cardinality") {
        Some(raw) => Cardinality::parse(raw).ok_or_else(|| {
            CmisError::decode(format!("property {id}: unknown cardinality {raw:?}"), body)
        })?,
        None => Cardinality::Single,
    };
    let updatability = match text("updatability") {
        Some(raw) => Updatability::parse(raw).ok_or_else(|| {
            CmisError::decode(format!("property {id}: unknown updatability {raw:?}"), body)
        })?,
        None => Updatability::ReadOnly,
    };

    Ok(PropertyDefinition {
        required: text("required") == Some("true"),
        display_name: text("displayName").map(str::to_string),
        query_name: text("queryName").map(str::to_string),
        id,
        property_type,
        cardinality,
        updatability,
    })
}

fn links_of(element: &Element) -> Vec<Link> {
    element
        .children_named(Ns::Atom, "link")
        .filter_map(|link| {
            Some(Link {
                rel: link.attr("rel").unwrap_or("alternate").to_string(),
                href: link.attr("href")?.to_string(),
                media_type: link.attr("type").map(str::to_string),
            })
        })
        .collect()
}
