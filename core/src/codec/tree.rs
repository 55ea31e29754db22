//! Minimal namespace-resolved element tree.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use super::{APP_NS, ATOM_NS, CMISRA_NS, CMIS_NS};
use crate::error::{CmisError, Result};

/// The namespaces the decoders care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ns {
    Atom,
    App,
    Cmis,
    Cmisra,
    Other,
}

impl Ns {
    fn resolve(result: &ResolveResult<'_>) -> Self {
        let ResolveResult::Bound(Namespace(uri)) = result else {
            return Self::Other;
        };
        match *uri {
            uri if uri == ATOM_NS.as_bytes() => Self::Atom,
            uri if uri == APP_NS.as_bytes() => Self::App,
            uri if uri == CMIS_NS.as_bytes() => Self::Cmis,
            uri if uri == CMISRA_NS.as_bytes() => Self::Cmisra,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub ns: Ns,
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn is(&self, ns: Ns, name: &str) -> bool {
        self.ns == ns && self.name == name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, ns: Ns, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(ns, name))
    }

    pub fn children_named<'a>(
        &'a self,
        ns: Ns,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is(ns, name))
    }

    /// Text of a direct child, if present.
    pub fn child_text(&self, ns: Ns, name: &str) -> Option<&str> {
        self.child(ns, name).map(|c| c.text.as_str())
    }
}

fn open(ns: Ns, start: &BytesStart<'_>, body: &[u8]) -> Result<Element> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr =
            attr.map_err(|e| CmisError::decode(format!("bad attribute on <{name}>: {e}"), body))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| CmisError::decode(format!("bad attribute value on <{name}>: {e}"), body))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        ns,
        name,
        attrs,
        text: String::new(),
        children: Vec::new(),
    })
}

/// Reads a whole document into an element tree.
pub(crate) fn parse(body: &[u8]) -> Result<Element> {
    let mut reader = NsReader::from_reader(body);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| CmisError::decode(format!("malformed XML: {e}"), body))?;
        let ns = Ns::resolve(&resolved);
        match event {
            Event::Start(start) => {
                let element = open(ns, &start, body)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open(ns, &start, body)?;
                attach(&mut stack, &mut root, element, body)?;
            }
            Event::End(_) => {
                let Some(mut element) = stack.pop() else {
                    return Err(CmisError::decode("unbalanced end tag", body));
                };
                // Indentation between child elements is not content.
                if !element.children.is_empty() && element.text.trim().is_empty() {
                    element.text.clear();
                }
                attach(&mut stack, &mut root, element, body)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| CmisError::decode(format!("bad text: {e}"), body))?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(CmisError::decode("document ended inside an element", body));
    }
    root.ok_or_else(|| CmisError::decode("document has no root element", body))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
    body: &[u8],
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => {
            return Err(CmisError::decode(
                format!("second root element <{}>", element.name),
                body,
            ));
        }
        None => *root = Some(element),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_prefixes_to_namespaces() {
        let xml = br#"<?xml version="1.0"?>
<a:entry xmlns:a="http://www.w3.org/2005/Atom" xmlns:c="http://docs.oasis-open.org/ns/cmis/core/200908/">
  <a:title>Demo &amp; more</a:title>
  <c:value>1</c:value>
  <a:link rel="self" href="http://h/e?a=1&amp;b=2"/>
</a:entry>"#;
        let root = parse(xml).unwrap();
        assert!(root.is(Ns::Atom, "entry"));
        assert!(root.text.is_empty());
        assert_eq!(root.child_text(Ns::Atom, "title"), Some("Demo & more"));
        assert_eq!(root.child_text(Ns::Cmis, "value"), Some("1"));
        let link = root.child(Ns::Atom, "link").unwrap();
        assert_eq!(link.attr("href"), Some("http://h/e?a=1&b=2"));
    }

    #[test]
    fn default_namespace_applies_to_unprefixed_elements() {
        let xml = br#"<feed xmlns="http://www.w3.org/2005/Atom"><entry/></feed>"#;
        let root = parse(xml).unwrap();
        assert!(root.is(Ns::Atom, "feed"));
        assert_eq!(root.children_named(Ns::Atom, "entry").count(), 1);
    }

    #[test]
    fn malformed_document_is_a_decode_error() {
        let err = parse(b"<entry><title></entry>").unwrap_err();
        assert!(matches!(err, CmisError::ProtocolDecode { .. }));
        let err = parse(b"").unwrap_err();
        assert!(matches!(err, CmisError::ProtocolDecode { .. }));
    }

    #[test]
    fn second_root_element_is_rejected() {
        let xml = br#"<entry xmlns="http://www.w3.org/2005/Atom"/><entry xmlns="urn:x"/>"#;
        let err = parse(xml).unwrap_err();
        assert!(matches!(err, CmisError::ProtocolDecode { .. }), "{err:?}");
        assert_eq!(err.body(), Some(&xml[..]));
    }
}
