//! Minimal owned XML tree on top of `quick-xml`.
//!
//! Every document the archive carries is small enough to hold in memory, so
//! the readers parse once into an [`XmlElement`] tree and then walk it by
//! local element name. Documents are treated as untrusted: a `<!DOCTYPE>`
//! is rejected outright, and `quick-xml` never resolves external entities.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::errors::AuditError;

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    /// Qualified name as written in the source, including any prefix.
    pub qualified: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

impl XmlElement {
    pub fn new(name: &str) -> Self {
        Self { qualified: name.to_string(), ..Default::default() }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    /// Element name without namespace prefix.
    pub fn name(&self) -> &str {
        local(&self.qualified)
    }

    /// Attribute value by local name; namespace declarations are never matched.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| !k.starts_with("xmlns") && local(k) == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| local(k) == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |e| e.name() == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name() == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.children.iter_mut().find_map(|c| match c {
            XmlNode::Element(e) if e.name() == name => Some(e),
            _ => None,
        })
    }

    /// `name` qualified with this element's namespace prefix, if any.
    pub fn prefixed(&self, name: &str) -> String {
        match self.qualified.split_once(':') {
            Some((prefix, _)) => format!("{}:{}", prefix, name),
            None => name.to_string(),
        }
    }

    pub fn children_named_mut<'a>(&'a mut self, name: &'a str) -> impl Iterator<Item = &'a mut XmlElement> + 'a {
        self.children.iter_mut().filter_map(move |c| match c {
            XmlNode::Element(e) if e.name() == name => Some(e),
            _ => None,
        })
    }

    /// Mutable child by name, appending an empty one if missing.
    pub fn child_or_insert(&mut self, name: &str) -> &mut XmlElement {
        let existing = self
            .children
            .iter()
            .position(|c| matches!(c, XmlNode::Element(e) if e.name() == name));
        let idx = match existing {
            Some(idx) => idx,
            None => {
                let qualified = self.prefixed(name);
                self.children.push(XmlNode::Element(XmlElement::new(&qualified)));
                self.children.len() - 1
            }
        };
        match &mut self.children[idx] {
            XmlNode::Element(e) => e,
            _ => unreachable!("index always points at an element"),
        }
    }

    pub fn push(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    /// Follow a chain of child names.
    pub fn path(&self, names: &[&str]) -> Option<&XmlElement> {
        names.iter().try_fold(self, |el, name| el.child(name))
    }

    /// Concatenated direct text and CDATA content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for c in &self.children {
            match c {
                XmlNode::Text(t) | XmlNode::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(|c| c.text())
    }

    /// Trimmed child text, `None` when missing or blank.
    pub fn child_value(&self, name: &str) -> Option<String> {
        self.child_text(name)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.retain(|c| !matches!(c, XmlNode::Text(_) | XmlNode::CData(_)));
        self.children.push(XmlNode::Text(text.into()));
    }

    /// Children serialized back to markup, text left unescaped.
    ///
    /// Used for rule descriptions, which may carry their template markup
    /// either escaped as text or as real child elements.
    pub fn inner_markup(&self) -> String {
        let mut out = String::new();
        for c in &self.children {
            match c {
                XmlNode::Text(t) | XmlNode::CData(t) => out.push_str(t),
                XmlNode::Element(e) => e.write_into(&mut out),
                XmlNode::Comment(_) => {}
            }
        }
        out
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n");
        self.write_into(&mut out);
        out.push('\n');
        out
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.qualified);
        for (k, v) in &self.attributes {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&quick_xml::escape::escape(v.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for c in &self.children {
            match c {
                XmlNode::Element(e) => e.write_into(out),
                XmlNode::Text(t) => out.push_str(&quick_xml::escape::escape(t.as_str())),
                XmlNode::CData(t) => {
                    out.push_str("<![CDATA[");
                    out.push_str(t);
                    out.push_str("]]>");
                }
                XmlNode::Comment(t) => {
                    out.push_str("<!--");
                    out.push_str(t);
                    out.push_str("-->");
                }
            }
        }
        out.push_str("</");
        out.push_str(&self.qualified);
        out.push('>');
    }
}

fn start_element(start: &BytesStart<'_>) -> Result<XmlElement, AuditError> {
    let qualified = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement { qualified, attributes, children: Vec::new() })
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, el: XmlElement) -> Result<(), AuditError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(el));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(el);
            Ok(())
        }
        None => Err(AuditError::parse("document has more than one root element")),
    }
}

/// Parse a complete document into its root element.
pub fn parse_document(bytes: &[u8]) -> Result<XmlElement, AuditError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => stack.push(start_element(&e)?),
            Event::Empty(e) => {
                let el = start_element(&e)?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| AuditError::parse("unbalanced closing tag"))?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let text = match t.unescape() {
                        Ok(s) => s.into_owned(),
                        Err(_) => String::from_utf8_lossy(&t).into_owned(),
                    };
                    top.children.push(XmlNode::Text(text));
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    top.children.push(XmlNode::CData(text));
                }
            }
            Event::Comment(c) => {
                if let Some(top) = stack.last_mut() {
                    top.children
                        .push(XmlNode::Comment(String::from_utf8_lossy(&c).into_owned()));
                }
            }
            Event::DocType(_) => {
                return Err(AuditError::parse("DOCTYPE declarations are not allowed"));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(AuditError::parse("document ended inside an open element"));
    }
    root.ok_or_else(|| AuditError::parse("document has no root element"))
}
