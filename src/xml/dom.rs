// src/xml/dom.rs
//! Owned XML tree with resolved namespaces.
//!
//! The tree keeps the raw qualified names and namespace declarations exactly as
//! written, which canonicalization needs, and resolves every element and
//! attribute name to its namespace URI for lookups.

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use thiserror::Error;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// In-scope namespace bindings, keyed by prefix (`""` is the default namespace).
pub type NamespaceScope = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML syntax error: {0}")]
    Syntax(String),

    #[error("undeclared namespace prefix \"{0}\"")]
    UnboundPrefix(String),

    #[error("invalid document structure: {0}")]
    Structure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub qname: String,
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub qname: String,
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    /// `xmlns` / `xmlns:p` declarations made on this element, in source order.
    pub namespace_decls: Vec<(String, String)>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    /// True when the element has the given namespace URI and local name.
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of an attribute without a namespace.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.namespace.is_none() && attr.local_name == local_name)
            .map(|attr| attr.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    /// First child element with the given name.
    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&Element> {
        self.child_elements().find(|el| el.is(namespace, local_name))
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Bindings in scope for this element's content.
    /// `xml:*` attributes in effect on this element, given those of its ancestors.
    ///
    /// An attribute on the element replaces an inherited one of the same name.
    pub fn xml_attributes_with(&self, inherited: &[Attribute]) -> Vec<Attribute> {
        let mut attributes: Vec<Attribute> = inherited
            .iter()
            .filter(|inherited| !self.attributes.iter().any(|own| own.qname == inherited.qname))
            .cloned()
            .collect();
        attributes.extend(
            self.attributes
                .iter()
                .filter(|attr| attr.prefix.as_deref() == Some("xml"))
                .cloned(),
        );
        attributes
    }

    pub fn scope_with(&self, inherited: &NamespaceScope) -> NamespaceScope {
        let mut scope = inherited.clone();
        for (prefix, uri) in &self.namespace_decls {
            scope.insert(prefix.clone(), uri.clone());
        }
        scope
    }
}

fn collect_text(element: &Element, out: &mut String) {
    for node in &element.children {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(child) => collect_text(child, out),
            _ => {}
        }
    }
}

/// An element together with the namespace bindings inherited from its ancestors.
#[derive(Debug, Clone)]
pub struct Located<'a> {
    pub element: &'a Element,
    pub inherited: NamespaceScope,
    /// `xml:*` attributes in effect on the parent.
    pub inherited_xml: Vec<Attribute>,
}

impl<'a> Located<'a> {
    pub fn scope(&self) -> NamespaceScope {
        self.element.scope_with(&self.inherited)
    }

    pub fn child(&self, namespace: &str, local_name: &str) -> Option<Located<'a>> {
        self.element.child(namespace, local_name).map(|element| Located {
            element,
            inherited: self.scope(),
            inherited_xml: self.element.xml_attributes_with(&self.inherited_xml),
        })
    }
}

/// A parsed XML document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Comments and processing instructions before the root element.
    pub prolog: Vec<Node>,
    pub root: Element,
    /// Comments and processing instructions after the root element.
    pub epilog: Vec<Node>,
}

impl Document {
    /// Parses a complete XML document.
    ///
    /// Line endings are normalized to `\n` and whitespace characters inside
    /// attribute values are replaced by spaces, as an XML processor would.
    ///
    /// # Errors
    /// Returns [`XmlError`] for syntax errors, unbound prefixes, text outside
    /// the root element, or a missing/duplicated root element.
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        let normalized = input.replace("\r\n", "\n").replace('\r', "\n");
        let mut reader = Reader::from_str(&normalized);

        let mut builder = TreeBuilder::default();
        let mut scopes: Vec<NamespaceScope> = vec![NamespaceScope::new()];

        loop {
            let position = reader.buffer_position();
            let event = reader
                .read_event()
                .map_err(|e| XmlError::Syntax(format!("{} (near byte {})", e, position)))?;

            match event {
                Event::Start(start) => {
                    let parent_scope = scopes.last().cloned().unwrap_or_default();
                    let (element, scope) = open_element(&start, &parent_scope)?;
                    scopes.push(scope);
                    builder.open.push(element);
                }
                Event::Empty(start) => {
                    let parent_scope = scopes.last().cloned().unwrap_or_default();
                    let (element, _) = open_element(&start, &parent_scope)?;
                    builder.attach(Node::Element(element))?;
                }
                Event::End(_) => {
                    let element = builder
                        .open
                        .pop()
                        .ok_or_else(|| XmlError::Structure("unexpected end tag".to_string()))?;
                    scopes.pop();
                    builder.attach(Node::Element(element))?;
                }
                Event::Text(text) => {
                    let value = text
                        .unescape()
                        .map_err(|e| XmlError::Syntax(e.to_string()))?
                        .into_owned();
                    builder.text(value)?;
                }
                Event::CData(data) => {
                    let value = String::from_utf8(data.into_inner().into_owned())
                        .map_err(|e| XmlError::Syntax(e.to_string()))?;
                    builder.text(value)?;
                }
                Event::Comment(comment) => {
                    let value = String::from_utf8_lossy(&comment).into_owned();
                    builder.attach(Node::Comment(value))?;
                }
                Event::PI(pi) => {
                    let raw = String::from_utf8_lossy(&pi).into_owned();
                    let (target, data) = match raw.split_once(char::is_whitespace) {
                        Some((target, data)) => (target.to_string(), data.trim_start().to_string()),
                        None => (raw.clone(), String::new()),
                    };
                    builder.attach(Node::ProcessingInstruction { target, data })?;
                }
                Event::Decl(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        builder.finish()
    }

    /// The root element with an empty inherited scope.
    pub fn root(&self) -> Located<'_> {
        Located {
            element: &self.root,
            inherited: NamespaceScope::new(),
            inherited_xml: Vec::new(),
        }
    }

    /// All elements matching `predicate`, in document order.
    pub fn find_all<F>(&self, predicate: F) -> Vec<Located<'_>>
    where
        F: Fn(&Element) -> bool,
    {
        let mut found = Vec::new();
        find_in(&self.root, NamespaceScope::new(), Vec::new(), &predicate, &mut found);
        found
    }
}

fn find_in<'a, F>(
    element: &'a Element,
    inherited: NamespaceScope,
    inherited_xml: Vec<Attribute>,
    predicate: &F,
    found: &mut Vec<Located<'a>>,
) where
    F: Fn(&Element) -> bool,
{
    let scope = element.scope_with(&inherited);
    let xml_attributes = element.xml_attributes_with(&inherited_xml);
    if predicate(element) {
        found.push(Located {
            element,
            inherited,
            inherited_xml,
        });
    }
    for child in element.child_elements() {
        find_in(child, scope.clone(), xml_attributes.clone(), predicate, found);
    }
}

#[derive(Default)]
struct TreeBuilder {
    open: Vec<Element>,
    prolog: Vec<Node>,
    root: Option<Element>,
    epilog: Vec<Node>,
}

impl TreeBuilder {
    fn attach(&mut self, node: Node) -> Result<(), XmlError> {
        if let Some(parent) = self.open.last_mut() {
            parent.children.push(node);
            return Ok(());
        }
        match node {
            Node::Element(element) => {
                if self.root.is_some() {
                    return Err(XmlError::Structure("multiple root elements".to_string()));
                }
                self.root = Some(element);
            }
            Node::Text(_) => {}
            other if self.root.is_none() => self.prolog.push(other),
            other => self.epilog.push(other),
        }
        Ok(())
    }

    fn text(&mut self, value: String) -> Result<(), XmlError> {
        match self.open.last_mut() {
            Some(parent) => {
                if let Some(Node::Text(existing)) = parent.children.last_mut() {
                    existing.push_str(&value);
                } else if !value.is_empty() {
                    parent.children.push(Node::Text(value));
                }
                Ok(())
            }
            None if value.trim().is_empty() => Ok(()),
            None => Err(XmlError::Structure("text outside the root element".to_string())),
        }
    }

    fn finish(self) -> Result<Document, XmlError> {
        if let Some(unclosed) = self.open.last() {
            return Err(XmlError::Structure(format!("unclosed element <{}>", unclosed.qname)));
        }
        let root = self
            .root
            .ok_or_else(|| XmlError::Structure("document has no root element".to_string()))?;
        Ok(Document {
            prolog: self.prolog,
            root,
            epilog: self.epilog,
        })
    }
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, XmlError> {
    std::str::from_utf8(bytes).map_err(|e| XmlError::Syntax(e.to_string()))
}

fn open_element(
    start: &BytesStart<'_>,
    parent_scope: &NamespaceScope,
) -> Result<(Element, NamespaceScope), XmlError> {
    let qname = utf8(start.name().as_ref())?.to_string();
    let mut scope = parent_scope.clone();
    let mut namespace_decls = Vec::new();
    let mut plain = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Syntax(e.to_string()))?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let raw = utf8(&attr.value)?.replace(['\t', '\n', '\r'], " ");
        let value = unescape(&raw)
            .map_err(|e| XmlError::Syntax(e.to_string()))?
            .into_owned();

        if key == "xmlns" {
            scope.insert(String::new(), value.clone());
            namespace_decls.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            if value.is_empty() {
                return Err(XmlError::Structure(format!(
                    "prefix \"{}\" cannot be bound to an empty namespace",
                    prefix
                )));
            }
            scope.insert(prefix.to_string(), value.clone());
            namespace_decls.push((prefix.to_string(), value));
        } else {
            plain.push((key, value));
        }
    }

    let (prefix, local_name) = split_qname(&qname);
    let namespace = match prefix {
        None => scope.get("").filter(|uri| !uri.is_empty()).cloned(),
        Some("xml") => Some(XML_NS.to_string()),
        Some(p) => Some(
            scope
                .get(p)
                .cloned()
                .ok_or_else(|| XmlError::UnboundPrefix(p.to_string()))?,
        ),
    };

    let mut attributes = Vec::with_capacity(plain.len());
    for (key, value) in plain {
        let (attr_prefix, attr_local) = split_qname(&key);
        let attr_namespace = match attr_prefix {
            None => None,
            Some("xml") => Some(XML_NS.to_string()),
            Some(p) => Some(
                scope
                    .get(p)
                    .cloned()
                    .ok_or_else(|| XmlError::UnboundPrefix(p.to_string()))?,
            ),
        };
        attributes.push(Attribute {
            prefix: attr_prefix.map(str::to_string),
            local_name: attr_local.to_string(),
            namespace: attr_namespace,
            qname: key.clone(),
            value,
        });
    }

    let element = Element {
        prefix: prefix.map(str::to_string),
        local_name: local_name.to_string(),
        namespace,
        qname: qname.clone(),
        namespace_decls,
        attributes,
        children: Vec::new(),
    };
    Ok((element, scope))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

    #[test]
    fn test_parse_resolves_namespaces() {
        let doc = Document::parse(
            r#"<ts:token xmlns:ts="urn:ts" xmlns="urn:default" name="x">
                 <label lang="en">Hi &amp; bye</label>
                 <ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"/>
               </ts:token>"#,
        )
        .unwrap();

        assert!(doc.root.is("urn:ts", "token"));
        assert_eq!(doc.root.attribute("name"), Some("x"));
        let label = doc.root.child("urn:default", "label").unwrap();
        assert_eq!(label.text(), "Hi & bye");
        assert_eq!(label.attributes[0].namespace, None);

        let signatures = doc.find_all(|el| el.is(DSIG, "Signature"));
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].inherited.get("ts").map(String::as_str), Some("urn:ts"));
        assert_eq!(signatures[0].element.qname, "ds:Signature");
    }

    #[test]
    fn test_parse_keeps_prolog_and_normalizes_line_endings() {
        let doc = Document::parse("<?xml version=\"1.0\"?>\r\n<!--c-->\r\n<a b=\"x\ny\">1\r\n2</a>").unwrap();
        assert_eq!(doc.prolog, vec![Node::Comment("c".to_string())]);
        assert_eq!(doc.root.text(), "1\n2");
        assert_eq!(doc.root.attribute("b"), Some("x y"));
    }

    #[test]
    fn test_parse_rejects_unbound_prefix_and_bad_structure() {
        assert!(matches!(
            Document::parse("<p:a/>"),
            Err(XmlError::UnboundPrefix(prefix)) if prefix == "p"
        ));
        assert!(Document::parse("<a/><b/>").is_err());
        assert!(Document::parse("").is_err());
        assert!(Document::parse("<a><b></a>").is_err());
    }
}
