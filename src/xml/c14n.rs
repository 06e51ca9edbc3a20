// src/xml/c14n.rs
//! XML canonicalization (Canonical XML 1.0 and Exclusive XML Canonicalization).
//!
//! Works on the owned tree from [`crate::xml::dom`]. A single element can be
//! left out of the output, which is how the enveloped-signature transform is
//! applied.

use crate::xml::dom::{Attribute, Document, Element, Located, NamespaceScope, Node};
use std::ptr;

pub const C14N_10: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_10_WITH_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const C14N_11: &str = "http://www.w3.org/2006/12/xml-c14n11";
pub const C14N_11_WITH_COMMENTS: &str = "http://www.w3.org/2006/12/xml-c14n11#WithComments";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum C14nMethod {
    Inclusive {
        with_comments: bool,
    },
    Exclusive {
        with_comments: bool,
        /// Prefixes from `InclusiveNamespaces PrefixList` (`""` for `#default`).
        inclusive_prefixes: Vec<String>,
    },
}

impl C14nMethod {
    /// Looks up a canonicalization algorithm by its URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            C14N_10 | C14N_11 => Some(C14nMethod::Inclusive { with_comments: false }),
            C14N_10_WITH_COMMENTS | C14N_11_WITH_COMMENTS => {
                Some(C14nMethod::Inclusive { with_comments: true })
            }
            EXC_C14N => Some(C14nMethod::Exclusive {
                with_comments: false,
                inclusive_prefixes: Vec::new(),
            }),
            EXC_C14N_WITH_COMMENTS => Some(C14nMethod::Exclusive {
                with_comments: true,
                inclusive_prefixes: Vec::new(),
            }),
            _ => None,
        }
    }

    /// Sets the `InclusiveNamespaces PrefixList` of an exclusive method.
    pub fn with_prefix_list(self, prefix_list: &str) -> Self {
        match self {
            C14nMethod::Exclusive { with_comments, .. } => C14nMethod::Exclusive {
                with_comments,
                inclusive_prefixes: prefix_list
                    .split_whitespace()
                    .map(|p| if p == "#default" { String::new() } else { p.to_string() })
                    .collect(),
            },
            inclusive => inclusive,
        }
    }

    fn with_comments(&self) -> bool {
        match self {
            C14nMethod::Inclusive { with_comments } => *with_comments,
            C14nMethod::Exclusive { with_comments, .. } => *with_comments,
        }
    }
}

/// Canonicalizes a whole document, omitting `exclude` and its subtree.
pub fn canonicalize_document(
    document: &Document,
    method: &C14nMethod,
    exclude: Option<&Element>,
) -> String {
    let mut writer = Canonicalizer::new(method, exclude);
    for node in &document.prolog {
        if writer.misc(node) {
            writer.out.push('\n');
        }
    }
    writer.element(&document.root, &NamespaceScope::new(), &NamespaceScope::new());
    for node in &document.epilog {
        let mut rendered = Canonicalizer::new(method, exclude);
        if rendered.misc(node) {
            writer.out.push('\n');
            writer.out.push_str(&rendered.out);
        }
    }
    writer.out
}

/// Canonicalizes the subtree rooted at `located` as a document subset.
///
/// Inclusive methods carry `xml:*` attributes of the ancestors (such as
/// `xml:lang`) onto the subset apex. Exclusive methods do not.
pub fn canonicalize_subtree(
    located: &Located<'_>,
    method: &C14nMethod,
    exclude: Option<&Element>,
) -> String {
    let mut writer = Canonicalizer::new(method, exclude);
    if let C14nMethod::Inclusive { .. } = method {
        writer.apex_attributes = located
            .inherited_xml
            .iter()
            .filter(|inherited| {
                !located
                    .element
                    .attributes
                    .iter()
                    .any(|own| own.qname == inherited.qname)
            })
            .cloned()
            .collect();
    }
    writer.element(located.element, &located.inherited, &NamespaceScope::new());
    writer.out
}

struct Canonicalizer<'a> {
    method: &'a C14nMethod,
    exclude: Option<&'a Element>,
    /// Extra attributes written on the first element only.
    apex_attributes: Vec<Attribute>,
    out: String,
}

impl<'a> Canonicalizer<'a> {
    fn new(method: &'a C14nMethod, exclude: Option<&'a Element>) -> Self {
        Self {
            method,
            exclude,
            apex_attributes: Vec::new(),
            out: String::new(),
        }
    }

    /// Writes a comment or processing instruction. Returns whether anything was written.
    fn misc(&mut self, node: &Node) -> bool {
        match node {
            Node::Comment(text) if self.method.with_comments() => {
                self.out.push_str("<!--");
                self.out.push_str(text);
                self.out.push_str("-->");
                true
            }
            Node::ProcessingInstruction { target, data } => {
                self.out.push_str("<?");
                self.out.push_str(target);
                if !data.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(data);
                }
                self.out.push_str("?>");
                true
            }
            _ => false,
        }
    }

    fn element(&mut self, element: &Element, inherited: &NamespaceScope, rendered: &NamespaceScope) {
        if let Some(excluded) = self.exclude {
            if ptr::eq(element, excluded) {
                return;
            }
        }

        let scope = element.scope_with(inherited);
        let mut decls = match self.method {
            C14nMethod::Inclusive { .. } => inclusive_decls(&scope, rendered),
            C14nMethod::Exclusive {
                inclusive_prefixes, ..
            } => exclusive_decls(element, &scope, rendered, inclusive_prefixes),
        };
        decls.sort();

        let mut rendered_here = rendered.clone();
        for (prefix, uri) in &decls {
            rendered_here.insert(prefix.clone(), uri.clone());
        }

        self.out.push('<');
        self.out.push_str(&element.qname);
        for (prefix, uri) in &decls {
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            escape_attr(uri, &mut self.out);
            self.out.push('"');
        }

        let apex_attributes = std::mem::take(&mut self.apex_attributes);
        let mut attributes: Vec<&Attribute> =
            element.attributes.iter().chain(apex_attributes.iter()).collect();
        attributes.sort_by(|a, b| {
            let a_key = (a.namespace.as_deref().unwrap_or(""), a.local_name.as_str());
            let b_key = (b.namespace.as_deref().unwrap_or(""), b.local_name.as_str());
            a_key.cmp(&b_key)
        });
        for attr in attributes {
            self.out.push(' ');
            self.out.push_str(&attr.qname);
            self.out.push_str("=\"");
            escape_attr(&attr.value, &mut self.out);
            self.out.push('"');
        }
        self.out.push('>');

        for child in &element.children {
            match child {
                Node::Element(child_element) => self.element(child_element, &scope, &rendered_here),
                Node::Text(text) => escape_text(text, &mut self.out),
                other => {
                    self.misc(other);
                }
            }
        }

        self.out.push_str("</");
        self.out.push_str(&element.qname);
        self.out.push('>');
    }
}

fn inclusive_decls(scope: &NamespaceScope, rendered: &NamespaceScope) -> Vec<(String, String)> {
    let rendered_default = rendered.get("").map(String::as_str).unwrap_or("");
    let mut decls = Vec::new();

    for (prefix, uri) in scope {
        if prefix.is_empty() {
            if uri != rendered_default {
                decls.push((String::new(), uri.clone()));
            }
        } else if rendered.get(prefix) != Some(uri) {
            decls.push((prefix.clone(), uri.clone()));
        }
    }
    if !scope.contains_key("") && !rendered_default.is_empty() {
        decls.push((String::new(), String::new()));
    }
    decls
}

fn exclusive_decls(
    element: &Element,
    scope: &NamespaceScope,
    rendered: &NamespaceScope,
    inclusive_prefixes: &[String],
) -> Vec<(String, String)> {
    let mut utilized: Vec<String> = vec![element.prefix.clone().unwrap_or_default()];
    for attr in &element.attributes {
        if let Some(prefix) = &attr.prefix {
            if prefix != "xml" {
                utilized.push(prefix.clone());
            }
        }
    }
    for prefix in inclusive_prefixes {
        if scope.contains_key(prefix) {
            utilized.push(prefix.clone());
        }
    }
    utilized.sort();
    utilized.dedup();

    let rendered_default = rendered.get("").map(String::as_str).unwrap_or("");
    let mut decls = Vec::new();
    for prefix in utilized {
        let uri = scope.get(&prefix).cloned().unwrap_or_default();
        if prefix.is_empty() {
            if uri != rendered_default {
                decls.push((prefix, uri));
            }
        } else if !uri.is_empty() && rendered.get(&prefix) != Some(&uri) {
            decls.push((prefix, uri));
        }
    }
    decls
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inclusive() -> C14nMethod {
        C14nMethod::from_uri(C14N_10).unwrap()
    }

    fn exclusive() -> C14nMethod {
        C14nMethod::from_uri(EXC_C14N).unwrap()
    }

    #[test]
    fn test_attributes_sorted_and_empty_elements_expanded() {
        let doc = Document::parse(r#"<doc   b="1"  a="2" xmlns:x="urn:x" x:c="3"><e/></doc>"#).unwrap();
        assert_eq!(
            canonicalize_document(&doc, &inclusive(), None),
            r#"<doc xmlns:x="urn:x" a="2" b="1" x:c="3"><e></e></doc>"#
        );
    }

    #[test]
    fn test_redundant_namespace_declarations_removed() {
        let doc = Document::parse(r#"<a xmlns="urn:u"><b xmlns="urn:u"><c xmlns=""/></b></a>"#).unwrap();
        assert_eq!(
            canonicalize_document(&doc, &inclusive(), None),
            r#"<a xmlns="urn:u"><b><c xmlns=""></c></b></a>"#
        );
    }

    #[test]
    fn test_text_and_attribute_escaping() {
        let doc = Document::parse("<a t=\"&quot;&lt;&#9;\">x &gt; y &amp; &#xD;</a>").unwrap();
        assert_eq!(
            canonicalize_document(&doc, &inclusive(), None),
            "<a t=\"&quot;&lt;&#x9;\">x &gt; y &amp; &#xD;</a>"
        );
    }

    #[test]
    fn test_prolog_comments_follow_method() {
        let doc = Document::parse("<?xml version=\"1.0\"?>\n<!-- c -->\n<?pi data?>\n<doc/>\n<!-- e -->").unwrap();
        assert_eq!(canonicalize_document(&doc, &inclusive(), None), "<?pi data?>\n<doc></doc>");
        let with_comments = C14nMethod::from_uri(C14N_10_WITH_COMMENTS).unwrap();
        assert_eq!(
            canonicalize_document(&doc, &with_comments, None),
            "<!-- c -->\n<?pi data?>\n<doc></doc>\n<!-- e -->"
        );
    }

    #[test]
    fn test_subtree_inclusive_versus_exclusive() {
        let doc = Document::parse(r#"<n0:a xmlns:n0="urn:foo" xmlns:n1="urn:bar"><n1:b/></n0:a>"#).unwrap();
        let b = doc.find_all(|el| el.local_name == "b").remove(0);

        assert_eq!(
            canonicalize_subtree(&b, &inclusive(), None),
            r#"<n1:b xmlns:n0="urn:foo" xmlns:n1="urn:bar"></n1:b>"#
        );
        assert_eq!(
            canonicalize_subtree(&b, &exclusive(), None),
            r#"<n1:b xmlns:n1="urn:bar"></n1:b>"#
        );
        let listed = exclusive().with_prefix_list("n0");
        assert_eq!(
            canonicalize_subtree(&b, &listed, None),
            r#"<n1:b xmlns:n0="urn:foo" xmlns:n1="urn:bar"></n1:b>"#
        );
    }

    #[test]
    fn test_subtree_inherits_xml_attributes_when_inclusive() {
        let doc = Document::parse(
            r#"<a xml:lang="en" xml:space="preserve"><b xml:lang="fr"><c x="1"/></b><d/></a>"#,
        )
        .unwrap();
        let c = doc.find_all(|el| el.local_name == "c").remove(0);
        assert_eq!(
            canonicalize_subtree(&c, &inclusive(), None),
            r#"<c x="1" xml:lang="fr" xml:space="preserve"></c>"#
        );
        assert_eq!(canonicalize_subtree(&c, &exclusive(), None), r#"<c x="1"></c>"#);

        let d = doc.find_all(|el| el.local_name == "d").remove(0);
        assert_eq!(
            canonicalize_subtree(&d, &inclusive(), None),
            r#"<d xml:lang="en" xml:space="preserve"></d>"#
        );
    }

    #[test]
    fn test_excluded_element_is_omitted() {
        let doc = Document::parse("<a><keep/><drop><x/></drop>tail</a>").unwrap();
        let drop = doc.find_all(|el| el.local_name == "drop").remove(0);
        assert_eq!(
            canonicalize_document(&doc, &inclusive(), Some(drop.element)),
            "<a><keep></keep>tail</a>"
        );
    }
}
