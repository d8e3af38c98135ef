/**
 * XML Canonicalization
 * Canonical XML 1.0 and Exclusive Canonical XML over a parsed document
 */

use std::collections::{BTreeMap, BTreeSet};

use roxmltree::{Node, NodeId, NodeType};

pub const C14N_10: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_10_WITH_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonicalization {
    Inclusive {
        with_comments: bool,
    },
    Exclusive {
        with_comments: bool,
        /// Prefixes from `InclusiveNamespaces PrefixList`; `""` is the default namespace.
        inclusive_prefixes: Vec<String>,
    },
}

impl Canonicalization {
    pub fn from_algorithm(uri: &str) -> Option<Self> {
        match uri {
            C14N_10 => Some(Self::Inclusive { with_comments: false }),
            C14N_10_WITH_COMMENTS => Some(Self::Inclusive { with_comments: true }),
            EXC_C14N => Some(Self::Exclusive {
                with_comments: false,
                inclusive_prefixes: Vec::new(),
            }),
            EXC_C14N_WITH_COMMENTS => Some(Self::Exclusive {
                with_comments: true,
                inclusive_prefixes: Vec::new(),
            }),
            _ => None,
        }
    }

    /// Applies a whitespace separated `PrefixList`; ignored for inclusive C14N.
    pub fn with_prefix_list(self, prefix_list: &str) -> Self {
        match self {
            Self::Exclusive { with_comments, .. } => Self::Exclusive {
                with_comments,
                inclusive_prefixes: prefix_list
                    .split_whitespace()
                    .map(|p| if p == "#default" { String::new() } else { p.to_string() })
                    .collect(),
            },
            inclusive => inclusive,
        }
    }

    /// Same-document references never carry comments into the node-set.
    pub fn without_comments(self) -> Self {
        match self {
            Self::Inclusive { .. } => Self::Inclusive { with_comments: false },
            Self::Exclusive { inclusive_prefixes, .. } => Self::Exclusive {
                with_comments: false,
                inclusive_prefixes,
            },
        }
    }

    fn with_comments(&self) -> bool {
        match self {
            Self::Inclusive { with_comments } | Self::Exclusive { with_comments, .. } => {
                *with_comments
            }
        }
    }
}

impl Default for Canonicalization {
    fn default() -> Self {
        Self::Inclusive { with_comments: false }
    }
}

/// Canonicalizes the subtree rooted at `apex`, leaving out `excluded` and
/// everything beneath it. Passing the document root yields the whole document.
pub fn canonicalize(apex: Node<'_, '_>, excluded: Option<NodeId>, method: &Canonicalization) -> Vec<u8> {
    let mut writer = Writer {
        input: apex.document().input_text(),
        method,
        excluded,
        out: String::new(),
    };
    writer.write_node(apex, &NsMap::new());
    writer.out.into_bytes()
}

/// Prefix → URI; the default namespace is keyed by `""`.
type NsMap = BTreeMap<String, String>;

struct Writer<'m, 'input> {
    input: &'input str,
    method: &'m Canonicalization,
    excluded: Option<NodeId>,
    out: String,
}

impl Writer<'_, '_> {
    fn write_node(&mut self, node: Node<'_, '_>, rendered: &NsMap) {
        if Some(node.id()) == self.excluded {
            return;
        }
        match node.node_type() {
            NodeType::Root => self.write_document(node),
            NodeType::Element => self.write_element(node, rendered),
            NodeType::Text => escape_text(node.text().unwrap_or_default(), &mut self.out),
            NodeType::Comment => {
                if self.method.with_comments() {
                    self.out.push_str("<!--");
                    self.out.push_str(node.text().unwrap_or_default());
                    self.out.push_str("-->");
                }
            }
            NodeType::PI => {
                if let Some(pi) = node.pi() {
                    self.out.push_str("<?");
                    self.out.push_str(pi.target);
                    if let Some(value) = pi.value.filter(|v| !v.is_empty()) {
                        self.out.push(' ');
                        self.out.push_str(value);
                    }
                    self.out.push_str("?>");
                }
            }
        }
    }

    fn write_document(&mut self, root: Node<'_, '_>) {
        let mut after_element = false;
        for child in root.children() {
            if Some(child.id()) == self.excluded {
                continue;
            }
            match child.node_type() {
                NodeType::Element => {
                    self.write_element(child, &NsMap::new());
                    after_element = true;
                }
                NodeType::Comment if !self.method.with_comments() => {}
                NodeType::Comment | NodeType::PI => {
                    if after_element {
                        self.out.push('\n');
                    }
                    self.write_node(child, &NsMap::new());
                    if !after_element {
                        self.out.push('\n');
                    }
                }
                _ => {}
            }
        }
    }

    fn write_element(&mut self, element: Node<'_, '_>, rendered: &NsMap) {
        let qname = qualified_name(element, self.input);
        let in_scope = in_scope_namespaces(element);
        let attribute_names = attribute_qualified_names(element, self.input);

        let mut declarations: Vec<(String, String)> = Vec::new();
        match self.method {
            Canonicalization::Inclusive { .. } => {
                for (prefix, uri) in &in_scope {
                    if rendered.get(prefix) != Some(uri) {
                        declarations.push((prefix.clone(), uri.clone()));
                    }
                }
                if !in_scope.contains_key("") && default_is_set(rendered) {
                    declarations.push((String::new(), String::new()));
                }
            }
            Canonicalization::Exclusive { inclusive_prefixes, .. } => {
                let mut utilized = BTreeSet::new();
                utilized.insert(prefix_of(qname).unwrap_or_default().to_string());
                for name in &attribute_names {
                    if let Some(prefix) = prefix_of(name) {
                        if prefix != "xml" {
                            utilized.insert(prefix.to_string());
                        }
                    }
                }
                utilized.extend(inclusive_prefixes.iter().cloned());

                for prefix in utilized {
                    match in_scope.get(&prefix) {
                        Some(uri) if rendered.get(&prefix) != Some(uri) => {
                            declarations.push((prefix, uri.clone()));
                        }
                        None if prefix.is_empty() && default_is_set(rendered) => {
                            declarations.push((String::new(), String::new()));
                        }
                        _ => {}
                    }
                }
            }
        }
        declarations.sort();

        let mut next = rendered.clone();
        self.out.push('<');
        self.out.push_str(qname);
        for (prefix, uri) in &declarations {
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            escape_attribute(uri, &mut self.out);
            self.out.push('"');
            next.insert(prefix.clone(), uri.clone());
        }

        let mut attributes: Vec<_> = element
            .attributes()
            .zip(attribute_names.iter().copied())
            .map(|(attr, name)| (attr.namespace().unwrap_or_default(), attr.name(), name, attr.value()))
            .collect();
        attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        for (_, _, name, value) in attributes {
            self.out.push(' ');
            self.out.push_str(name);
            self.out.push_str("=\"");
            escape_attribute(value, &mut self.out);
            self.out.push('"');
        }
        self.out.push('>');

        for child in element.children() {
            self.write_node(child, &next);
        }

        self.out.push_str("</");
        self.out.push_str(qname);
        self.out.push('>');
    }
}

/// The element name as written in the source, prefix included.
fn qualified_name<'input>(element: Node<'_, '_>, input: &'input str) -> &'input str {
    let tag = &input[element.range().start + 1..];
    let end = tag
        .find(|c: char| c.is_ascii_whitespace() || c == '/' || c == '>')
        .unwrap_or(tag.len());
    &tag[..end]
}

/// Attribute names as written in the start tag, in source order, without
/// namespace declarations. Lines up with `Node::attributes`.
fn attribute_qualified_names<'input>(element: Node<'_, '_>, input: &'input str) -> Vec<&'input str> {
    let start = element.range().start + 1;
    let tag = &input[start..];
    let bytes = tag.as_bytes();
    let mut pos = tag
        .find(|c: char| c.is_ascii_whitespace() || c == '/' || c == '>')
        .unwrap_or(tag.len());

    let mut names = Vec::new();
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] == b'/' || bytes[pos] == b'>' {
            break;
        }
        let name_start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'=' {
            pos += 1;
        }
        let name = &tag[name_start..pos];
        while pos < bytes.len() && bytes[pos] != b'"' && bytes[pos] != b'\'' {
            pos += 1;
        }
        let Some(&quote) = bytes.get(pos) else { break };
        pos += 1;
        while pos < bytes.len() && bytes[pos] != quote {
            pos += 1;
        }
        pos += 1;

        if name != "xmlns" && !name.starts_with("xmlns:") {
            names.push(name);
        }
    }
    names
}

fn prefix_of(qname: &str) -> Option<&str> {
    qname.split_once(':').map(|(prefix, _)| prefix)
}

fn in_scope_namespaces(element: Node<'_, '_>) -> NsMap {
    element
        .namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .filter(|ns| ns.name().is_some() || !ns.uri().is_empty())
        .map(|ns| (ns.name().unwrap_or_default().to_string(), ns.uri().to_string()))
        .collect()
}

fn default_is_set(rendered: &NsMap) -> bool {
    rendered.get("").is_some_and(|uri| !uri.is_empty())
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    fn inclusive(xml: &str) -> String {
        let doc = Document::parse(xml).unwrap();
        String::from_utf8(canonicalize(doc.root(), None, &Canonicalization::default())).unwrap()
    }

    fn subtree(xml: &str, name: &str, method: Canonicalization) -> String {
        let doc = Document::parse(xml).unwrap();
        let apex = doc.descendants().find(|n| n.tag_name().name() == name).unwrap();
        String::from_utf8(canonicalize(apex, None, &method)).unwrap()
    }

    #[test]
    fn sorts_attributes_and_expands_empty_elements() {
        assert_eq!(
            inclusive("<doc b=\"2\"   a='1'><e/></doc>"),
            "<doc a=\"1\" b=\"2\"><e></e></doc>"
        );
    }

    #[test]
    fn namespaces_precede_attributes_and_unprefixed_attributes_sort_first() {
        let xml = "<a:root xmlns:b=\"urn:b\" xmlns:a=\"urn:a\"><a:child b:attr=\"x\" plain=\"y\"/></a:root>";
        assert_eq!(
            inclusive(xml),
            "<a:root xmlns:a=\"urn:a\" xmlns:b=\"urn:b\"><a:child plain=\"y\" b:attr=\"x\"></a:child></a:root>"
        );
    }

    #[test]
    fn inclusive_subset_carries_every_inherited_namespace() {
        let xml = "<root xmlns=\"urn:d\" xmlns:u=\"urn:unused\"><item>v</item></root>";
        assert_eq!(
            subtree(xml, "item", Canonicalization::default()),
            "<item xmlns=\"urn:d\" xmlns:u=\"urn:unused\">v</item>"
        );
    }

    #[test]
    fn exclusive_subset_renders_only_utilized_namespaces() {
        let xml = "<root xmlns=\"urn:d\" xmlns:u=\"urn:unused\"><item>v</item></root>";
        let method = Canonicalization::from_algorithm(EXC_C14N).unwrap();
        assert_eq!(subtree(xml, "item", method), "<item xmlns=\"urn:d\">v</item>");

        let method = Canonicalization::from_algorithm(EXC_C14N).unwrap().with_prefix_list("u");
        assert_eq!(
            subtree(xml, "item", method),
            "<item xmlns=\"urn:d\" xmlns:u=\"urn:unused\">v</item>"
        );
    }

    #[test]
    fn undeclared_default_namespace_is_emitted_once() {
        let xml = "<root xmlns=\"urn:d\"><inner xmlns=\"\"><leaf/></inner></root>";
        assert_eq!(
            inclusive(xml),
            "<root xmlns=\"urn:d\"><inner xmlns=\"\"><leaf></leaf></inner></root>"
        );
    }

    #[test]
    fn escapes_text_and_attribute_values() {
        let xml = "<r a=\"x&quot;&lt;&#9;\">1 &lt; 2 &amp; 3 &gt; 0</r>";
        assert_eq!(inclusive(xml), "<r a=\"x&quot;&lt;&#x9;\">1 &lt; 2 &amp; 3 &gt; 0</r>");
    }

    #[test]
    fn cdata_becomes_escaped_text() {
        assert_eq!(inclusive("<r><![CDATA[a<b]]></r>"), "<r>a&lt;b</r>");
    }

    #[test]
    fn comments_follow_the_selected_algorithm() {
        let xml = "<?xml version=\"1.0\"?>\n<!-- c --><r><!--x-->t</r>";
        assert_eq!(inclusive(xml), "<r>t</r>");

        let doc = Document::parse(xml).unwrap();
        let method = Canonicalization::from_algorithm(C14N_10_WITH_COMMENTS).unwrap();
        let out = String::from_utf8(canonicalize(doc.root(), None, &method)).unwrap();
        assert_eq!(out, "<!-- c -->\n<r><!--x-->t</r>");
    }

    #[test]
    fn excluded_subtree_is_dropped() {
        let doc = Document::parse("<r>\n  <keep k=\"1\"/>\n  <Signature><x/></Signature>\n</r>").unwrap();
        let signature = doc.descendants().find(|n| n.has_tag_name("Signature")).unwrap();
        let out = canonicalize(doc.root(), Some(signature.id()), &Canonicalization::default());
        assert_eq!(String::from_utf8(out).unwrap(), "<r>\n  <keep k=\"1\"></keep>\n  \n</r>");
    }

    #[test]
    fn attribute_prefix_is_kept_when_two_prefixes_share_a_namespace() {
        let xml = "<r xmlns:a=\"urn:x\" xmlns:b=\"urn:x\"><e b:attr=\"1\" a:other='2' plain=\"3\"/></r>";
        assert_eq!(
            inclusive(xml),
            "<r xmlns:a=\"urn:x\" xmlns:b=\"urn:x\"><e plain=\"3\" b:attr=\"1\" a:other=\"2\"></e></r>"
        );
    }

    #[test]
    fn exclusive_declares_the_prefix_an_attribute_is_written_with() {
        let xml = "<r xmlns:a=\"urn:x\" xmlns:b=\"urn:x\"><e b:attr=\"v > w\"/></r>";
        let doc = Document::parse(xml).unwrap();
        let e = doc.descendants().find(|n| n.has_tag_name("e")).unwrap();
        let method = Canonicalization::from_algorithm(EXC_C14N).unwrap();
        assert_eq!(
            String::from_utf8(canonicalize(e, None, &method)).unwrap(),
            "<e xmlns:b=\"urn:x\" b:attr=\"v > w\"></e>"
        );
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(Canonicalization::from_algorithm("http://www.w3.org/2006/12/xml-c14n11").is_none());
    }
}
