//! XML document helpers
//!
//! Thin layer over libxml2 trees: parsing, serialization, reserved-character
//! escaping, namespace-scoped traversal and the [`XmlBuilder`] used by the
//! envelope constructors.
//!
//! On an event XML, the first child of the root names the event, as well as
//! its XSD file:
//!
//! ```text
//! <eSocial xmlns="http://www.esocial.gov.br/schema/evt/evtMonit/vS_1_0">
//!     <evtMonit Id="ID...">
//!     ...
//! ```

use std::collections::HashMap;
use std::path::Path;

use libxml::parser::Parser;
use libxml::tree::{Document, Namespace, Node};

use crate::error::{Error, Result};

pub(crate) fn xml_err<E: std::fmt::Debug>(context: &str, err: E) -> Error {
    Error::Xml(format!("{context}: {err:?}"))
}

/// Escape the five XML reserved characters in text content.
///
/// Applied to all text and attribute values before they are inserted into a
/// tree. `&` is rewritten first so already-produced entities are not
/// re-escaped.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Parse an XML document from a string.
pub fn load_fromstring(xml: &str) -> Result<Document> {
    Parser::default()
        .parse_string(xml)
        .map_err(|e| xml_err("parse string", e))
}

/// Parse an XML document from a file.
pub fn load_fromfile(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    let display = path.display().to_string();
    Parser::default()
        .parse_file(&display)
        .map_err(|e| xml_err(&format!("parse file {display}"), e))
}

/// Serialize a document to a string, including the XML declaration.
pub fn dump_tostring(doc: &Document) -> String {
    doc.to_string()
}

/// Serialize a single node (and its subtree) without the XML declaration.
pub fn node_tostring(doc: &Document, node: &Node) -> String {
    doc.node_to_string(node)
}

/// The root element, or `MalformedInput` when the tree has none.
pub fn root_element(doc: &Document) -> Result<Node> {
    doc.get_root_element()
        .ok_or_else(|| Error::MalformedInput("document has no root element".into()))
}

/// First top-level child element of the document root.
///
/// Event documents are required to carry exactly one, and by regulatory
/// convention it is the element holding the `Id` attribute.
pub fn first_child_element(node: &Node) -> Option<Node> {
    node.get_child_elements().into_iter().next()
}

/// The default-namespace href of a node, if it is in one.
pub fn default_ns_href(node: &Node) -> Option<String> {
    node.get_namespace().map(|ns| ns.get_href())
}

fn matches(node: &Node, local_name: &str, ns_href: &str) -> bool {
    node.get_name() == local_name
        && node
            .get_namespace()
            .map(|ns| ns.get_href() == ns_href)
            .unwrap_or(false)
}

fn collect_descendants(node: &Node, local_name: &str, ns_href: &str, out: &mut Vec<Node>) {
    for child in node.get_child_elements() {
        if matches(&child, local_name, ns_href) {
            out.push(child.clone());
        }
        collect_descendants(&child, local_name, ns_href, out);
    }
}

/// First descendant element with the given local name inside the namespace.
pub fn find_descendant(root: &Node, local_name: &str, ns_href: &str) -> Option<Node> {
    if matches(root, local_name, ns_href) {
        return Some(root.clone());
    }
    find_descendants(root, local_name, ns_href).into_iter().next()
}

/// All descendant elements with the given local name inside the namespace,
/// in document order.
pub fn find_descendants(root: &Node, local_name: &str, ns_href: &str) -> Vec<Node> {
    let mut out = Vec::new();
    collect_descendants(root, local_name, ns_href, &mut out);
    out
}

/// Builder for namespaced XML documents.
///
/// Wraps a document rooted at `root_tag`, with **at most one** namespace
/// mapping, a deliberate invariant of the envelope wire format. Passing two
/// or more namespaces is a caller error, rejected up front rather than
/// silently truncated.
pub struct XmlBuilder {
    doc: Document,
    ns: Option<Namespace>,
    ns_href: Option<String>,
}

impl XmlBuilder {
    /// Create a document rooted at `root_tag`, declaring the namespaces in
    /// `nsmap` (zero or one entries) as the default namespace.
    pub fn new(root_tag: &str, nsmap: &[&str]) -> Result<Self> {
        if nsmap.len() > 1 {
            return Err(Error::MalformedInput(format!(
                "envelope builder accepts at most one namespace mapping, got {}",
                nsmap.len()
            )));
        }
        let mut doc = Document::new().map_err(|e| xml_err("new document", e))?;
        let mut root =
            Node::new(root_tag, None, &doc).map_err(|e| xml_err("new root element", e))?;
        doc.set_root_element(&root);
        let mut ns = None;
        let mut ns_href = None;
        if let Some(href) = nsmap.first() {
            let namespace = Namespace::new("", href, &mut root)
                .map_err(|e| xml_err("declare namespace", e))?;
            root.set_namespace(&namespace)
                .map_err(|e| xml_err("set root namespace", e))?;
            ns = Some(namespace);
            ns_href = Some(href.to_string());
        }
        Ok(Self { doc, ns, ns_href })
    }

    /// The root element of the document being built.
    pub fn root(&self) -> Result<Node> {
        root_element(&self.doc)
    }

    /// Add a child element under the element addressed by `parent_path`
    /// (slash-separated local names from the root; `None` addresses the root
    /// itself). Text and attribute values are reserved-character escaped
    /// before insertion.
    pub fn add(
        &mut self,
        parent_path: Option<&str>,
        tag: &str,
        text: Option<&str>,
        attrs: &[(&str, &str)],
    ) -> Result<Node> {
        let parent = match parent_path {
            None => self.root()?,
            Some(path) => self.find_path(path)?,
        };
        self.add_under(parent, tag, text, attrs)
    }

    /// Add a child element under an already-obtained parent node.
    pub fn add_under(
        &mut self,
        mut parent: Node,
        tag: &str,
        text: Option<&str>,
        attrs: &[(&str, &str)],
    ) -> Result<Node> {
        let mut node = Node::new(tag, None, &self.doc).map_err(|e| xml_err("new element", e))?;
        parent
            .add_child(&mut node)
            .map_err(|e| xml_err("append child", e))?;
        if let Some(ns) = &self.ns {
            node.set_namespace(ns)
                .map_err(|e| xml_err("set namespace", e))?;
        }
        for (name, value) in attrs {
            node.set_attribute(name, &escape_text(value))
                .map_err(|e| xml_err("set attribute", e))?;
        }
        if let Some(text) = text {
            node.set_content(&escape_text(text))
                .map_err(|e| xml_err("set content", e))?;
        }
        Ok(node)
    }

    fn find_path(&self, path: &str) -> Result<Node> {
        let mut current = self.root()?;
        for segment in path.split('/') {
            current = current
                .get_child_elements()
                .into_iter()
                .find(|c| match &self.ns_href {
                    Some(href) => matches(c, segment, href),
                    None => c.get_name() == segment,
                })
                .ok_or_else(|| {
                    Error::MalformedInput(format!("no element at path segment '{segment}'"))
                })?;
        }
        Ok(current)
    }

    /// The document under construction.
    pub(crate) fn document(&self) -> &Document {
        &self.doc
    }

    /// Finish building and hand over the document.
    pub fn into_document(self) -> Document {
        self.doc
    }
}

/// Deep-copy `source` (an element subtree, possibly from another document)
/// under `parent` inside `doc`, preserving namespaces, attributes and text.
///
/// libxml2 nodes are owned by their document, so moving a signed event into
/// an envelope is done by reconstruction rather than re-parenting. Attribute
/// order is normalized to lexicographic so envelope serialization is
/// deterministic.
pub(crate) fn graft(doc: &Document, parent: &mut Node, source: &Node) -> Result<Node> {
    let mut scope = HashMap::new();
    // Seed the scope with the parent's own namespace so a child in the same
    // namespace does not re-declare it.
    if let Some(ns) = parent.get_namespace() {
        scope.insert(ns.get_prefix(), (ns.get_href(), ns));
    }
    graft_scoped(doc, parent, source, &scope)
}

fn graft_scoped(
    doc: &Document,
    parent: &mut Node,
    source: &Node,
    scope: &HashMap<String, (String, Namespace)>,
) -> Result<Node> {
    let mut copy =
        Node::new(&source.get_name(), None, doc).map_err(|e| xml_err("copy element", e))?;
    parent
        .add_child(&mut copy)
        .map_err(|e| xml_err("append copied element", e))?;

    let mut scope = scope.clone();
    if let Some(ns) = source.get_namespace() {
        let prefix = ns.get_prefix();
        let href = ns.get_href();
        match scope.get(&prefix) {
            Some((seen, namespace)) if *seen == href => {
                let namespace = namespace.clone();
                copy.set_namespace(&namespace)
                    .map_err(|e| xml_err("reuse namespace", e))?;
            }
            _ => {
                let namespace = Namespace::new(&prefix, &href, &mut copy)
                    .map_err(|e| xml_err("declare copied namespace", e))?;
                copy.set_namespace(&namespace)
                    .map_err(|e| xml_err("set copied namespace", e))?;
                scope.insert(prefix, (href, namespace));
            }
        }
    }

    let mut attrs: Vec<(String, String)> = source.get_properties().into_iter().collect();
    attrs.sort();
    for (name, value) in attrs {
        copy.set_attribute(&name, &escape_text(&value))
            .map_err(|e| xml_err("copy attribute", e))?;
    }

    let children = source.get_child_elements();
    if children.is_empty() {
        let text = source.get_content();
        if !text.is_empty() {
            copy.set_content(&escape_text(&text))
                .map_err(|e| xml_err("copy text", e))?;
        }
    } else {
        for child in &children {
            graft_scoped(doc, &mut copy, child, &scope)?;
        }
    }
    Ok(copy)
}

/// Deep-copy a whole document. Used by the signer, which returns a new
/// signed tree instead of mutating its input.
pub(crate) fn copy_document(source: &Document) -> Result<Document> {
    let src_root = root_element(source)?;
    let mut doc = Document::new().map_err(|e| xml_err("new document", e))?;
    let mut root = Node::new(&src_root.get_name(), None, &doc)
        .map_err(|e| xml_err("copy root element", e))?;
    doc.set_root_element(&root);

    let mut scope = HashMap::new();
    if let Some(ns) = src_root.get_namespace() {
        let prefix = ns.get_prefix();
        let href = ns.get_href();
        let namespace =
            Namespace::new(&prefix, &href, &mut root).map_err(|e| xml_err("copy namespace", e))?;
        root.set_namespace(&namespace)
            .map_err(|e| xml_err("set copied namespace", e))?;
        scope.insert(prefix, (href, namespace));
    }
    let mut attrs: Vec<(String, String)> = src_root.get_properties().into_iter().collect();
    attrs.sort();
    for (name, value) in attrs {
        root.set_attribute(&name, &escape_text(&value))
            .map_err(|e| xml_err("copy root attribute", e))?;
    }
    for child in src_root.get_child_elements() {
        graft_scoped(&doc, &mut root, &child, &scope)?;
    }
    // Leaf root with bare text is not a shape events use, but keep it intact.
    if src_root.get_child_elements().is_empty() {
        let text = src_root.get_content();
        if !text.is_empty() {
            root.set_content(&escape_text(&text))
                .map_err(|e| xml_err("copy root text", e))?;
        }
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_reserved_characters() {
        assert_eq!(
            escape_text(r#"a & b < c > d "e" 'f'"#),
            "a &amp; b &lt; c &gt; d &quot;e&quot; &apos;f&apos;"
        );
    }

    #[test]
    fn test_escape_does_not_double_escape_ampersands() {
        assert_eq!(escape_text("x > y"), "x &gt; y");
        assert_eq!(escape_text("&"), "&amp;");
    }

    #[test]
    fn test_builder_rejects_two_namespaces() {
        let result = XmlBuilder::new("eSocial", &["urn:a", "urn:b"]);
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_builder_single_namespace_structure() {
        let mut builder = XmlBuilder::new("eSocial", &["urn:test"]).unwrap();
        builder
            .add(None, "consultaLoteEventos", None, &[])
            .unwrap();
        builder
            .add(
                Some("consultaLoteEventos"),
                "protocoloEnvio",
                Some("1.2.202109.0000000000000000001"),
                &[],
            )
            .unwrap();
        let doc = builder.into_document();
        let root = root_element(&doc).unwrap();
        assert_eq!(root.get_name(), "eSocial");
        assert_eq!(default_ns_href(&root).as_deref(), Some("urn:test"));
        let protocol = find_descendant(&root, "protocoloEnvio", "urn:test").unwrap();
        assert_eq!(protocol.get_content(), "1.2.202109.0000000000000000001");
    }

    #[test]
    fn test_builder_path_miss_is_error() {
        let mut builder = XmlBuilder::new("eSocial", &["urn:test"]).unwrap();
        let result = builder.add(Some("missing"), "child", None, &[]);
        assert!(matches!(result, Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_find_descendants_in_document_order() {
        let doc = load_fromstring(
            r#"<r xmlns="urn:t"><a><b>1</b></a><b>2</b><c><b>3</b></c></r>"#,
        )
        .unwrap();
        let root = root_element(&doc).unwrap();
        let found = find_descendants(&root, "b", "urn:t");
        let texts: Vec<String> = found.iter().map(|n| n.get_content()).collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_first_child_element_skips_text() {
        let doc = load_fromstring("<r>  <evtMonit Id=\"ID1\"/> </r>").unwrap();
        let root = root_element(&doc).unwrap();
        let first = first_child_element(&root).unwrap();
        assert_eq!(first.get_name(), "evtMonit");
        assert_eq!(first.get_attribute("Id").as_deref(), Some("ID1"));
    }

    #[test]
    fn test_copy_document_preserves_shape() {
        let xml = r#"<eSocial xmlns="urn:evt"><evtMonit Id="ID9"><ideEvento><tpAmb>2</tpAmb></ideEvento></evtMonit></eSocial>"#;
        let source = load_fromstring(xml).unwrap();
        let copy = copy_document(&source).unwrap();
        let root = root_element(&copy).unwrap();
        assert_eq!(root.get_name(), "eSocial");
        assert_eq!(default_ns_href(&root).as_deref(), Some("urn:evt"));
        let evt = first_child_element(&root).unwrap();
        assert_eq!(evt.get_attribute("Id").as_deref(), Some("ID9"));
        let amb = find_descendant(&root, "tpAmb", "urn:evt").unwrap();
        assert_eq!(amb.get_content(), "2");
    }

    #[test]
    fn test_graft_into_other_namespace() {
        let event =
            load_fromstring(r#"<eSocial xmlns="urn:evt"><evtMonit Id="ID2"/></eSocial>"#).unwrap();
        let event_root = root_element(&event).unwrap();

        let mut builder = XmlBuilder::new("eSocial", &["urn:batch"]).unwrap();
        let holder = builder.add(None, "evento", None, &[("Id", "ID2")]).unwrap();
        let doc = builder.into_document();
        let mut holder = holder;
        graft(&doc, &mut holder, &event_root).unwrap();

        let root = root_element(&doc).unwrap();
        let inner = find_descendant(&root, "evtMonit", "urn:evt").unwrap();
        assert_eq!(inner.get_attribute("Id").as_deref(), Some("ID2"));
        let serialized = node_tostring(&doc, &root);
        assert!(serialized.contains(r#"xmlns="urn:batch""#));
        assert!(serialized.contains(r#"xmlns="urn:evt""#));
    }
}
