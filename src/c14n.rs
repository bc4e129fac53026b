//! Canonical XML (C14N 1.0, non-exclusive) serialization
//!
//! Produces the byte stream that digests and signatures are computed over.
//! Covers the subset of XML that event documents and `SignedInfo` occupy:
//! element, text and attribute nodes with default or prefixed namespaces.
//! Comments, processing instructions and CDATA sections do not occur in
//! these documents and are not emitted.
//!
//! Canonical-form rules applied:
//! - start and end tags always written (`<e></e>`, never `<e/>`)
//! - namespace declarations rendered where they first become visible,
//!   sorted by prefix, ahead of attributes
//! - attributes sorted lexicographically, values double-quoted
//! - text escapes `&`, `<`, `>` and CR; attribute values escape `&`, `<`,
//!   `"`, TAB, LF and CR as character references

use std::collections::HashMap;

use libxml::tree::{Node, NodeType};

/// Local name of the enveloped-signature element excluded by the
/// enveloped-signature transform.
const SIGNATURE_LOCAL_NAME: &str = "Signature";
const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

fn escape_c14n_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
    out
}

fn escape_c14n_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
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
    out
}

/// Canonicalize an element subtree.
pub fn canonicalize(root: &Node) -> Vec<u8> {
    let mut out = String::new();
    write_node(root, &HashMap::new(), false, &mut out);
    out.into_bytes()
}

/// Canonicalize an element subtree, dropping any enveloped `ds:Signature`
/// children of the root (the enveloped-signature transform).
pub fn canonicalize_enveloped(root: &Node) -> Vec<u8> {
    let mut out = String::new();
    write_node(root, &HashMap::new(), true, &mut out);
    out.into_bytes()
}

fn is_signature(node: &Node) -> bool {
    node.get_name() == SIGNATURE_LOCAL_NAME
        && node
            .get_namespace()
            .map(|ns| ns.get_href() == DSIG_NS)
            .unwrap_or(false)
}

fn write_node(
    node: &Node,
    rendered: &HashMap<String, String>,
    skip_signature: bool,
    out: &mut String,
) {
    match node.get_type() {
        Some(NodeType::ElementNode) => {}
        Some(NodeType::TextNode) | Some(NodeType::EntityRefNode) => {
            out.push_str(&escape_c14n_text(&node.get_content()));
            return;
        }
        _ => return,
    }

    let mut rendered = rendered.clone();
    let qname = match node.get_namespace() {
        Some(ns) if !ns.get_prefix().is_empty() => {
            format!("{}:{}", ns.get_prefix(), node.get_name())
        }
        _ => node.get_name(),
    };

    out.push('<');
    out.push_str(&qname);

    if let Some(ns) = node.get_namespace() {
        let prefix = ns.get_prefix();
        let href = ns.get_href();
        if rendered.get(&prefix) != Some(&href) {
            if prefix.is_empty() {
                out.push_str(&format!(r#" xmlns="{}""#, escape_c14n_attr(&href)));
            } else {
                out.push_str(&format!(r#" xmlns:{}="{}""#, prefix, escape_c14n_attr(&href)));
            }
            rendered.insert(prefix, href);
        }
    }

    let mut attrs: Vec<(String, String)> = node.get_properties().into_iter().collect();
    attrs.sort();
    for (name, value) in &attrs {
        out.push_str(&format!(r#" {}="{}""#, name, escape_c14n_attr(value)));
    }
    out.push('>');

    let mut child = node.get_first_child();
    while let Some(current) = child {
        let skip = skip_signature
            && current.get_type() == Some(NodeType::ElementNode)
            && is_signature(&current);
        if !skip {
            // The enveloped transform only strips the root's own Signature
            // child; deeper levels are serialized as-is.
            write_node(&current, &rendered, false, out);
        }
        child = current.get_next_sibling();
    }

    out.push_str(&format!("</{qname}>"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{load_fromstring, root_element};

    fn c14n_str(xml: &str) -> String {
        let doc = load_fromstring(xml).unwrap();
        let root = root_element(&doc).unwrap();
        String::from_utf8(canonicalize(&root)).unwrap()
    }

    #[test]
    fn test_attributes_sorted_and_tags_expanded() {
        assert_eq!(
            c14n_str(r#"<e b="2" a="1"><empty/></e>"#),
            r#"<e a="1" b="2"><empty></empty></e>"#
        );
    }

    #[test]
    fn test_default_namespace_rendered_once() {
        assert_eq!(
            c14n_str(r#"<e xmlns="urn:t"><c><d>x</d></c></e>"#),
            r#"<e xmlns="urn:t"><c><d>x</d></c></e>"#
        );
    }

    #[test]
    fn test_text_escaping() {
        assert_eq!(
            c14n_str("<e>a &amp; b &lt; c</e>"),
            "<e>a &amp; b &lt; c</e>"
        );
    }

    #[test]
    fn test_attribute_escaping() {
        assert_eq!(
            c14n_str(r#"<e a="x &amp; &quot;y&quot;"/>"#),
            r#"<e a="x &amp; &quot;y&quot;"></e>"#
        );
    }

    #[test]
    fn test_enveloped_transform_strips_root_signature() {
        let xml = concat!(
            r#"<eSocial xmlns="urn:evt"><evtMonit Id="ID1"/>"#,
            r#"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#"><SignedInfo/></Signature>"#,
            r#"</eSocial>"#
        );
        let doc = load_fromstring(xml).unwrap();
        let root = root_element(&doc).unwrap();
        let bytes = String::from_utf8(canonicalize_enveloped(&root)).unwrap();
        assert!(!bytes.contains("Signature"));
        assert!(bytes.contains("<evtMonit Id=\"ID1\"></evtMonit>"));
    }

    #[test]
    fn test_canonicalization_is_stable() {
        let xml = r#"<e z="1" a="2" m="3"><t>v</t></e>"#;
        assert_eq!(c14n_str(xml), c14n_str(xml));
    }
}
