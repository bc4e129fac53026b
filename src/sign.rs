//! Enveloped XML digital signatures
//!
//! Signs one event document with the fixed, non-configurable suite the
//! webservice requires: RSA-SHA256 signatures, SHA-256 digests and
//! non-exclusive XML-C14N 1.0 canonicalization. The signature is enveloped,
//! appended as the last child of the event root, and covers the document as it
//! existed at call time. Any id assignment must therefore happen before
//! signing.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use libxml::tree::{Document, Namespace, Node};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Digest;
use tracing::debug;

use crate::c14n;
use crate::error::{Error, Result};
use crate::xml::{self, xml_err};

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const SIGNATURE_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const DIGEST_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const ENVELOPED_TRANSFORM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// An already-extracted private key / certificate pair, both PEM.
///
/// PKCS#12 container extraction happens outside this crate; what arrives
/// here is the PEM pair it produces.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub key_pem: String,
    pub cert_pem: String,
}

/// Credential-extraction collaborator: turns a PKCS#12 container into the
/// PEM pair the signer consumes. Implementations live outside this crate.
pub trait CredentialSource {
    fn load_certificate(&self, container_path: &Path, password: &str) -> Result<KeyMaterial>;
}

impl KeyMaterial {
    pub fn from_pem(key_pem: impl Into<String>, cert_pem: impl Into<String>) -> Self {
        Self {
            key_pem: key_pem.into(),
            cert_pem: cert_pem.into(),
        }
    }

    pub fn from_pem_files(key_path: impl AsRef<Path>, cert_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            key_pem: std::fs::read_to_string(key_path)?,
            cert_pem: std::fs::read_to_string(cert_path)?,
        })
    }

    fn rsa_key(&self) -> Result<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_pem(&self.key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&self.key_pem))
            .map_err(|e| Error::Signing(format!("private key is not a readable RSA PEM: {e}")))
    }

    /// Certificate body as one base64 line, PEM armor stripped.
    fn certificate_base64(&self) -> Result<String> {
        let body: String = self
            .cert_pem
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .map(str::trim)
            .collect();
        if body.is_empty() {
            return Err(Error::Signing("certificate PEM is empty".into()));
        }
        Ok(body)
    }
}

struct SignatureWriter<'d> {
    doc: &'d Document,
    ns: Namespace,
}

impl<'d> SignatureWriter<'d> {
    fn element(&self, parent: &mut Node, name: &str) -> Result<Node> {
        let mut node =
            Node::new(name, None, self.doc).map_err(|e| xml_err("new signature element", e))?;
        parent
            .add_child(&mut node)
            .map_err(|e| xml_err("append signature element", e))?;
        node.set_namespace(&self.ns)
            .map_err(|e| xml_err("set signature namespace", e))?;
        Ok(node)
    }

    fn algorithm(&self, parent: &mut Node, name: &str, algorithm: &str) -> Result<Node> {
        let mut node = self.element(parent, name)?;
        node.set_attribute("Algorithm", algorithm)
            .map_err(|e| xml_err("set Algorithm", e))?;
        Ok(node)
    }
}

/// Sign `doc`, returning a new document with the enveloped signature
/// appended to the root element. The input document is left untouched.
pub fn sign(doc: &Document, key_material: &KeyMaterial) -> Result<Document> {
    let signing_key = SigningKey::<Sha256>::new(key_material.rsa_key()?);
    let certificate = key_material.certificate_base64()?;

    let signed = xml::copy_document(doc)?;
    let mut root = xml::root_element(&signed)?;

    // Digest over the canonicalized document, before the signature exists.
    let digest_input = c14n::canonicalize_enveloped(&root);
    let digest_value = BASE64.encode(sha2::Sha256::digest(&digest_input));

    // <Signature xmlns="http://www.w3.org/2000/09/xmldsig#">, detached from
    // the root until the signature value is computed.
    let mut signature =
        Node::new("Signature", None, &signed).map_err(|e| xml_err("new Signature", e))?;
    let ns = Namespace::new("", DSIG_NS, &mut signature)
        .map_err(|e| xml_err("declare dsig namespace", e))?;
    signature
        .set_namespace(&ns)
        .map_err(|e| xml_err("set dsig namespace", e))?;
    let writer = SignatureWriter { doc: &signed, ns };

    let mut signed_info = writer.element(&mut signature, "SignedInfo")?;
    writer.algorithm(&mut signed_info, "CanonicalizationMethod", C14N_ALGORITHM)?;
    writer.algorithm(&mut signed_info, "SignatureMethod", SIGNATURE_ALGORITHM)?;
    let mut reference = writer.element(&mut signed_info, "Reference")?;
    reference
        .set_attribute("URI", "")
        .map_err(|e| xml_err("set Reference URI", e))?;
    let mut transforms = writer.element(&mut reference, "Transforms")?;
    writer.algorithm(&mut transforms, "Transform", ENVELOPED_TRANSFORM)?;
    writer.algorithm(&mut transforms, "Transform", C14N_ALGORITHM)?;
    writer.algorithm(&mut reference, "DigestMethod", DIGEST_ALGORITHM)?;
    let mut digest_node = writer.element(&mut reference, "DigestValue")?;
    digest_node
        .set_content(&digest_value)
        .map_err(|e| xml_err("set DigestValue", e))?;

    // RSA-SHA256 over the canonicalized SignedInfo.
    let signed_info_c14n = c14n::canonicalize(&signed_info);
    let signature_value = BASE64.encode(signing_key.sign(&signed_info_c14n).to_vec());

    let mut value_node = writer.element(&mut signature, "SignatureValue")?;
    value_node
        .set_content(&signature_value)
        .map_err(|e| xml_err("set SignatureValue", e))?;

    let mut key_info = writer.element(&mut signature, "KeyInfo")?;
    let mut x509_data = writer.element(&mut key_info, "X509Data")?;
    let mut cert_node = writer.element(&mut x509_data, "X509Certificate")?;
    cert_node
        .set_content(&certificate)
        .map_err(|e| xml_err("set X509Certificate", e))?;

    root.add_child(&mut signature)
        .map_err(|e| xml_err("envelop signature", e))?;

    debug!(digest = %digest_value, "event signed");
    Ok(signed)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{find_descendant, load_fromstring, root_element};

    const EVENT: &str = concat!(
        r#"<eSocial xmlns="urn:evt">"#,
        r#"<evtMonit Id="ID1123456780000002021091617310600001">"#,
        r#"<ideEvento><tpAmb>2</tpAmb></ideEvento>"#,
        r#"</evtMonit></eSocial>"#
    );

    fn test_material() -> KeyMaterial {
        tests_support::material()
    }

    #[test]
    fn test_sign_appends_enveloped_signature() {
        let doc = load_fromstring(EVENT).unwrap();
        let signed = sign(&doc, &test_material()).unwrap();
        let root = root_element(&signed).unwrap();

        let children = root.get_child_elements();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].get_name(), "evtMonit");
        assert_eq!(children[1].get_name(), "Signature");
        assert_eq!(
            crate::xml::default_ns_href(&children[1]).as_deref(),
            Some(DSIG_NS)
        );
    }

    #[test]
    fn test_sign_leaves_input_untouched() {
        let doc = load_fromstring(EVENT).unwrap();
        let _ = sign(&doc, &test_material()).unwrap();
        let root = root_element(&doc).unwrap();
        assert_eq!(root.get_child_elements().len(), 1);
    }

    #[test]
    fn test_digest_matches_recomputation() {
        let doc = load_fromstring(EVENT).unwrap();
        let signed = sign(&doc, &test_material()).unwrap();
        let root = root_element(&signed).unwrap();

        let digest_node = find_descendant(&root, "DigestValue", DSIG_NS).unwrap();
        let recomputed =
            BASE64.encode(sha2::Sha256::digest(c14n::canonicalize_enveloped(&root)));
        assert_eq!(digest_node.get_content(), recomputed);
    }

    #[test]
    fn test_signature_carries_fixed_suite() {
        let doc = load_fromstring(EVENT).unwrap();
        let signed = sign(&doc, &test_material()).unwrap();
        let root = root_element(&signed).unwrap();

        let c14n_node = find_descendant(&root, "CanonicalizationMethod", DSIG_NS).unwrap();
        assert_eq!(
            c14n_node.get_attribute("Algorithm").as_deref(),
            Some(C14N_ALGORITHM)
        );
        let method = find_descendant(&root, "SignatureMethod", DSIG_NS).unwrap();
        assert_eq!(
            method.get_attribute("Algorithm").as_deref(),
            Some(SIGNATURE_ALGORITHM)
        );
        let reference = find_descendant(&root, "Reference", DSIG_NS).unwrap();
        assert_eq!(reference.get_attribute("URI").as_deref(), Some(""));
    }

    #[test]
    fn test_garbage_key_is_signing_error() {
        let doc = load_fromstring(EVENT).unwrap();
        let material = KeyMaterial::from_pem("not a key", "not a cert");
        let err = sign(&doc, &material).err().unwrap();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[test]
    fn test_empty_certificate_is_signing_error() {
        let doc = load_fromstring(EVENT).unwrap();
        let mut material = test_material();
        material.cert_pem = String::new();
        let err = sign(&doc, &material).err().unwrap();
        assert!(matches!(err, Error::Signing(_)));
    }
}
