/**
 * Signature Verifier
 * Validates the enveloped XML-DSig signature of an offline credential
 *
 * Two trust modes are exposed as separate operations:
 * - verify_with_trust_anchor: the key was supplied out of band, so a valid
 *   signature proves who issued the document.
 * - verify_with_embedded_certificate: the key comes from the document itself.
 *   Anyone able to rewrite the document can also swap that certificate, so a
 *   valid signature only proves the payload was not altered after the
 *   certificate was embedded.
 */

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use roxmltree::{Document, Node, NodeId};
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use crate::c14n::{self, Canonicalization};
use crate::certificate::{CertificateSource, TrustedCertificate};
use crate::error::{KycError, Result};

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";

const ID_ATTRIBUTES: [&str; 3] = ["Id", "ID", "id"];

/// Parsed XML tree alongside the bytes it was parsed from.
pub struct SignedXmlDocument<'input> {
    raw: &'input [u8],
    doc: Document<'input>,
}

impl<'input> SignedXmlDocument<'input> {
    pub fn parse(raw: &'input [u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| KycError::MalformedXml(format!("payload is not UTF-8: {}", e)))?;
        let doc = Document::parse(text).map_err(|e| KycError::MalformedXml(e.to_string()))?;
        Ok(Self { raw, doc })
    }

    pub fn document(&self) -> &Document<'input> {
        &self.doc
    }

    pub fn raw(&self) -> &[u8] {
        self.raw
    }
}

/// Verifies against an operator-supplied certificate. The only mode that
/// establishes authenticity.
pub fn verify_with_trust_anchor(doc: &SignedXmlDocument<'_>, anchor: &TrustedCertificate) -> Result<()> {
    if *anchor.source() != CertificateSource::TrustAnchor {
        return Err(KycError::CertificateInvalid(
            "certificate was not configured as a trust anchor".to_string(),
        ));
    }
    verify(doc.document(), anchor)
}

/// Verifies against the certificate carried in the document. Integrity only.
pub fn verify_with_embedded_certificate(doc: &SignedXmlDocument<'_>) -> Result<()> {
    find_signature(doc.document())?;
    let embedded = TrustedCertificate::embedded_in(doc.document())?;
    verify(doc.document(), &embedded)
}

fn verify(xml: &Document<'_>, cert: &TrustedCertificate) -> Result<()> {
    let signature = find_signature(xml)?;
    let signed_info = dsig_child(signature, "SignedInfo")?;
    let canonicalization = canonicalization_of(dsig_child(signed_info, "CanonicalizationMethod")?)?;
    let algorithm = verification_algorithm(algorithm_of(dsig_child(signed_info, "SignatureMethod")?)?)?;

    let references: Vec<Node<'_, '_>> = signed_info
        .children()
        .filter(|n| n.has_tag_name((DSIG_NS, "Reference")))
        .collect();
    if references.is_empty() {
        return Err(invalid("SignedInfo carries no Reference"));
    }

    let mut covers_document = false;
    for reference in references {
        let target = verify_reference(xml, signature, reference)?;
        covers_document |= target == xml.root().id() || target == xml.root_element().id();
    }
    if !covers_document {
        return Err(invalid("no Reference covers the document element"));
    }

    let canonical = c14n::canonicalize(signed_info, None, &canonicalization);
    let signature_value = decode_base64(dsig_child(signature, "SignatureValue")?, "SignatureValue")?;

    UnparsedPublicKey::new(algorithm, cert.public_key())
        .verify(&canonical, &signature_value)
        .map_err(|_| invalid("SignatureValue does not verify against the key"))?;

    debug!("Signature verified ({:?} key)", cert.source());
    Ok(())
}

/// Checks one Reference digest and returns the node it points at.
fn verify_reference(xml: &Document<'_>, signature: Node<'_, '_>, reference: Node<'_, '_>) -> Result<NodeId> {
    let uri = reference
        .attribute("URI")
        .ok_or_else(|| invalid("Reference without URI"))?;
    let target = resolve_uri(xml, uri)?;

    let mut method = Canonicalization::default();
    let mut enveloped = false;
    if let Some(transforms) = optional_dsig_child(reference, "Transforms") {
        for transform in transforms
            .children()
            .filter(|n| n.has_tag_name((DSIG_NS, "Transform")))
        {
            let algorithm = algorithm_of(transform)?;
            if algorithm == ENVELOPED_SIGNATURE {
                enveloped = true;
            } else {
                method = canonicalization_of(transform)?;
            }
        }
    }

    let excluded = enveloped.then(|| signature.id());
    let canonical = c14n::canonicalize(target, excluded, &method.without_comments());
    let computed = digest(algorithm_of(dsig_child(reference, "DigestMethod")?)?, &canonical)?;
    let expected = decode_base64(dsig_child(reference, "DigestValue")?, "DigestValue")?;

    if computed != expected {
        debug!(
            "Digest mismatch for \"{}\": expected {}, computed {}",
            uri,
            hex::encode(&expected),
            hex::encode(&computed)
        );
        return Err(invalid(&format!("digest mismatch for reference \"{}\"", uri)));
    }
    Ok(target.id())
}

fn resolve_uri<'a, 'input>(xml: &'a Document<'input>, uri: &str) -> Result<Node<'a, 'input>> {
    if uri.is_empty() {
        return Ok(xml.root());
    }
    let id = uri
        .strip_prefix('#')
        .ok_or_else(|| invalid(&format!("external Reference URI \"{}\" not supported", uri)))?;

    let mut matches = xml.descendants().filter(|n| {
        n.is_element() && ID_ATTRIBUTES.iter().any(|attr| n.attribute(*attr) == Some(id))
    });
    let target = matches
        .next()
        .ok_or_else(|| invalid(&format!("Reference target \"{}\" not found", id)))?;
    if matches.next().is_some() {
        return Err(invalid(&format!("duplicate ID \"{}\"", id)));
    }
    Ok(target)
}

pub(crate) fn find_signature<'a, 'input>(xml: &'a Document<'input>) -> Result<Node<'a, 'input>> {
    xml.descendants()
        .find(|n| n.has_tag_name((DSIG_NS, "Signature")))
        .ok_or(KycError::SignatureNodeMissing)
}

fn optional_dsig_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name((DSIG_NS, name)))
}

fn dsig_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    optional_dsig_child(node, name).ok_or_else(|| invalid(&format!("{} missing", name)))
}

fn algorithm_of<'a>(node: Node<'a, '_>) -> Result<&'a str> {
    node.attribute("Algorithm")
        .ok_or_else(|| invalid(&format!("{} without Algorithm", node.tag_name().name())))
}

fn canonicalization_of(node: Node<'_, '_>) -> Result<Canonicalization> {
    let algorithm = algorithm_of(node)?;
    let method = Canonicalization::from_algorithm(algorithm)
        .ok_or_else(|| invalid(&format!("unsupported canonicalization {}", algorithm)))?;
    let prefixes = node
        .children()
        .find(|n| n.has_tag_name((EXC_C14N_NS, "InclusiveNamespaces")))
        .and_then(|n| n.attribute("PrefixList"));
    Ok(match prefixes {
        Some(list) => method.with_prefix_list(list),
        None => method,
    })
}

fn verification_algorithm(uri: &str) -> Result<&'static dyn VerificationAlgorithm> {
    match uri {
        RSA_SHA1 => Ok(&signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY),
        RSA_SHA256 => Ok(&signature::RSA_PKCS1_2048_8192_SHA256),
        RSA_SHA512 => Ok(&signature::RSA_PKCS1_2048_8192_SHA512),
        ECDSA_SHA256 => Ok(&signature::ECDSA_P256_SHA256_FIXED),
        other => Err(invalid(&format!("unsupported signature method {}", other))),
    }
}

fn digest(uri: &str, data: &[u8]) -> Result<Vec<u8>> {
    match uri {
        DIGEST_SHA1 => Ok(ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, data)
            .as_ref()
            .to_vec()),
        DIGEST_SHA256 => Ok(Sha256::digest(data).to_vec()),
        DIGEST_SHA512 => Ok(Sha512::digest(data).to_vec()),
        other => Err(invalid(&format!("unsupported digest method {}", other))),
    }
}

fn decode_base64(node: Node<'_, '_>, what: &str) -> Result<Vec<u8>> {
    let text: String = node
        .text()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(text)
        .map_err(|_| invalid(&format!("{} is not valid base64", what)))
}

fn invalid(reason: &str) -> KycError {
    KycError::SignatureInvalid(reason.to_string())
}
