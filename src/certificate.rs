/**
 * Certificate Utility
 * Loads trust anchors and re-wraps the certificate embedded in a signed document
 */

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use roxmltree::Document;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo, X509Certificate};

use crate::error::{KycError, Result};
use crate::signature::{find_signature, DSIG_NS};

const PEM_LINE_WIDTH: usize = 64;

/// Where a certificate came from. Only `TrustAnchor` proves who signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// Supplied out of band by the operator.
    TrustAnchor,
    /// Read out of the document being verified; proves integrity only.
    Embedded,
}

/// Public key material accepted for signature verification.
#[derive(Debug, Clone)]
pub struct TrustedCertificate {
    public_key: Vec<u8>,
    source: CertificateSource,
}

impl TrustedCertificate {
    /// Parses a PEM `CERTIFICATE` or `PUBLIC KEY` block configured by the operator.
    pub fn trust_anchor_from_pem(pem: &str) -> Result<Self> {
        Self::from_pem(pem, CertificateSource::TrustAnchor)
    }

    pub fn trust_anchor_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KycError::TrustAnchorNotFound(path.to_path_buf()),
            _ => KycError::CertificateInvalid(format!("cannot read {}: {}", path.display(), e)),
        })?;
        Self::trust_anchor_from_pem(&pem)
    }

    /// Parses the certificate carried inside the document itself.
    pub fn embedded_in(doc: &Document<'_>) -> Result<Self> {
        let pem = extract_embedded_certificate(doc)?;
        Self::from_pem(&pem, CertificateSource::Embedded)
    }

    fn from_pem(pem: &str, source: CertificateSource) -> Result<Self> {
        let (_, block) = parse_x509_pem(pem.as_bytes())
            .map_err(|e| KycError::CertificateInvalid(format!("not a PEM block: {}", e)))?;

        let public_key = match block.label.as_str() {
            "CERTIFICATE" => {
                let (_, cert) = X509Certificate::from_der(&block.contents)
                    .map_err(|e| KycError::CertificateInvalid(e.to_string()))?;
                cert.public_key().subject_public_key.data.to_vec()
            }
            "PUBLIC KEY" => {
                let (_, spki) = SubjectPublicKeyInfo::from_der(&block.contents)
                    .map_err(|e| KycError::CertificateInvalid(e.to_string()))?;
                spki.subject_public_key.data.to_vec()
            }
            other => {
                return Err(KycError::CertificateInvalid(format!(
                    "unsupported PEM label {}",
                    other
                )))
            }
        };

        Ok(Self { public_key, source })
    }

    /// Raw subject public key: PKCS#1 for RSA, an uncompressed point for EC.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn source(&self) -> &CertificateSource {
        &self.source
    }
}

/// Finds the `ds:X509Certificate` under the signature's `KeyInfo` and returns
/// it as a PEM document. Certificates elsewhere in the document are ignored.
pub fn extract_embedded_certificate(doc: &Document<'_>) -> Result<String> {
    let node = find_signature(doc)?
        .children()
        .filter(|n| n.has_tag_name((DSIG_NS, "KeyInfo")))
        .flat_map(|key_info| key_info.descendants())
        .find(|n| n.has_tag_name((DSIG_NS, "X509Certificate")))
        .ok_or(KycError::EmbeddedCertificateMissing)?;

    let body: String = node
        .text()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if body.is_empty() {
        return Err(KycError::EmbeddedCertificateMissing);
    }
    STANDARD
        .decode(&body)
        .map_err(|e| KycError::CertificateInvalid(format!("embedded certificate: {}", e)))?;

    Ok(wrap_pem("CERTIFICATE", &body))
}

/// Folds base64 text into a PEM block with 64-character lines.
pub fn wrap_pem(label: &str, base64_body: &str) -> String {
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for line in base64_body.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 is ASCII, so every chunk boundary is a char boundary
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}
