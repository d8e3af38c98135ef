/**
 * Credential Service
 * Decrypts an offline eKYC archive, checks its signature and parses the record
 */

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::archive::EncryptedCredentialArchive;
use crate::certificate::TrustedCertificate;
use crate::demographic::DemographicRecord;
use crate::error::{KycError, Result};
use crate::signature::{self, SignedXmlDocument};

/// What a successful signature check actually established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAssurance {
    /// Signed by the holder of the configured trust anchor.
    Authentic,
    /// Unaltered since signing, signer unknown.
    IntegrityOnly,
    /// Signature not checked.
    Unverified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustMode {
    TrustAnchor,
    EmbeddedCertificate,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedCredential {
    pub assurance: SignatureAssurance,
    pub record: DemographicRecord,
}

pub struct CredentialService {
    trust_anchor: Option<TrustedCertificate>,
}

impl CredentialService {
    pub fn new(trust_anchor: Option<TrustedCertificate>) -> Self {
        Self { trust_anchor }
    }

    pub fn has_trust_anchor(&self) -> bool {
        self.trust_anchor.is_some()
    }

    pub fn verify(&self, archive: &EncryptedCredentialArchive, mode: TrustMode) -> Result<VerifiedCredential> {
        match mode {
            TrustMode::TrustAnchor => self.verify_with_trust_anchor(archive),
            TrustMode::EmbeddedCertificate => self.verify_with_embedded_certificate(archive),
        }
    }

    pub fn verify_with_trust_anchor(&self, archive: &EncryptedCredentialArchive) -> Result<VerifiedCredential> {
        let anchor = self
            .trust_anchor
            .as_ref()
            .ok_or(KycError::TrustAnchorNotConfigured)?;

        let xml = archive.extract_xml()?;
        let doc = SignedXmlDocument::parse(&xml)?;
        signature::verify_with_trust_anchor(&doc, anchor).map_err(log_rejection)?;
        Self::finish(&doc, SignatureAssurance::Authentic)
    }

    /// Checks the document against its own certificate. This proves the
    /// payload was not altered, not who issued it.
    pub fn verify_with_embedded_certificate(&self, archive: &EncryptedCredentialArchive) -> Result<VerifiedCredential> {
        let xml = archive.extract_xml()?;
        let doc = SignedXmlDocument::parse(&xml)?;
        signature::verify_with_embedded_certificate(&doc).map_err(log_rejection)?;
        Self::finish(&doc, SignatureAssurance::IntegrityOnly)
    }

    /// Parses the record without any signature check.
    pub fn extract_without_signature_check(&self, archive: &EncryptedCredentialArchive) -> Result<VerifiedCredential> {
        let xml = archive.extract_xml()?;
        let doc = SignedXmlDocument::parse(&xml)?;
        Self::finish(&doc, SignatureAssurance::Unverified)
    }

    fn finish(doc: &SignedXmlDocument<'_>, assurance: SignatureAssurance) -> Result<VerifiedCredential> {
        let record = DemographicRecord::from_document(doc.document())?;
        info!(?assurance, has_photo = record.photo.is_some(), "credential parsed");
        Ok(VerifiedCredential { assurance, record })
    }
}

fn log_rejection(err: KycError) -> KycError {
    warn!(code = err.code(), "credential signature rejected");
    err
}
