/**
 * Error Model
 * One typed failure per pipeline stage, grouped into caller-facing kinds
 */

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KycError>;

/// Caller-facing grouping of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User-correctable; the message is surfaced verbatim.
    Input,
    NotFound,
    Format,
    /// Never downgraded to a warning.
    Security,
    /// Service-level; the caller may retry later.
    Unavailable,
    Internal,
}

#[derive(Error, Debug)]
pub enum KycError {
    #[error("invalid share code: {0}")]
    InvalidShareCode(&'static str),

    #[error("invalid image data: {0}")]
    InvalidImage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("share code does not decrypt the archive")]
    WrongPassword,

    #[error("no face detected in {0}")]
    NoFaceDetected(String),

    #[error("archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("trust anchor not found: {}", .0.display())]
    TrustAnchorNotFound(PathBuf),

    #[error("no XML entry found inside archive")]
    NoXmlEntry,

    #[error("archive contains more than one XML entry: {}", .0.join(", "))]
    AmbiguousEntry(Vec<String>),

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("XML payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("malformed XML: {0}")]
    MalformedXml(String),

    #[error("required section missing: {0}")]
    MissingRequiredSection(&'static str),

    #[error("embedded photo is not valid base64")]
    MalformedPhoto,

    #[error("credential carries no photo to compare")]
    MissingPhoto,

    #[error("no <Signature> element found in XML")]
    SignatureNodeMissing,

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("no embedded X509 certificate found in XML")]
    EmbeddedCertificateMissing,

    #[error("certificate invalid: {0}")]
    CertificateInvalid(String),

    #[error("no trust anchor configured")]
    TrustAnchorNotConfigured,

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("cannot compare embeddings from models {left} and {right}")]
    ModelMismatch { left: String, right: String },

    #[error("cannot compare embeddings of dimension {left} and {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl KycError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidShareCode(_)
            | Self::InvalidImage(_)
            | Self::InvalidRequest(_)
            | Self::WrongPassword
            | Self::NoFaceDetected(_) => ErrorKind::Input,

            Self::ArchiveNotFound(_) | Self::TrustAnchorNotFound(_) => ErrorKind::NotFound,

            Self::NoXmlEntry
            | Self::AmbiguousEntry(_)
            | Self::MalformedArchive(_)
            | Self::PayloadTooLarge { .. }
            | Self::MalformedXml(_)
            | Self::MissingRequiredSection(_)
            | Self::MalformedPhoto
            | Self::MissingPhoto => ErrorKind::Format,

            Self::SignatureNodeMissing
            | Self::SignatureInvalid(_)
            | Self::EmbeddedCertificateMissing
            | Self::CertificateInvalid(_)
            | Self::TrustAnchorNotConfigured => ErrorKind::Security,

            Self::ProviderUnavailable(_) => ErrorKind::Unavailable,

            Self::ModelMismatch { .. }
            | Self::DimensionMismatch { .. }
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidShareCode(_) => "INVALID_SHARE_CODE",
            Self::InvalidImage(_) => "INVALID_IMAGE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::WrongPassword => "WRONG_PASSWORD",
            Self::NoFaceDetected(_) => "NO_FACE_DETECTED",
            Self::ArchiveNotFound(_) => "ARCHIVE_NOT_FOUND",
            Self::TrustAnchorNotFound(_) => "TRUST_ANCHOR_NOT_FOUND",
            Self::NoXmlEntry => "NO_XML_ENTRY",
            Self::AmbiguousEntry(_) => "AMBIGUOUS_ENTRY",
            Self::MalformedArchive(_) => "MALFORMED_ARCHIVE",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::MalformedXml(_) => "MALFORMED_XML",
            Self::MissingRequiredSection(_) => "MISSING_REQUIRED_SECTION",
            Self::MalformedPhoto => "MALFORMED_PHOTO",
            Self::MissingPhoto => "MISSING_PHOTO",
            Self::SignatureNodeMissing => "SIGNATURE_NODE_MISSING",
            Self::SignatureInvalid(_) => "SIGNATURE_INVALID",
            Self::EmbeddedCertificateMissing => "EMBEDDED_CERTIFICATE_MISSING",
            Self::CertificateInvalid(_) => "CERTIFICATE_INVALID",
            Self::TrustAnchorNotConfigured => "TRUST_ANCHOR_NOT_CONFIGURED",
            Self::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            Self::ModelMismatch { .. } => "MODEL_MISMATCH",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::Config(_) => "CONFIG",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_failures_are_never_input_errors() {
        for err in [
            KycError::SignatureNodeMissing,
            KycError::SignatureInvalid("digest mismatch".into()),
            KycError::EmbeddedCertificateMissing,
            KycError::TrustAnchorNotConfigured,
        ] {
            assert_eq!(err.kind(), ErrorKind::Security, "{}", err);
        }
    }

    #[test]
    fn wrong_password_is_user_correctable() {
        assert_eq!(KycError::WrongPassword.kind(), ErrorKind::Input);
        assert_eq!(KycError::WrongPassword.code(), "WRONG_PASSWORD");
    }

    #[test]
    fn ambiguous_entry_lists_names() {
        let err = KycError::AmbiguousEntry(vec!["a.xml".into(), "b.xml".into()]);
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("a.xml, b.xml"));
    }
}
