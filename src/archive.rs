/**
 * Archive Extractor
 * Decrypts the share-code protected ZIP and returns the single XML payload
 */

use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;

use tracing::{debug, warn};
use zeroize::Zeroizing;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{KycError, Result};

/// Upper bound on the decompressed XML entry.
pub const MAX_XML_BYTES: u64 = 32 * 1024 * 1024;

const MIN_SHARE_CODE_LEN: usize = 4;

/// Password chosen by the credential holder when the archive was issued.
#[derive(Clone)]
pub struct ShareCode(Zeroizing<String>);

impl ShareCode {
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = Zeroizing::new(code.into());
        if code.is_empty() {
            return Err(KycError::InvalidShareCode("share code is required"));
        }
        if code.chars().count() < MIN_SHARE_CODE_LEN {
            return Err(KycError::InvalidShareCode("share code must be at least 4 characters"));
        }
        if code.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(KycError::InvalidShareCode(
                "share code must not contain whitespace or control characters",
            ));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for ShareCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShareCode(***)")
    }
}

/// Raw archive bytes plus the share code that unlocks them.
pub struct EncryptedCredentialArchive {
    bytes: Vec<u8>,
    share_code: ShareCode,
}

impl EncryptedCredentialArchive {
    pub fn new(bytes: Vec<u8>, share_code: ShareCode) -> Self {
        Self { bytes, share_code }
    }

    pub fn from_path(path: impl AsRef<Path>, share_code: ShareCode) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KycError::ArchiveNotFound(path.to_path_buf()),
            _ => KycError::Internal(format!("failed to read archive: {}", e)),
        })?;
        Ok(Self::new(bytes, share_code))
    }

    pub fn share_code(&self) -> &ShareCode {
        &self.share_code
    }

    /// Returns the bytes of the only `.xml` entry, decrypted with the share code.
    pub fn extract_xml(&self) -> Result<Zeroizing<Vec<u8>>> {
        let mut archive = ZipArchive::new(Cursor::new(self.bytes.as_slice()))
            .map_err(|e| KycError::MalformedArchive(e.to_string()))?;

        let mut candidates = Vec::new();
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| KycError::MalformedArchive(e.to_string()))?;
            if !entry.is_dir() && has_xml_suffix(entry.name()) {
                candidates.push((index, entry.name().to_string()));
            }
        }
        debug!("XML entries in archive: {:?}", candidates);

        let index = match candidates.as_slice() {
            [] => return Err(KycError::NoXmlEntry),
            [(index, _)] => *index,
            _ => {
                warn!("Rejecting archive with {} XML entries", candidates.len());
                return Err(KycError::AmbiguousEntry(
                    candidates.into_iter().map(|(_, name)| name).collect(),
                ));
            }
        };

        let entry = archive
            .by_index_decrypt(index, self.share_code.as_bytes())
            .map_err(|e| match e {
                ZipError::InvalidPassword => KycError::WrongPassword,
                other => KycError::MalformedArchive(other.to_string()),
            })?;
        let encrypted = entry.encrypted();

        let mut payload = Zeroizing::new(Vec::new());
        entry
            .take(MAX_XML_BYTES + 1)
            .read_to_end(&mut payload)
            .map_err(|e| {
                // ZipCrypto only checks one header byte, so a wrong share code
                // can slip through and surface as a corrupt stream instead.
                if encrypted {
                    KycError::WrongPassword
                } else {
                    KycError::MalformedArchive(e.to_string())
                }
            })?;

        if payload.len() as u64 > MAX_XML_BYTES {
            return Err(KycError::PayloadTooLarge { limit: MAX_XML_BYTES });
        }
        Ok(payload)
    }
}

fn has_xml_suffix(name: &str) -> bool {
    let name = name.as_bytes();
    name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(b".xml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;
    use zip::unstable::write::FileOptionsExt;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const SHARE_CODE: &[u8] = b"4821";

    fn build_archive(entries: &[(&str, &[u8])], password: &'static [u8]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().with_deprecated_encryption(password);
        for (name, body) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn archive(bytes: Vec<u8>, code: &str) -> EncryptedCredentialArchive {
        EncryptedCredentialArchive::new(bytes, ShareCode::new(code).unwrap())
    }

    #[test]
    fn returns_single_xml_entry_byte_for_byte() {
        let xml = b"<OfflinePaperlessKyc referenceId=\"1234\">\r\n\t<UidData/></OfflinePaperlessKyc>";
        let bytes = build_archive(&[("offlineaadhaar.xml", xml), ("readme.txt", b"ignored")], SHARE_CODE);

        let payload = archive(bytes, "4821").extract_xml().unwrap();
        assert_eq!(payload.as_slice(), xml.as_slice());
    }

    #[test]
    fn suffix_match_ignores_case() {
        let bytes = build_archive(&[("OFFLINE.XML", b"<a/>")], SHARE_CODE);
        assert_eq!(archive(bytes, "4821").extract_xml().unwrap().as_slice(), b"<a/>");
    }

    #[test]
    fn non_ascii_entry_names_are_skipped_cleanly() {
        let bytes = build_archive(
            &[("€ab", b"binary"), ("naïve€.txt", b"x"), ("offline.xml", b"<a/>")],
            SHARE_CODE,
        );
        assert_eq!(archive(bytes, "4821").extract_xml().unwrap().as_slice(), b"<a/>");

        let bytes = build_archive(&[("€ab", b"binary")], SHARE_CODE);
        assert!(matches!(archive(bytes, "4821").extract_xml(), Err(KycError::NoXmlEntry)));
    }

    #[test]
    fn archive_without_xml_is_a_format_error() {
        let bytes = build_archive(&[("photo.jpg", b"\xff\xd8"), ("notes.txt", b"x")], SHARE_CODE);
        let err = archive(bytes, "4821").extract_xml().unwrap_err();
        assert!(matches!(err, KycError::NoXmlEntry));
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn multiple_xml_entries_are_rejected() {
        let bytes = build_archive(&[("a.xml", b"<a/>"), ("b.xml", b"<b/>")], SHARE_CODE);
        match archive(bytes, "4821").extract_xml() {
            Err(KycError::AmbiguousEntry(names)) => assert_eq!(names, vec!["a.xml", "b.xml"]),
            other => panic!("expected AmbiguousEntry, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn wrong_share_code_yields_no_bytes() {
        let bytes = build_archive(&[("offline.xml", b"<OfflinePaperlessKyc/>")], SHARE_CODE);
        let err = archive(bytes, "9999").extract_xml().unwrap_err();
        assert!(matches!(err, KycError::WrongPassword), "got {:?}", err);
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        let err = archive(b"not a zip".to_vec(), "4821").extract_xml().unwrap_err();
        assert!(matches!(err, KycError::MalformedArchive(_)));
    }

    #[test]
    fn missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.zip");
        let err = EncryptedCredentialArchive::from_path(&path, ShareCode::new("4821").unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, KycError::ArchiveNotFound(p) if p == path));
    }

    #[test]
    fn share_code_validation() {
        assert!(ShareCode::new("").is_err());
        assert!(ShareCode::new("12").is_err());
        assert!(ShareCode::new("12 34").is_err());
        assert!(ShareCode::new("Ab12").is_ok());
        assert_eq!(format!("{:?}", ShareCode::new("Ab12").unwrap()), "ShareCode(***)");
    }
}
