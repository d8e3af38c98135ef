#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use offline_kyc::c14n::{self, Canonicalization};
use offline_kyc::embedding::{EmbeddingProvider, FaceEmbedding};
use offline_kyc::signature::DSIG_NS;
use offline_kyc::KycError;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, RsaEncoding, RsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use sha2::{Digest, Sha256, Sha512};
use zip::unstable::write::FileOptionsExt;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const SHARE_CODE: &str = "4821";
pub const CREDENTIAL_PHOTO: &[u8] = b"credential-photo-jpeg";

const ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";

/// RSA-2048 issuer key (PKCS#8 DER) and its self-signed certificate, generated with openssl.
const RSA_KEY_PKCS8: &[u8] = include_bytes!("../fixtures/issuer-rsa.pk8");
const RSA_CERTIFICATE_PEM: &str = include_str!("../fixtures/issuer-rsa.crt.pem");

/// Offline eKYC document with a photo; `dob` is only given under the fallback name.
pub fn credential_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OfflinePaperlessKyc referenceId="912320190321120945871">
  <UidData>
    <Poi dobt="1990" gender="F" name="Asha Verma" e="" m=""/>
    <Poa careof="D/O: Ravi Verma" country="India" dist="Pune" house="12B" pc="411001" state="Maharashtra" vtc="Pune City"/>
    <Pht>{}</Pht>
  </UidData>
</OfflinePaperlessKyc>
"#,
        STANDARD.encode(CREDENTIAL_PHOTO)
    )
}

pub fn credential_xml_without_photo() -> String {
    r#"<OfflinePaperlessKyc referenceId="1234"><UidData><Poi name="Asha Verma"/><Poa state="Kerala"/></UidData></OfflinePaperlessKyc>"#
        .to_string()
}

enum SigningKey {
    Ecdsa(EcdsaKeyPair),
    Rsa(RsaKeyPair),
}

/// Issuer key with a self-signed certificate. Signs with the configured
/// SignatureMethod and DigestMethod.
pub struct Issuer {
    key: SigningKey,
    rng: SystemRandom,
    signature_method: &'static str,
    digest_method: &'static str,
    pub certificate_pem: String,
    certificate_base64: String,
}

impl Issuer {
    /// Fresh P-256 key, ecdsa-sha256 over a sha256 digest.
    pub fn new() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let key = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng).unwrap();

        let key_pair = rcgen::KeyPair::try_from(pkcs8.as_ref()).unwrap();
        let certificate = rcgen::CertificateParams::new(vec!["uidai.test".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();

        Self {
            key: SigningKey::Ecdsa(key),
            rng,
            signature_method: ECDSA_SHA256,
            digest_method: DIGEST_SHA256,
            certificate_pem: certificate.pem(),
            certificate_base64: STANDARD.encode(certificate.der()),
        }
    }

    /// The checked-in RSA-2048 key with the given RSA SignatureMethod and DigestMethod.
    pub fn rsa(signature_method: &'static str, digest_method: &'static str) -> Self {
        let key = RsaKeyPair::from_pkcs8(RSA_KEY_PKCS8).unwrap();
        let certificate_base64: String = RSA_CERTIFICATE_PEM
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();

        Self {
            key: SigningKey::Rsa(key),
            rng: SystemRandom::new(),
            signature_method,
            digest_method,
            certificate_pem: RSA_CERTIFICATE_PEM.to_string(),
            certificate_base64,
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self.digest_method {
            DIGEST_SHA1 => ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, data)
                .as_ref()
                .to_vec(),
            DIGEST_SHA256 => Sha256::digest(data).to_vec(),
            DIGEST_SHA512 => Sha512::digest(data).to_vec(),
            other => panic!("no digest for {}", other),
        }
    }

    fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        match &self.key {
            SigningKey::Ecdsa(key) => key.sign(&self.rng, message).unwrap().as_ref().to_vec(),
            SigningKey::Rsa(key) => {
                let padding: &'static dyn RsaEncoding = match self.signature_method {
                    RSA_SHA1 => &ring::signature::RSA_PKCS1_SHA1_FOR_LEGACY_USE_ONLY,
                    RSA_SHA256 => &ring::signature::RSA_PKCS1_SHA256,
                    RSA_SHA512 => &ring::signature::RSA_PKCS1_SHA512,
                    other => panic!("no RSA padding for {}", other),
                };
                let mut signature = vec![0; key.public().modulus_len()];
                key.sign(padding, &self.rng, message, &mut signature).unwrap();
                signature
            }
        }
    }

    /// Appends an enveloped signature as the last child of the document element.
    pub fn sign(&self, unsigned: &str, embed_certificate: bool) -> String {
        let doc = roxmltree::Document::parse(unsigned).unwrap();
        let canonical = c14n::canonicalize(doc.root(), None, &Canonicalization::default());
        let digest = STANDARD.encode(self.digest(&canonical));

        let signed_info = format!(
            "<SignedInfo>\
             <CanonicalizationMethod Algorithm=\"{}\"></CanonicalizationMethod>\
             <SignatureMethod Algorithm=\"{}\"></SignatureMethod>\
             <Reference URI=\"\"><Transforms><Transform Algorithm=\"{}\"></Transform></Transforms>\
             <DigestMethod Algorithm=\"{}\"></DigestMethod><DigestValue>{}</DigestValue></Reference>\
             </SignedInfo>",
            c14n::C14N_10,
            self.signature_method,
            ENVELOPED,
            self.digest_method,
            digest
        );
        let key_info = if embed_certificate {
            format!(
                "<KeyInfo><X509Data><X509Certificate>{}</X509Certificate></X509Data></KeyInfo>",
                self.certificate_base64
            )
        } else {
            String::new()
        };
        let with_value = |value: &str| {
            let signature = format!(
                "<Signature xmlns=\"{}\">{}<SignatureValue>{}</SignatureValue>{}</Signature>",
                DSIG_NS, signed_info, value, key_info
            );
            let close = unsigned.rfind("</").unwrap();
            format!("{}{}{}", &unsigned[..close], signature, &unsigned[close..])
        };

        let draft = with_value("");
        let draft_doc = roxmltree::Document::parse(&draft).unwrap();
        let signed_info_node = draft_doc
            .descendants()
            .find(|n| n.has_tag_name((DSIG_NS, "SignedInfo")))
            .unwrap();
        let canonical_signed_info = c14n::canonicalize(signed_info_node, None, &Canonicalization::default());
        let signature = self.sign_bytes(&canonical_signed_info);

        with_value(&STANDARD.encode(signature))
    }
}

pub fn encrypted_zip(entries: &[(&str, &[u8])], password: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().with_deprecated_encryption(password.as_bytes());
    for (name, body) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn credential_archive(xml: &str) -> Vec<u8> {
    encrypted_zip(&[("offlineaadhaar20190321.xml", xml.as_bytes())], SHARE_CODE)
}

/// Embeds images by table lookup; unknown images contain no face.
pub struct TableProvider {
    table: HashMap<Vec<u8>, Vec<f32>>,
}

impl TableProvider {
    pub fn new(entries: Vec<(Vec<u8>, Vec<f32>)>) -> Arc<Self> {
        Arc::new(Self {
            table: entries.into_iter().collect(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for TableProvider {
    fn model(&self) -> &str {
        "Facenet"
    }

    async fn embed(&self, image: &[u8]) -> offline_kyc::Result<FaceEmbedding> {
        match self.table.get(image) {
            Some(vector) => FaceEmbedding::new("Facenet", vector.clone()),
            None => Err(KycError::NoFaceDetected("image".into())),
        }
    }
}
