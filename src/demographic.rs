/**
 * Demographic Parser
 * Extracts the identity record from an offline eKYC XML document
 */

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use roxmltree::{Document, Node};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{KycError, Result};
use crate::signature::SignedXmlDocument;

/// Date-of-birth attribute names, in resolution order.
const DOB_ATTRIBUTES: [&str; 2] = ["dob", "dobt"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemographicRecord {
    pub reference_id: String,
    pub name: Option<String>,
    pub dob: Option<String>,
    pub gender: Option<String>,
    pub email_hash: Option<String>,
    pub mobile_hash: Option<String>,
    pub address: Address,
    #[serde(rename = "photo_base64", skip_serializing_if = "Option::is_none")]
    pub photo: Option<Photo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Address {
    pub care_of: Option<String>,
    pub house: Option<String>,
    pub street: Option<String>,
    pub landmark: Option<String>,
    pub locality: Option<String>,
    pub sub_district: Option<String>,
    pub district: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub post_office: Option<String>,
}

/// Decoded image bytes of the credential photo; serialized as base64.
#[derive(Clone, PartialEq)]
pub struct Photo(Zeroizing<Vec<u8>>);

impl Photo {
    pub fn from_base64(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map(|bytes| Self(Zeroizing::new(bytes)))
            .map_err(|_| KycError::MalformedPhoto)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes())
    }
}

impl std::fmt::Debug for Photo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Photo({} bytes)", self.0.len())
    }
}

impl Serialize for Photo {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl DemographicRecord {
    /// Parses raw XML bytes without looking at the signature.
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let doc = SignedXmlDocument::parse(xml)?;
        Self::from_document(doc.document())
    }

    pub fn from_document(doc: &Document<'_>) -> Result<Self> {
        let root = doc.root_element();
        let reference_id = root
            .attribute("referenceId")
            .ok_or(KycError::MissingRequiredSection("referenceId"))?
            .to_string();

        let uid_data = child(root, "UidData").ok_or(KycError::MissingRequiredSection("UidData"))?;
        let poi = child(uid_data, "Poi").ok_or(KycError::MissingRequiredSection("Poi"))?;
        let poa = child(uid_data, "Poa").ok_or(KycError::MissingRequiredSection("Poa"))?;

        let photo = child(uid_data, "Pht")
            .and_then(|pht| pht.text())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(Photo::from_base64)
            .transpose()?;

        Ok(Self {
            reference_id,
            name: attr(poi, "name"),
            dob: DOB_ATTRIBUTES
                .iter()
                .find_map(|name| attr(poi, name).filter(|v| !v.is_empty())),
            gender: attr(poi, "gender"),
            email_hash: attr(poi, "e"),
            mobile_hash: attr(poi, "m"),
            address: Address {
                care_of: attr(poa, "careof"),
                house: attr(poa, "house"),
                street: attr(poa, "street"),
                landmark: attr(poa, "loc"),
                locality: attr(poa, "vtc"),
                sub_district: attr(poa, "subdist"),
                district: attr(poa, "dist"),
                state: attr(poa, "state"),
                postal_code: attr(poa, "pc"),
                country: attr(poa, "country"),
                post_office: attr(poa, "po"),
            },
            photo,
        })
    }

    /// Checks a mobile number against the hashed value in the credential.
    pub fn matches_mobile(&self, mobile: &str, share_code: &str) -> bool {
        self.matches_contact(self.mobile_hash.as_deref(), mobile, share_code)
    }

    /// Checks an email address against the hashed value in the credential.
    pub fn matches_email(&self, email: &str, share_code: &str) -> bool {
        self.matches_contact(self.email_hash.as_deref(), email, share_code)
    }

    fn matches_contact(&self, stored: Option<&str>, value: &str, share_code: &str) -> bool {
        let Some(stored) = stored else {
            return false;
        };
        contact_hash(value, share_code, self.hash_rounds()).eq_ignore_ascii_case(stored)
    }

    /// The fourth character of the reference id is the last digit of the
    /// identity number; it sets how many times the contact value is re-hashed.
    fn hash_rounds(&self) -> u32 {
        self.reference_id
            .chars()
            .nth(3)
            .and_then(|c| c.to_digit(10))
            .unwrap_or(1)
            .max(1)
    }
}

fn contact_hash(value: &str, share_code: &str, rounds: u32) -> String {
    let mut current = format!("{}{}", value, share_code);
    for _ in 0..rounds {
        current = hex::encode(Sha256::digest(current.as_bytes()));
    }
    current
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn attr(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}
