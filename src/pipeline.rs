/**
 * Identity Pipeline
 * Verified credential photo checked against a live capture and an optional second document
 */

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use zeroize::Zeroizing;

use crate::archive::EncryptedCredentialArchive;
use crate::biometric::{BiometricService, PairVerification, TripleVerification};
use crate::credential::{CredentialService, SignatureAssurance, TrustMode, VerifiedCredential};
use crate::demographic::DemographicRecord;
use crate::error::{KycError, Result};

pub struct IdentityRequest {
    pub archive: EncryptedCredentialArchive,
    pub trust_mode: TrustMode,
    pub live_image: Zeroizing<Vec<u8>>,
    /// Second official photo, e.g. a passport scan.
    pub secondary_image: Option<Zeroizing<Vec<u8>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FaceDecision {
    Pair(PairVerification),
    Triple(TripleVerification),
}

impl FaceDecision {
    pub fn verified(&self) -> bool {
        match self {
            Self::Pair(pair) => pair.verified,
            Self::Triple(triple) => triple.verified,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityVerification {
    pub record: DemographicRecord,
    pub assurance: SignatureAssurance,
    pub decision: FaceDecision,
    pub verified: bool,
}

#[derive(Clone)]
pub struct IdentityPipeline {
    credentials: Arc<CredentialService>,
    biometric: Arc<BiometricService>,
}

impl IdentityPipeline {
    pub fn new(credentials: Arc<CredentialService>, biometric: Arc<BiometricService>) -> Self {
        Self {
            credentials,
            biometric,
        }
    }

    pub async fn verify(&self, request: IdentityRequest) -> Result<IdentityVerification> {
        // Refuse before decrypting anything if faces cannot be compared.
        self.biometric.capability().require()?;

        let IdentityRequest {
            archive,
            trust_mode,
            live_image,
            secondary_image,
        } = request;

        let credentials = Arc::clone(&self.credentials);
        let VerifiedCredential { assurance, record } =
            run_blocking(move || credentials.verify(&archive, trust_mode)).await?;

        let photo = record.photo.as_ref().ok_or(KycError::MissingPhoto)?;
        let decision = match secondary_image {
            None => FaceDecision::Pair(self.biometric.verify_pair(photo.bytes(), &live_image).await?),
            Some(secondary) => FaceDecision::Triple(
                self.biometric
                    .verify_triple(photo.bytes(), &secondary, &live_image)
                    .await?,
            ),
        };

        let verified = decision.verified();
        info!(?assurance, verified, "identity verification finished");
        Ok(IdentityVerification {
            record,
            assurance,
            decision,
            verified,
        })
    }
}

/// Runs CPU-bound archive and signature work off the async executor.
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| KycError::Internal(format!("blocking task failed: {}", e)))?
}
