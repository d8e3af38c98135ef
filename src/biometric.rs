/**
 * Biometric Service
 * Pairwise and three-way face comparison over an injected embedding provider
 */

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use tracing::info;
use zeroize::Zeroizing;

use crate::embedding::{EmbeddingProvider, FaceCapability, FaceEmbedding};
use crate::error::{KycError, Result};
use crate::similarity::{compare, MatchThreshold, SimilarityResult};

/// How the three scores of a triple comparison become one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Both comparisons against the live capture must match.
    LiveAnchored,
    /// All three comparisons must match.
    FullTriangle,
}

impl AggregationPolicy {
    pub fn decide(
        &self,
        reference_live: &SimilarityResult,
        secondary_live: &SimilarityResult,
        reference_secondary: &SimilarityResult,
    ) -> bool {
        let anchored = reference_live.is_match && secondary_live.is_match;
        match self {
            Self::LiveAnchored => anchored,
            Self::FullTriangle => anchored && reference_secondary.is_match,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PairVerification {
    pub model: String,
    pub result: SimilarityResult,
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TripleVerification {
    pub model: String,
    pub reference_live: SimilarityResult,
    pub secondary_live: SimilarityResult,
    pub reference_secondary: SimilarityResult,
    pub policy: AggregationPolicy,
    pub verified: bool,
}

impl TripleVerification {
    /// Re-evaluates the same scores under another policy.
    pub fn decide_with(&self, policy: AggregationPolicy) -> bool {
        policy.decide(
            &self.reference_live,
            &self.secondary_live,
            &self.reference_secondary,
        )
    }
}

pub struct BiometricService {
    capability: FaceCapability,
    provider: Arc<dyn EmbeddingProvider>,
    threshold: MatchThreshold,
}

impl BiometricService {
    pub const POLICY: AggregationPolicy = AggregationPolicy::LiveAnchored;

    pub fn new(
        capability: FaceCapability,
        provider: Arc<dyn EmbeddingProvider>,
        threshold: MatchThreshold,
    ) -> Self {
        Self {
            capability,
            provider,
            threshold,
        }
    }

    pub fn capability(&self) -> &FaceCapability {
        &self.capability
    }

    pub fn threshold(&self) -> MatchThreshold {
        self.threshold
    }

    pub async fn verify_pair(&self, first: &[u8], second: &[u8]) -> Result<PairVerification> {
        let model = self.capability.require()?.to_string();

        let a = self.embed("first image", first).await?;
        let b = self.embed("second image", second).await?;
        let result = compare(&a, &b, self.threshold)?;

        info!(
            percentage = result.percentage,
            verified = result.is_match,
            "pairwise face comparison"
        );
        Ok(PairVerification {
            model,
            verified: result.is_match,
            result,
        })
    }

    /// Compares an identity-document photo, a second official photo and a live capture.
    pub async fn verify_triple(
        &self,
        reference: &[u8],
        secondary: &[u8],
        live: &[u8],
    ) -> Result<TripleVerification> {
        let model = self.capability.require()?.to_string();

        let reference = self.embed("reference image", reference).await?;
        let secondary = self.embed("secondary image", secondary).await?;
        let live = self.embed("live image", live).await?;

        let reference_live = compare(&reference, &live, self.threshold)?;
        let secondary_live = compare(&secondary, &live, self.threshold)?;
        let reference_secondary = compare(&reference, &secondary, self.threshold)?;
        let verified = Self::POLICY.decide(&reference_live, &secondary_live, &reference_secondary);

        info!(
            reference_live = reference_live.percentage,
            secondary_live = secondary_live.percentage,
            reference_secondary = reference_secondary.percentage,
            verified,
            "three-way face comparison"
        );
        Ok(TripleVerification {
            model,
            reference_live,
            secondary_live,
            reference_secondary,
            policy: Self::POLICY,
            verified,
        })
    }

    async fn embed(&self, label: &str, image: &[u8]) -> Result<FaceEmbedding> {
        if image.is_empty() {
            return Err(KycError::InvalidImage(format!("{} is empty", label)));
        }
        self.provider.embed(image).await.map_err(|e| match e {
            KycError::NoFaceDetected(_) => KycError::NoFaceDetected(label.to_string()),
            other => other,
        })
    }
}

/// Decodes a base64 image, accepting an optional `data:<mime>;base64,` prefix.
pub fn decode_image(label: &str, encoded: &str) -> Result<Zeroizing<Vec<u8>>> {
    let encoded = encoded.trim();
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| KycError::InvalidImage(format!("{} has a malformed data URL", label)))?,
        None => encoded,
    };

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| KycError::InvalidImage(format!("{} is not valid base64: {}", label, e)))?;
    if bytes.is_empty() {
        return Err(KycError::InvalidImage(format!("{} is empty", label)));
    }
    Ok(Zeroizing::new(bytes))
}
