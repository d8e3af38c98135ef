/**
 * HTTP Surface
 * JSON endpoints over the credential service, the biometric service and the identity pipeline
 */

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::archive::{EncryptedCredentialArchive, ShareCode};
use crate::biometric::{decode_image, AggregationPolicy, BiometricService, PairVerification, TripleVerification};
use crate::credential::{CredentialService, SignatureAssurance, TrustMode, VerifiedCredential};
use crate::demographic::DemographicRecord;
use crate::embedding::FaceCapability;
use crate::error::{ErrorKind, KycError};
use crate::pipeline::{run_blocking, FaceDecision, IdentityPipeline, IdentityRequest, IdentityVerification};

#[derive(Clone)]
pub struct AppState {
    credentials: Arc<CredentialService>,
    biometric: Arc<BiometricService>,
    pipeline: IdentityPipeline,
}

impl AppState {
    pub fn new(credentials: CredentialService, biometric: BiometricService) -> Self {
        let credentials = Arc::new(credentials);
        let biometric = Arc::new(biometric);
        let pipeline = IdentityPipeline::new(Arc::clone(&credentials), Arc::clone(&biometric));
        Self {
            credentials,
            biometric,
            pipeline,
        }
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/credential/verify", post(credential_verify))
        .route("/credential/inspect", post(credential_inspect))
        .route("/face-match", post(face_match))
        .route("/multi-face-match", post(multi_face_match))
        .route("/kyc/verify", post(kyc_verify))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}

/// Response wrapper shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            error_code: None,
            data: Some(data),
        })
    }
}

pub enum ApiError {
    Kyc(KycError),
    Rejected(JsonRejection),
}

impl From<KycError> for ApiError {
    fn from(err: KycError) -> Self {
        Self::Kyc(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Input => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Format | ErrorKind::Security => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Kyc(err) => {
                let kind = err.kind();
                let message = if kind == ErrorKind::Internal {
                    error!(code = err.code(), "request failed: {}", err);
                    "internal error".to_string()
                } else {
                    warn!(code = err.code(), ?kind, "request rejected");
                    err.to_string()
                };
                (status_for(kind), err.code(), message)
            }
            Self::Rejected(rejection) => {
                warn!(status = %rejection.status(), "unreadable request body");
                (rejection.status(), "INVALID_REQUEST", rejection.body_text())
            }
        };

        let body = Envelope::<()> {
            success: false,
            message,
            error_code: Some(code),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<Envelope<T>>, ApiError>;

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> std::result::Result<T, ApiError> {
    payload.map(|Json(request)| request).map_err(ApiError::Rejected)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn decode_archive(archive_base64: &str, share_code: String) -> crate::Result<EncryptedCredentialArchive> {
    let share_code = ShareCode::new(share_code)?;
    let bytes = STANDARD
        .decode(archive_base64.trim())
        .map_err(|e| KycError::InvalidRequest(format!("archive_base64 is not valid base64: {}", e)))?;
    Ok(EncryptedCredentialArchive::new(bytes, share_code))
}

#[derive(Serialize)]
struct HealthData {
    status: &'static str,
    face_capability: FaceCapability,
    trust_anchor_configured: bool,
}

async fn health(State(state): State<AppState>) -> Json<Envelope<HealthData>> {
    Envelope::ok(
        "service is running",
        HealthData {
            status: "ok",
            face_capability: state.biometric.capability().clone(),
            trust_anchor_configured: state.credentials.has_trust_anchor(),
        },
    )
}

#[derive(Deserialize)]
struct CredentialVerifyRequest {
    archive_base64: String,
    share_code: String,
    trust_mode: TrustMode,
    mobile: Option<String>,
    email: Option<String>,
}

#[derive(Serialize)]
struct CredentialData {
    assurance: SignatureAssurance,
    record: DemographicRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    mobile_matches: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_matches: Option<bool>,
}

async fn credential_verify(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CredentialVerifyRequest>, JsonRejection>,
) -> ApiResult<CredentialData> {
    let request = body(payload)?;
    info!(trust_mode = ?request.trust_mode, "credential verification request");

    let archive = decode_archive(&request.archive_base64, request.share_code)?;
    let trust_mode = request.trust_mode;
    let credentials = Arc::clone(&state.credentials);
    let (credential, share_code) = run_blocking(move || {
        let credential = credentials.verify(&archive, trust_mode)?;
        Ok((credential, archive.share_code().clone()))
    })
    .await?;

    let VerifiedCredential { assurance, record } = credential;
    let mobile_matches = request
        .mobile
        .as_deref()
        .map(|mobile| record.matches_mobile(mobile, share_code.as_str()));
    let email_matches = request
        .email
        .as_deref()
        .map(|email| record.matches_email(email, share_code.as_str()));

    Ok(Envelope::ok(
        "credential signature verified",
        CredentialData {
            assurance,
            record,
            mobile_matches,
            email_matches,
        },
    ))
}

#[derive(Deserialize)]
struct CredentialInspectRequest {
    archive_base64: String,
    share_code: String,
}

async fn credential_inspect(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CredentialInspectRequest>, JsonRejection>,
) -> ApiResult<VerifiedCredential> {
    let request = body(payload)?;
    info!("credential inspection request");

    let archive = decode_archive(&request.archive_base64, request.share_code)?;
    let credentials = Arc::clone(&state.credentials);
    let credential = run_blocking(move || credentials.extract_without_signature_check(&archive)).await?;

    Ok(Envelope::ok("credential extracted without signature check", credential))
}

#[derive(Deserialize)]
struct FaceMatchRequest {
    image1_base64: String,
    image2_base64: String,
}

#[derive(Serialize)]
struct FaceMatchData {
    match_percentage: f64,
    is_match: bool,
    threshold: f64,
    model: String,
}

impl From<&PairVerification> for FaceMatchData {
    fn from(pair: &PairVerification) -> Self {
        Self {
            match_percentage: round2(pair.result.percentage),
            is_match: pair.verified,
            threshold: pair.result.threshold,
            model: pair.model.clone(),
        }
    }
}

async fn face_match(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FaceMatchRequest>, JsonRejection>,
) -> ApiResult<FaceMatchData> {
    let request = body(payload)?;
    info!("face match request");

    // Checked before decoding so no image is touched when comparison cannot run.
    state.biometric.capability().require()?;
    let first = decode_image("image1", &request.image1_base64)?;
    let second = decode_image("image2", &request.image2_base64)?;
    let pair = state.biometric.verify_pair(&first, &second).await?;

    Ok(Envelope::ok("face matching completed", FaceMatchData::from(&pair)))
}

#[derive(Deserialize)]
struct MultiFaceMatchRequest {
    passport_image_base64: String,
    aadhaar_image_base64: String,
    live_image_base64: String,
}

#[derive(Serialize)]
struct MultiFaceMatchData {
    passport_live_match_percent: f64,
    aadhaar_live_match_percent: f64,
    passport_aadhaar_match_percent: f64,
    threshold_percent: f64,
    policy: AggregationPolicy,
    verified: bool,
    model: String,
}

impl From<&TripleVerification> for MultiFaceMatchData {
    /// The identity-card photo is the reference, the passport the secondary.
    fn from(triple: &TripleVerification) -> Self {
        Self {
            passport_live_match_percent: round2(triple.secondary_live.percentage),
            aadhaar_live_match_percent: round2(triple.reference_live.percentage),
            passport_aadhaar_match_percent: round2(triple.reference_secondary.percentage),
            threshold_percent: triple.reference_live.threshold,
            policy: triple.policy,
            verified: triple.verified,
            model: triple.model.clone(),
        }
    }
}

fn triple_message(verified: bool) -> &'static str {
    if verified {
        "live capture matches both document photos"
    } else {
        "face verification failed"
    }
}

async fn multi_face_match(
    State(state): State<AppState>,
    payload: std::result::Result<Json<MultiFaceMatchRequest>, JsonRejection>,
) -> ApiResult<MultiFaceMatchData> {
    let request = body(payload)?;
    info!("multi-face match request");

    state.biometric.capability().require()?;
    let passport = decode_image("passport image", &request.passport_image_base64)?;
    let aadhaar = decode_image("aadhaar image", &request.aadhaar_image_base64)?;
    let live = decode_image("live image", &request.live_image_base64)?;
    let triple = state.biometric.verify_triple(&aadhaar, &passport, &live).await?;

    Ok(Envelope::ok(
        triple_message(triple.verified),
        MultiFaceMatchData::from(&triple),
    ))
}

#[derive(Deserialize)]
struct KycVerifyRequest {
    archive_base64: String,
    share_code: String,
    trust_mode: TrustMode,
    live_image_base64: String,
    passport_image_base64: Option<String>,
}

#[derive(Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum FaceData {
    Pair(FaceMatchData),
    Triple(MultiFaceMatchData),
}

#[derive(Serialize)]
struct KycData {
    verified: bool,
    assurance: SignatureAssurance,
    record: DemographicRecord,
    face: FaceData,
}

async fn kyc_verify(
    State(state): State<AppState>,
    payload: std::result::Result<Json<KycVerifyRequest>, JsonRejection>,
) -> ApiResult<KycData> {
    let request = body(payload)?;
    info!(
        trust_mode = ?request.trust_mode,
        with_passport = request.passport_image_base64.is_some(),
        "identity verification request"
    );

    state.biometric.capability().require()?;
    let archive = decode_archive(&request.archive_base64, request.share_code)?;
    let live_image = decode_image("live image", &request.live_image_base64)?;
    let secondary_image = request
        .passport_image_base64
        .as_deref()
        .map(|encoded| decode_image("passport image", encoded))
        .transpose()?;

    let IdentityVerification {
        record,
        assurance,
        decision,
        verified,
    } = state
        .pipeline
        .verify(IdentityRequest {
            archive,
            trust_mode: request.trust_mode,
            live_image,
            secondary_image,
        })
        .await?;

    let face = match &decision {
        FaceDecision::Pair(pair) => FaceData::Pair(FaceMatchData::from(pair)),
        FaceDecision::Triple(triple) => FaceData::Triple(MultiFaceMatchData::from(triple)),
    };
    let message = if verified {
        "identity verified"
    } else {
        "identity not verified"
    };

    Ok(Envelope::ok(
        message,
        KycData {
            verified,
            assurance,
            record,
            face,
        },
    ))
}
