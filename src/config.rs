/**
 * Configuration
 * Process settings read from KYC_* environment variables
 */

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::biometric::BiometricService;
use crate::certificate::TrustedCertificate;
use crate::credential::CredentialService;
use crate::embedding::{
    CommandEmbeddingProvider, EmbeddingProvider, FaceCapability, UnconfiguredProvider, DEFAULT_MODEL,
    DEFAULT_TIMEOUT,
};
use crate::error::{KycError, Result};
use crate::similarity::MatchThreshold;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub match_threshold: MatchThreshold,
    pub face_model: String,
    pub trust_anchor: Option<PathBuf>,
    pub embedder_program: Option<PathBuf>,
    pub embedder_args: Vec<String>,
    pub embedder_timeout: Duration,
    pub scratch_dir: Option<PathBuf>,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            match_threshold: MatchThreshold::default(),
            face_model: DEFAULT_MODEL.to_string(),
            trust_anchor: None,
            embedder_program: None,
            embedder_args: Vec::new(),
            embedder_timeout: DEFAULT_TIMEOUT,
            scratch_dir: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let bind_addr = match get("KYC_BIND_ADDR") {
            Some(addr) => parse(&addr, "KYC_BIND_ADDR")?,
            None => defaults.bind_addr,
        };
        let match_threshold = match get("KYC_MATCH_THRESHOLD") {
            Some(value) => MatchThreshold::new(parse(&value, "KYC_MATCH_THRESHOLD")?)?,
            None => defaults.match_threshold,
        };
        let embedder_timeout = match get("KYC_EMBEDDER_TIMEOUT_SECS") {
            Some(value) => {
                let secs: u64 = parse(&value, "KYC_EMBEDDER_TIMEOUT_SECS")?;
                if secs == 0 {
                    return Err(KycError::Config("KYC_EMBEDDER_TIMEOUT_SECS must be positive".into()));
                }
                Duration::from_secs(secs)
            }
            None => defaults.embedder_timeout,
        };
        let max_body_bytes = match get("KYC_MAX_BODY_BYTES") {
            Some(value) => parse(&value, "KYC_MAX_BODY_BYTES")?,
            None => defaults.max_body_bytes,
        };

        Ok(Self {
            bind_addr,
            match_threshold,
            face_model: get("KYC_FACE_MODEL").unwrap_or(defaults.face_model),
            trust_anchor: get("KYC_TRUST_ANCHOR").map(PathBuf::from),
            embedder_program: get("KYC_EMBEDDER_PROGRAM").map(PathBuf::from),
            embedder_args: get("KYC_EMBEDDER_ARGS")
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            embedder_timeout,
            scratch_dir: get("KYC_SCRATCH_DIR").map(PathBuf::from),
            max_body_bytes,
        })
    }

    /// Loads the trust anchor, if one is configured. A configured but
    /// unreadable anchor is fatal.
    pub fn credential_service(&self) -> Result<CredentialService> {
        let anchor = match &self.trust_anchor {
            Some(path) => {
                let anchor = TrustedCertificate::trust_anchor_from_file(path)?;
                info!(path = %path.display(), "trust anchor loaded");
                Some(anchor)
            }
            None => {
                warn!("no trust anchor configured; only embedded-certificate verification is possible");
                None
            }
        };
        Ok(CredentialService::new(anchor))
    }

    /// Builds the embedding provider and probes it once.
    pub fn biometric_service(&self) -> BiometricService {
        let (capability, provider): (FaceCapability, Arc<dyn EmbeddingProvider>) =
            match &self.embedder_program {
                Some(program) => {
                    let mut provider = CommandEmbeddingProvider::new(program, self.face_model.clone())
                        .with_args(self.embedder_args.clone())
                        .with_timeout(self.embedder_timeout);
                    if let Some(dir) = &self.scratch_dir {
                        provider = provider.with_scratch_dir(dir);
                    }
                    (provider.probe(), Arc::new(provider) as Arc<dyn EmbeddingProvider>)
                }
                None => (
                    FaceCapability::Unavailable {
                        reason: "KYC_EMBEDDER_PROGRAM is not set".into(),
                    },
                    Arc::new(UnconfiguredProvider::new(self.face_model.clone())) as Arc<dyn EmbeddingProvider>,
                ),
            };

        match &capability {
            FaceCapability::Available { model } => info!(%model, "face comparison available"),
            FaceCapability::Unavailable { reason } => warn!(%reason, "face comparison unavailable"),
        }
        BiometricService::new(capability, provider, self.match_threshold)
    }
}

fn parse<T>(value: &str, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| KycError::Config(format!("{}={:?}: {}", key, value, e)))
}
