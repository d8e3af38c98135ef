/**
 * Embedding Provider
 * Turns a face image into a fixed-length vector through an external model runner
 */

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{KycError, Result};

pub const DEFAULT_MODEL: &str = "Facenet";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const NO_FACE: &str = "no_face_detected";

/// A face embedding tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmbedding {
    model: String,
    vector: Vec<f32>,
}

impl FaceEmbedding {
    pub fn new(model: impl Into<String>, vector: Vec<f32>) -> Result<Self> {
        if vector.is_empty() {
            return Err(KycError::Internal("embedding vector is empty".into()));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(KycError::Internal("embedding contains non-finite values".into()));
        }
        Ok(Self {
            model: model.into(),
            vector,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Whether face comparison can run in this process. Decided once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FaceCapability {
    Available { model: String },
    Unavailable { reason: String },
}

impl FaceCapability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    /// Fails with `ProviderUnavailable` unless the capability is present.
    pub fn require(&self) -> Result<&str> {
        match self {
            Self::Available { model } => Ok(model),
            Self::Unavailable { reason } => Err(KycError::ProviderUnavailable(reason.clone())),
        }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Embeds the single face in `image`.
    ///
    /// Returns `NoFaceDetected` when the image holds no face and
    /// `ProviderUnavailable` when the model cannot be run.
    async fn embed(&self, image: &[u8]) -> Result<FaceEmbedding>;
}

#[derive(Deserialize)]
struct EmbedderOutput {
    embedding: Option<Vec<f32>>,
    error: Option<String>,
}

/// Runs `program [args..] <model> <image-path>` and reads a JSON answer from stdout.
#[derive(Debug, Clone)]
pub struct CommandEmbeddingProvider {
    program: PathBuf,
    args: Vec<String>,
    model: String,
    timeout: Duration,
    scratch_dir: Option<PathBuf>,
}

impl CommandEmbeddingProvider {
    pub fn new(program: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
            scratch_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Checks that the program can be found, without running it.
    pub fn probe(&self) -> FaceCapability {
        if locate(&self.program).is_some() {
            FaceCapability::Available {
                model: self.model.clone(),
            }
        } else {
            FaceCapability::Unavailable {
                reason: format!("embedder program {} not found", self.program.display()),
            }
        }
    }

    fn scratch_file(&self, image: &[u8]) -> Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("kyc-face-");
        let created = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file =
            created.map_err(|e| KycError::ProviderUnavailable(format!("scratch file: {}", e)))?;
        file.write_all(image)
            .and_then(|_| file.flush())
            .map_err(|e| KycError::ProviderUnavailable(format!("scratch file: {}", e)))?;
        Ok(file)
    }
}

#[async_trait]
impl EmbeddingProvider for CommandEmbeddingProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, image: &[u8]) -> Result<FaceEmbedding> {
        // Removed when dropped at the end of this call.
        let scratch = self.scratch_file(image)?;

        debug!(program = %self.program.display(), model = %self.model, "running embedder");
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.model)
            .arg(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                KycError::ProviderUnavailable(format!(
                    "cannot start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| KycError::ProviderUnavailable(format!("embedder failed: {}", e)))?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "embedder timed out");
                return Err(KycError::ProviderUnavailable(format!(
                    "embedder timed out after {:?}",
                    self.timeout
                )));
            }
        };
        drop(scratch);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KycError::ProviderUnavailable(format!(
                "embedder exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let parsed: EmbedderOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| KycError::ProviderUnavailable(format!("unreadable embedder output: {}", e)))?;

        match (parsed.embedding, parsed.error) {
            (_, Some(error)) if error == NO_FACE => Err(KycError::NoFaceDetected("image".into())),
            (_, Some(error)) => Err(KycError::ProviderUnavailable(error)),
            (Some(vector), None) => FaceEmbedding::new(self.model.clone(), vector)
                .map_err(|e| KycError::ProviderUnavailable(format!("unusable embedding: {}", e))),
            (None, None) => Err(KycError::ProviderUnavailable(
                "embedder output has neither embedding nor error".into(),
            )),
        }
    }
}

/// Stand-in when no embedder is configured; every call is refused.
#[derive(Debug, Clone)]
pub struct UnconfiguredProvider {
    model: String,
}

impl UnconfiguredProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

#[async_trait]
impl EmbeddingProvider for UnconfiguredProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, _image: &[u8]) -> Result<FaceEmbedding> {
        Err(KycError::ProviderUnavailable("no embedder configured".into()))
    }
}

/// Resolves a program the way the shell would: a path is checked directly,
/// a bare name is searched for on `PATH`.
fn locate(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
