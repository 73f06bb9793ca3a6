pub mod sora;

use crate::clip_plan::ClipLength;
use crate::error::{ChainError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub use sora::SoraClient;

/// Region of the seed image the backend should use, as fractions of width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropBox {
    pub left_fraction: f64,
    pub top_fraction: f64,
    pub right_fraction: f64,
    pub bottom_fraction: f64,
}

impl Default for CropBox {
    fn default() -> Self {
        Self {
            left_fraction: 0.0,
            top_fraction: 0.0,
            right_fraction: 1.0,
            bottom_fraction: 1.0,
        }
    }
}

impl CropBox {
    pub fn validate(&self) -> Result<()> {
        let fractions = [
            ("left", self.left_fraction),
            ("top", self.top_fraction),
            ("right", self.right_fraction),
            ("bottom", self.bottom_fraction),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(ChainError::configuration(format!(
                    "crop {} must be within [0, 1] (got {})",
                    name, value
                )));
            }
        }
        if self.left_fraction >= self.right_fraction || self.top_fraction >= self.bottom_fraction {
            return Err(ChainError::configuration("crop box is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedImage {
    pub path: PathBuf,
    pub frame_index: u32,
    pub crop: CropBox,
}

impl SeedImage {
    /// Whole image placed on the first generated frame.
    pub fn first_frame(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame_index: 0,
            crop: CropBox::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipRequest {
    pub prompt: String,
    pub length: ClipLength,
    pub size: String,
    pub seed: Option<SeedImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    #[serde(alias = "preprocessing", alias = "in_progress", alias = "processing")]
    Running,
    #[serde(alias = "completed")]
    Succeeded,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Remote generation job as reported by the backend. Read-only for callers.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<JobError>,
}

impl Job {
    pub fn failure(&self) -> ChainError {
        let (code, message) = match &self.error {
            Some(err) => (
                err.code.clone().unwrap_or_else(|| "unknown".to_string()),
                err.message.clone().unwrap_or_default(),
            ),
            None => ("unknown".to_string(), format!("job {} ended as {:?}", self.id, self.status)),
        };
        ChainError::Generation { code, message }
    }
}

/// Produces one finished clip per call, blocking until the remote job ends.
#[async_trait]
pub trait ClipGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &ClipRequest,
        out_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
