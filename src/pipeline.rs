//! Segment chain orchestration.
//!
//! Segments are produced strictly one after another: segment `i + 1` is
//! conditioned on the last frame of segment `i`, and offsets for the final
//! crossfade are computed from measured durations, never requested ones.

use crate::api::{ClipGenerator, ClipRequest, SeedImage};
use crate::clip_plan::{BACKEND_MAX_SECONDS, PromptStyle, SegmentPlan, SegmentSpec};
use crate::compositor::{Composition, Compositor};
use crate::error::{ChainError, Result};
use crate::ffmpeg::MediaToolkit;
use crate::{init, logi, logok, logw, padder};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SIZE: &str = "1280x720";

/// Which optional stages run. Each variant adds a stage to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Strategy {
    /// Text-only segments joined by stream copy.
    Independent,
    /// Segments seeded from the previous last frame, joined by stream copy.
    Seeded,
    /// Seeded segments blended with crossfades at measured offsets.
    SeededCrossfade,
    /// Seeded, padded with a still lead-in, then crossfaded.
    #[default]
    SeededPadded,
}

impl Strategy {
    pub fn seeds(self) -> bool {
        !matches!(self, Self::Independent)
    }

    pub fn crossfades(self) -> bool {
        matches!(self, Self::SeededCrossfade | Self::SeededPadded)
    }

    pub fn pads(self) -> bool {
        matches!(self, Self::SeededPadded)
    }

    fn prompt_style(self) -> PromptStyle {
        if self.seeds() {
            PromptStyle::Continuation
        } else {
            PromptStyle::Numbered
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChainRequest {
    pub prompt: String,
    pub total_duration: f64,
    pub segment_duration: f64,
    pub crossfade: f64,
    /// Defaults to `crossfade` so the still lead-in covers the blend window.
    pub pad_duration: Option<f64>,
    pub size: Option<String>,
    pub output: PathBuf,
    pub work_dir: PathBuf,
    pub strategy: Strategy,
    pub keep_intermediates: bool,
}

impl ChainRequest {
    pub fn new(prompt: impl Into<String>, total_duration: f64, output: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            total_duration,
            segment_duration: BACKEND_MAX_SECONDS,
            crossfade: 1.0,
            pad_duration: None,
            size: None,
            output: output.into(),
            work_dir: PathBuf::from("."),
            strategy: Strategy::default(),
            keep_intermediates: false,
        }
    }

    pub fn effective_pad(&self) -> f64 {
        self.pad_duration.unwrap_or(self.crossfade)
    }

    /// Range checks that must pass before any external call.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(ChainError::configuration("prompt must not be empty"));
        }
        if !(self.total_duration > 0.0) {
            return Err(ChainError::configuration(format!(
                "duration must be positive (got {})",
                self.total_duration
            )));
        }
        if !(self.segment_duration > 0.0) || self.segment_duration > BACKEND_MAX_SECONDS {
            return Err(ChainError::configuration(format!(
                "segment duration must be between 0 and {} seconds (got {})",
                BACKEND_MAX_SECONDS, self.segment_duration
            )));
        }
        if !(self.crossfade >= 0.0) || self.crossfade > self.segment_duration {
            return Err(ChainError::configuration(format!(
                "crossfade must be between 0 and the segment duration {} (got {})",
                self.segment_duration, self.crossfade
            )));
        }
        let pad = self.effective_pad();
        if !(pad >= 0.0) {
            return Err(ChainError::configuration(format!(
                "pad-start must not be negative (got {})",
                pad
            )));
        }
        if let Some(size) = &self.size {
            validate_size(size)?;
        }
        Ok(())
    }
}

fn size_regex() -> Result<&'static Regex> {
    static SIZE_RE: OnceCell<Regex> = OnceCell::new();
    SIZE_RE.get_or_try_init(|| {
        Regex::new(r"^(\d{2,5})x(\d{2,5})$").map_err(|e| ChainError::configuration(e.to_string()))
    })
}

pub fn validate_size(size: &str) -> Result<(u32, u32)> {
    let caps = size_regex()?
        .captures(size)
        .ok_or_else(|| ChainError::configuration(format!("size must be WIDTHxHEIGHT (got {})", size)))?;
    let w = caps[1].parse::<u32>().unwrap_or(0);
    let h = caps[2].parse::<u32>().unwrap_or(0);
    if w == 0 || h == 0 {
        return Err(ChainError::configuration(format!("size must be non-zero (got {})", size)));
    }
    Ok((w, h))
}

/// A generated (and possibly padded) segment with its measured timing.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentArtifact {
    pub index: usize,
    pub path: PathBuf,
    pub measured_duration: f64,
    pub measured_fps: Option<f64>,
    pub has_audio: bool,
    pub padded_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub output: PathBuf,
    pub segments: Vec<SegmentArtifact>,
    pub composition: Composition,
}

pub fn segment_file(work_dir: &Path, number: usize) -> PathBuf {
    work_dir.join(format!("segment_{}.mp4", number))
}

pub fn frame_file(work_dir: &Path, number: usize) -> PathBuf {
    work_dir.join(format!("frame_{}.jpg", number))
}

/// Deletes `paths`, ignoring ones that are already gone. Failures are logged
/// and never abort the caller.
pub async fn cleanup_intermediates(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match fs::remove_file(path).await {
            Ok(()) => {
                removed += 1;
                tracing::debug!(path = %path.display(), "removed");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => logw(format!("Failed to remove {}: {}", path.display(), e)),
        }
    }
    removed
}

pub struct ChainOrchestrator<G, M> {
    generator: G,
    media: M,
    cancel: CancellationToken,
    default_size: String,
}

impl<G: ClipGenerator, M: MediaToolkit> ChainOrchestrator<G, M> {
    pub fn new(generator: G, media: M) -> Self {
        Self {
            generator,
            media,
            cancel: CancellationToken::new(),
            default_size: DEFAULT_SIZE.to_string(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_default_size(mut self, size: impl Into<String>) -> Self {
        self.default_size = size.into();
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Generates every segment, composes them into `req.output` and removes
    /// intermediates. On error nothing is cleaned up.
    pub async fn produce(&self, req: &ChainRequest) -> Result<ChainOutcome> {
        req.validate()?;
        let size = req.size.clone().unwrap_or_else(|| self.default_size.clone());
        let mut plan = SegmentPlan::build(
            &req.prompt,
            req.total_duration,
            req.segment_duration,
            req.strategy.prompt_style(),
        )?;

        logi(format!(
            "Creating {:.1}s video in {} segments ({:?})",
            req.total_duration,
            plan.len(),
            req.strategy
        ));
        logi(format!("Base prompt: {}", req.prompt));
        logi(format!("Output: {}", req.output.display()));
        init::ensure_work_dir(&req.work_dir).await?;

        let count = plan.len();
        let mut artifacts: Vec<SegmentArtifact> = Vec::with_capacity(count);
        let mut leftovers: Vec<PathBuf> = Vec::new();

        for i in 0..count {
            if self.cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }

            let spec = plan.items[i].clone();
            let artifact = self.produce_segment(req, &spec, &size, count).await?;

            // The seed has now fed both generation and padding of this segment.
            if let Some(seed) = &spec.seed_frame {
                if req.keep_intermediates {
                    leftovers.push(seed.clone());
                } else {
                    cleanup_intermediates(std::slice::from_ref(seed)).await;
                }
            }

            if req.strategy.seeds() && i + 1 < count {
                let frame = frame_file(&req.work_dir, spec.number());
                self.media.extract_last_frame(&artifact.path, &frame).await?;
                logok(format!("Last frame -> {}", frame.display()));
                plan.items[i + 1].seed_frame = Some(frame);
            }

            artifacts.push(artifact);
        }

        let crossfade = req.strategy.crossfades().then_some(req.crossfade);
        let compositor = Compositor::new(&self.media, &req.work_dir);
        logi(format!("Combining {} segments...", artifacts.len()));
        let composition = compositor.compose(&artifacts, crossfade, &req.output).await?;

        if req.keep_intermediates {
            logi(format!(
                "Keeping {} intermediate files",
                artifacts.len() + leftovers.len()
            ));
        } else {
            let mut paths: Vec<PathBuf> = artifacts.iter().map(|a| a.path.clone()).collect();
            paths.extend(composition.temp_files());
            let removed = cleanup_intermediates(&paths).await;
            logi(format!("Cleaned up {} temporary files", removed));
        }

        logok(format!("Complete! Long video saved as: {}", req.output.display()));
        Ok(ChainOutcome {
            output: req.output.clone(),
            segments: artifacts,
            composition,
        })
    }

    async fn produce_segment(
        &self,
        req: &ChainRequest,
        spec: &SegmentSpec,
        size: &str,
        count: usize,
    ) -> Result<SegmentArtifact> {
        let number = spec.number();
        let path = segment_file(&req.work_dir, number);
        logi(format!(
            "Segment {}/{} ({}s requested for a {:.2}s slice)",
            number,
            count,
            spec.length.seconds(),
            spec.planned_seconds
        ));

        let seed = if req.strategy.seeds() {
            spec.seed_frame.as_ref().map(SeedImage::first_frame)
        } else {
            None
        };
        let request = ClipRequest {
            prompt: spec.prompt.clone(),
            length: spec.length,
            size: size.to_string(),
            seed,
        };
        self.generator.generate(&request, &path, &self.cancel).await?;

        let mut probe = self.media.probe(&path).await?;
        logi(format!(
            "Segment {} measured {:.3}s @ {}",
            number,
            probe.duration,
            probe
                .fps
                .map(|f| format!("{:.2} fps", f))
                .unwrap_or_else(|| "unknown fps".to_string())
        ));

        let mut padded_seconds = 0.0;
        if req.strategy.pads() {
            if let Some(seed_frame) = &spec.seed_frame {
                padded_seconds =
                    padder::pad_segment(&self.media, &path, &probe, seed_frame, req.effective_pad())
                        .await;
                if padded_seconds > 0.0 {
                    probe = self.media.probe(&path).await?;
                    logi(format!(
                        "Segment {} measured {:.3}s after padding",
                        number, probe.duration
                    ));
                }
            }
        }

        Ok(SegmentArtifact {
            index: spec.index,
            path,
            measured_duration: probe.duration,
            measured_fps: probe.fps,
            has_audio: probe.has_audio,
            padded_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChainRequest {
        ChainRequest::new("ocean waves at sunset", 24.0, "out.mp4")
    }

    #[test]
    fn test_strategy_stages() {
        assert!(!Strategy::Independent.seeds());
        assert!(Strategy::Seeded.seeds() && !Strategy::Seeded.crossfades());
        assert!(Strategy::SeededCrossfade.crossfades() && !Strategy::SeededCrossfade.pads());
        assert!(Strategy::default().pads());
    }

    #[test]
    fn test_pad_defaults_to_crossfade() {
        let mut req = request();
        req.crossfade = 0.75;
        assert_eq!(req.effective_pad(), 0.75);
        req.pad_duration = Some(2.0);
        assert_eq!(req.effective_pad(), 2.0);
    }

    #[test]
    fn test_validate_ranges() {
        assert!(request().validate().is_ok());

        let mut req = request();
        req.total_duration = 0.0;
        assert!(matches!(req.validate(), Err(ChainError::Configuration(_))));

        let mut req = request();
        req.segment_duration = 13.0;
        assert!(req.validate().is_err());

        let mut req = request();
        req.crossfade = 12.5;
        assert!(req.validate().is_err());

        let mut req = request();
        req.crossfade = -0.5;
        assert!(req.validate().is_err());

        let mut req = request();
        req.pad_duration = Some(-1.0);
        assert!(req.validate().is_err());

        let mut req = request();
        req.size = Some("1280-720".to_string());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_size() {
        assert_eq!(validate_size("1280x720").unwrap(), (1280, 720));
        assert!(validate_size("720x1280").is_ok());
        assert!(validate_size("0x720").is_err());
        assert!(validate_size("big").is_err());
        assert!(std::ptr::eq(size_regex().unwrap(), size_regex().unwrap()));
    }

    #[test]
    fn test_intermediate_names_are_one_based() {
        let dir = Path::new("work");
        assert_eq!(segment_file(dir, 1), PathBuf::from("work/segment_1.mp4"));
        assert_eq!(frame_file(dir, 2), PathBuf::from("work/frame_2.jpg"));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("segment_1.mp4");
        let b = dir.path().join("frame_1.jpg");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"y").unwrap();
        let paths = vec![a.clone(), b.clone()];

        assert_eq!(cleanup_intermediates(&paths).await, 2);
        assert!(!a.exists() && !b.exists());
        assert_eq!(cleanup_intermediates(&paths).await, 0);
    }
}
