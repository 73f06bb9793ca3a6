use crate::crossfade::{CrossfadePlan, FALLBACK_FPS, FilterGraph};
use crate::error::{ChainError, Result};
use crate::ffmpeg::{MediaToolkit, concat_list_line};
use crate::pipeline::SegmentArtifact;
use crate::{logi, logok, logw};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const CONCAT_LIST_NAME: &str = "concat_list.txt";

#[derive(Debug, Clone, PartialEq)]
pub enum Composition {
    /// Single segment moved or copied to the output.
    Copied,
    /// Stream-copy concatenation; `list_file` is left for cleanup.
    Concatenated { list_file: PathBuf },
    Crossfaded { plan: CrossfadePlan },
}

impl Composition {
    pub fn temp_files(&self) -> Vec<PathBuf> {
        match self {
            Self::Concatenated { list_file } => vec![list_file.clone()],
            _ => Vec::new(),
        }
    }
}

pub struct Compositor<'a, M: MediaToolkit + ?Sized> {
    media: &'a M,
    work_dir: &'a Path,
}

impl<'a, M: MediaToolkit + ?Sized> Compositor<'a, M> {
    pub fn new(media: &'a M, work_dir: &'a Path) -> Self {
        Self { media, work_dir }
    }

    /// Merges `segments` in order into `out`. A positive `crossfade` blends
    /// neighbours; `None` or zero falls back to stream-copy concatenation.
    pub async fn compose(
        &self,
        segments: &[SegmentArtifact],
        crossfade: Option<f64>,
        out: &Path,
    ) -> Result<Composition> {
        if segments.is_empty() {
            return Err(ChainError::Composition {
                reason: "no segments to compose".to_string(),
            });
        }
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        if segments.len() == 1 {
            self.copy_single(&segments[0].path, out).await?;
            logok(format!("Single segment written to {}", out.display()));
            return Ok(Composition::Copied);
        }

        match crossfade.filter(|c| *c > 0.0) {
            Some(requested) => self.crossfade(segments, requested, out).await,
            None => self.concatenate(segments, out).await,
        }
    }

    async fn copy_single(&self, from: &Path, out: &Path) -> Result<()> {
        if fs::rename(from, out).await.is_ok() {
            return Ok(());
        }
        fs::copy(from, out).await.map_err(|e| ChainError::Composition {
            reason: format!("failed to copy {} -> {}: {}", from.display(), out.display(), e),
        })?;
        Ok(())
    }

    async fn crossfade(
        &self,
        segments: &[SegmentArtifact],
        requested: f64,
        out: &Path,
    ) -> Result<Composition> {
        let durations: Vec<f64> = segments.iter().map(|s| s.measured_duration).collect();
        let plan = CrossfadePlan::build(&durations, requested)?;
        if plan.crossfade < requested {
            logw(format!(
                "Crossfade clamped {:.2}s -> {:.2}s (shortest segment {:.2}s)",
                requested,
                plan.crossfade,
                durations.iter().copied().fold(f64::INFINITY, f64::min)
            ));
        }

        let fps = segments
            .iter()
            .find_map(|s| s.measured_fps)
            .unwrap_or(FALLBACK_FPS);
        let with_audio = segments.iter().all(|s| s.has_audio);
        if !with_audio {
            logw("Not every segment has audio; composing video only.".to_string());
        }

        let graph = FilterGraph::from_plan(&plan, fps, with_audio);
        for t in &plan.transitions {
            logi(format!(
                "Transition {} -> {} at {:.3}s for {:.3}s",
                t.left_index + 1,
                t.right_index + 1,
                t.offset,
                t.duration
            ));
        }

        let inputs: Vec<PathBuf> = segments.iter().map(|s| s.path.clone()).collect();
        self.media.crossfade(&inputs, &graph, out).await?;
        logok(format!(
            "Crossfaded {} segments -> {} (~{:.2}s)",
            segments.len(),
            out.display(),
            plan.total_duration
        ));
        Ok(Composition::Crossfaded { plan })
    }

    async fn concatenate(&self, segments: &[SegmentArtifact], out: &Path) -> Result<Composition> {
        let list_file = self.work_dir.join(CONCAT_LIST_NAME);
        let mut list = String::new();
        for segment in segments {
            let name = segment_list_name(&segment.path, self.work_dir);
            list.push_str(&concat_list_line(&name));
        }
        fs::write(&list_file, list).await?;

        self.media.concat_copy(&list_file, out).await?;
        logok(format!(
            "Concatenated {} segments -> {}",
            segments.len(),
            out.display()
        ));
        Ok(Composition::Concatenated { list_file })
    }
}

/// Concat lists resolve entries relative to the list file itself.
fn segment_list_name(segment: &Path, work_dir: &Path) -> String {
    match segment.strip_prefix(work_dir) {
        Ok(rel) => rel.display().to_string(),
        Err(_) => segment.display().to_string(),
    }
}
