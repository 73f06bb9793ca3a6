use crate::crossfade::MIN_CROSSFADE_SECONDS;
use crate::error::{ChainError, Result};
use crate::ffmpeg::{ClipProbe, MediaToolkit};
use crate::{logi, logw};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Pad length actually applied to a clip of `measured` seconds, or `None` when
/// padding should be skipped.
pub fn effective_pad(requested: f64, measured: f64) -> Option<f64> {
    if !(requested > 0.0) {
        return None;
    }
    if requested < measured {
        return Some(requested);
    }
    let clamped = measured - MIN_CROSSFADE_SECONDS;
    (clamped > 0.0).then_some(clamped)
}

pub fn padded_path(clip: &Path) -> PathBuf {
    let stem = clip
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segment".to_string());
    clip.with_file_name(format!("{}_padded.mp4", stem))
}

/// Prepends a still lead-in built from `seed_frame` onto `clip`, replacing the
/// file in place. Returns the seconds added, `0.0` when the pad was skipped.
///
/// Every failure here is downgraded to a warning: the unpadded clip stays valid.
pub async fn pad_segment<M: MediaToolkit + ?Sized>(
    media: &M,
    clip: &Path,
    probe: &ClipProbe,
    seed_frame: &Path,
    requested: f64,
) -> f64 {
    match try_pad(media, clip, probe, seed_frame, requested).await {
        Ok(seconds) => seconds,
        Err(err) => {
            logw(err.to_string());
            let _ = fs::remove_file(padded_path(clip)).await;
            0.0
        }
    }
}

async fn try_pad<M: MediaToolkit + ?Sized>(
    media: &M,
    clip: &Path,
    probe: &ClipProbe,
    seed_frame: &Path,
    requested: f64,
) -> Result<f64> {
    let pad_err = |reason: String| ChainError::Pad {
        path: clip.display().to_string(),
        reason,
    };

    let Some(seconds) = effective_pad(requested, probe.duration) else {
        if requested > 0.0 {
            return Err(pad_err(format!(
                "clip is only {:.2}s, no room for a {:.2}s lead-in",
                probe.duration, requested
            )));
        }
        return Ok(0.0);
    };
    if seconds < requested {
        logw(format!(
            "Pad clamped {:.2}s -> {:.2}s for {} ({:.2}s long)",
            requested,
            seconds,
            clip.display(),
            probe.duration
        ));
    }

    match fs::metadata(seed_frame).await {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => return Err(pad_err(format!("seed frame {} is empty", seed_frame.display()))),
        Err(e) => {
            return Err(pad_err(format!(
                "seed frame {} unreadable: {}",
                seed_frame.display(),
                e
            )));
        }
    }

    let tmp = padded_path(clip);
    media
        .prepend_still(clip, probe, seed_frame, seconds, &tmp)
        .await
        .map_err(|e| match e {
            ChainError::Pad { .. } => e,
            other => pad_err(other.to_string()),
        })?;
    fs::rename(&tmp, clip)
        .await
        .map_err(|e| pad_err(format!("failed to replace clip: {}", e)))?;

    logi(format!(
        "Padded {} with {:.2}s still lead-in",
        clip.display(),
        seconds
    ));
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map(|v| (v - b).abs() < 1e-9).unwrap_or(false)
    }

    #[test]
    fn test_effective_pad() {
        assert!(approx(effective_pad(1.0, 12.0), 1.0));
        assert!(approx(effective_pad(5.0, 4.5), 4.4));
        assert!(approx(effective_pad(4.5, 4.5), 4.4));
        assert_eq!(effective_pad(0.0, 12.0), None);
        assert_eq!(effective_pad(1.0, 0.1), None);
        assert_eq!(effective_pad(1.0, 0.05), None);
    }

    #[test]
    fn test_padded_path() {
        assert_eq!(
            padded_path(Path::new("/work/segment_2.mp4")),
            PathBuf::from("/work/segment_2_padded.mp4")
        );
    }
}
