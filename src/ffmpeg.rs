use crate::config::Config;
use crate::crossfade::FilterGraph;
use crate::error::{ChainError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

const STILL_SAMPLE_RATE: u32 = 48_000;

/// Facts about a finished clip, read back from the file rather than assumed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipProbe {
    pub duration: f64,
    pub fps: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// External media operations the chain depends on.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe(&self, clip: &Path) -> Result<ClipProbe>;

    /// Write the final decoded frame of `clip` to `out_image`.
    async fn extract_last_frame(&self, clip: &Path, out_image: &Path) -> Result<()>;

    /// Write `seconds` of `still` followed by `clip` into `out`, keeping audio
    /// layout consistent (silence under the still).
    async fn prepend_still(
        &self,
        clip: &Path,
        probe: &ClipProbe,
        still: &Path,
        seconds: f64,
        out: &Path,
    ) -> Result<()>;

    async fn crossfade(&self, inputs: &[PathBuf], graph: &FilterGraph, out: &Path) -> Result<()>;

    /// Stream-copy concatenation driven by an ffmpeg concat list file.
    async fn concat_copy(&self, list_file: &Path, out: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl Ffmpeg {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ffmpeg_bin: cfg.ffmpeg_bin.clone(),
            ffprobe_bin: cfg.ffprobe_bin.clone(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            self.ffmpeg_bin.clone(),
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ]
    }
}

/// Runs a command and returns its stderr on failure.
async fn run_cmd(args: &[String]) -> std::result::Result<(), String> {
    if args.is_empty() {
        return Ok(());
    }

    tracing::debug!(command = %args.join(" "), "exec");
    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| format!("failed to run {}: {}", args[0], e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(format!("{} exited with {}: {}", args[0], output.status, stderr));
    }

    Ok(())
}

async fn non_empty(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.len() > 0).unwrap_or(false)
}

fn encode_args(with_audio: bool) -> Vec<String> {
    let mut args = vec![
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
    ];
    if with_audio {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
        ]);
    }
    args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    args
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    avg_frame_rate: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// `"30000/1001"` style rates; `"0/0"` and garbage are unknown.
pub fn parse_frame_rate(text: &str) -> Option<f64> {
    let (num, den) = match text.split_once('/') {
        Some((n, d)) => (n.trim().parse::<f64>().ok()?, d.trim().parse::<f64>().ok()?),
        None => (text.trim().parse::<f64>().ok()?, 1.0),
    };
    if den <= 0.0 || num <= 0.0 {
        return None;
    }
    let fps = num / den;
    fps.is_finite().then_some(fps)
}

pub fn parse_probe_json(path: &Path, text: &str) -> Result<ClipProbe> {
    let probe_err = |reason: String| ChainError::Probe {
        path: path.display().to_string(),
        reason,
    };

    let parsed: ProbeOutput =
        serde_json::from_str(text).map_err(|e| probe_err(format!("bad ffprobe output: {}", e)))?;

    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| probe_err("no duration reported".to_string()))?;
    if !(duration > 0.0) {
        return Err(probe_err(format!("invalid duration {}", duration)));
    }

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| probe_err("no video stream".to_string()))?;
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(ClipProbe {
        duration,
        fps: video.avg_frame_rate.as_deref().and_then(parse_frame_rate),
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        has_audio,
    })
}

/// Line for an ffmpeg concat list, quoting the way the concat demuxer expects.
pub fn concat_list_line(file_name: &str) -> String {
    format!("file '{}'\n", file_name.replace('\'', "'\\''"))
}

#[async_trait]
impl MediaToolkit for Ffmpeg {
    async fn probe(&self, clip: &Path) -> Result<ClipProbe> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=codec_type,avg_frame_rate,width,height",
                "-of",
                "json",
            ])
            .arg(clip)
            .output()
            .await
            .map_err(|e| ChainError::Probe {
                path: clip.display().to_string(),
                reason: format!("ffprobe execution failed: {}", e),
            })?;

        if !output.status.success() {
            return Err(ChainError::Probe {
                path: clip.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_json(clip, &String::from_utf8_lossy(&output.stdout))
    }

    async fn extract_last_frame(&self, clip: &Path, out_image: &Path) -> Result<()> {
        let mut args = self.base_args();
        args.extend([
            "-sseof".to_string(),
            "-1".to_string(),
            "-i".to_string(),
            clip.display().to_string(),
            "-update".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            out_image.display().to_string(),
        ]);

        let failure = |reason: String| ChainError::FrameExtraction {
            path: clip.display().to_string(),
            reason,
        };
        run_cmd(&args).await.map_err(failure)?;
        if !non_empty(out_image).await {
            return Err(failure(format!("{} was not written", out_image.display())));
        }
        Ok(())
    }

    async fn prepend_still(
        &self,
        clip: &Path,
        probe: &ClipProbe,
        still: &Path,
        seconds: f64,
        out: &Path,
    ) -> Result<()> {
        let fps = probe.fps.unwrap_or(crate::crossfade::FALLBACK_FPS);
        let (w, h) = (probe.width & !1, probe.height & !1);
        let still_scale = if w > 0 && h > 0 {
            format!("scale={}:{},", w, h)
        } else {
            String::new()
        };

        let mut args = self.base_args();
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            format!("{:.3}", fps),
            "-t".to_string(),
            format!("{:.3}", seconds),
            "-i".to_string(),
            still.display().to_string(),
            "-i".to_string(),
            clip.display().to_string(),
        ]);

        let video = format!(
            "[0:v]{}fps={:.3},format=yuv420p,setsar=1[pv];[1:v]{}fps={:.3},format=yuv420p,setsar=1[sv]",
            still_scale, fps, still_scale, fps
        );
        let filter = if probe.has_audio {
            args.extend([
                "-f".to_string(),
                "lavfi".to_string(),
                "-t".to_string(),
                format!("{:.3}", seconds),
                "-i".to_string(),
                format!("anullsrc=channel_layout=stereo:sample_rate={}", STILL_SAMPLE_RATE),
            ]);
            format!(
                "{};[1:a]aresample={},aformat=channel_layouts=stereo[sa];[pv][2:a][sv][sa]concat=n=2:v=1:a=1[v][a]",
                video, STILL_SAMPLE_RATE
            )
        } else {
            format!("{};[pv][sv]concat=n=2:v=1:a=0[v]", video)
        };

        args.extend([
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            "[v]".to_string(),
        ]);
        if probe.has_audio {
            args.extend(["-map".to_string(), "[a]".to_string()]);
        }
        args.extend(encode_args(probe.has_audio));
        args.push(out.display().to_string());

        run_cmd(&args).await.map_err(|reason| ChainError::Pad {
            path: clip.display().to_string(),
            reason,
        })
    }

    async fn crossfade(&self, inputs: &[PathBuf], graph: &FilterGraph, out: &Path) -> Result<()> {
        let mut args = self.base_args();
        for input in inputs {
            args.push("-i".to_string());
            args.push(input.display().to_string());
        }
        args.extend([
            "-filter_complex".to_string(),
            graph.render(),
            "-map".to_string(),
            graph.video_out.to_string(),
        ]);
        if let Some(audio) = graph.audio_out {
            args.extend(["-map".to_string(), audio.to_string()]);
        }
        args.extend(encode_args(graph.audio_out.is_some()));
        args.push(out.display().to_string());

        run_cmd(&args)
            .await
            .map_err(|reason| ChainError::Composition { reason })?;
        if !non_empty(out).await {
            return Err(ChainError::Composition {
                reason: format!("{} was not written", out.display()),
            });
        }
        Ok(())
    }

    async fn concat_copy(&self, list_file: &Path, out: &Path) -> Result<()> {
        let mut args = self.base_args();
        args.extend([
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list_file.display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            out.display().to_string(),
        ]);
        run_cmd(&args)
            .await
            .map_err(|reason| ChainError::Composition { reason })
    }
}
