use crate::error::{ChainError, Result};
use crate::logi;
use std::path::Path;
use tokio::fs;

pub async fn ensure_work_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).await?;
        logi(format!("Created directory: {}", dir.display()));
    }
    Ok(())
}

pub async fn check_tool(bin: &str) -> bool {
    match tokio::process::Command::new(bin)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Fails with a configuration error naming every missing binary.
pub async fn check_media_tools(ffmpeg_bin: &str, ffprobe_bin: &str) -> Result<()> {
    let mut missing = Vec::new();
    for bin in [ffmpeg_bin, ffprobe_bin] {
        if !check_tool(bin).await {
            missing.push(bin);
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    Err(ChainError::configuration(format!(
        "{} not found in PATH. Install FFmpeg: https://ffmpeg.org/download.html",
        missing.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool_reported() {
        let err = check_media_tools("definitely-not-ffmpeg-xyz", "definitely-not-ffprobe-xyz")
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("definitely-not-ffmpeg-xyz"));
        assert!(text.contains("definitely-not-ffprobe-xyz"));
    }

    #[tokio::test]
    async fn test_ensure_work_dir_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_work_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        ensure_work_dir(&nested).await.unwrap();
    }
}
