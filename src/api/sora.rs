use super::{ClipGenerator, ClipRequest, Job, JobStatus, SeedImage};
use crate::config::Config;
use crate::error::{ChainError, Result};
use crate::{logi, logok, logw};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_BODY_SNIPPET: usize = 800;

/// HTTP client for the `openai/v1/videos` job API.
pub struct SoraClient {
    client: Client,
    cfg: Config,
}

impl SoraClient {
    pub fn new(cfg: Config) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ChainError::configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, cfg })
    }

    pub fn jobs_url(&self) -> String {
        format!(
            "{}openai/v1/videos?api-version={}",
            self.cfg.endpoint, self.cfg.api_version
        )
    }

    pub fn job_url(&self, id: &str) -> String {
        format!(
            "{}openai/v1/videos/{}?api-version={}",
            self.cfg.endpoint, id, self.cfg.api_version
        )
    }

    pub fn content_url(&self, id: &str) -> String {
        format!(
            "{}openai/v1/videos/{}/content?api-version={}",
            self.cfg.endpoint, id, self.cfg.api_version
        )
    }

    async fn submit(&self, request: &ClipRequest) -> Result<Job> {
        let seconds = request.length.seconds().to_string();
        let builder = self
            .client
            .post(self.jobs_url())
            .header("Api-Key", &self.cfg.api_key)
            .timeout(SUBMIT_TIMEOUT);

        let resp = match &request.seed {
            None => {
                logi(format!(
                    "Submitting text-to-video ({}s, {})",
                    seconds, request.size
                ));
                let body = json!({
                    "model": self.cfg.deployment,
                    "prompt": request.prompt,
                    "seconds": seconds,
                    "size": request.size,
                });
                builder.json(&body).send().await?
            }
            Some(seed) => {
                logi(format!(
                    "Submitting image-to-video ({}s, {}) seeded from {}",
                    seconds,
                    request.size,
                    seed.path.display()
                ));
                let form = self.seeded_form(request, seed, &seconds).await?;
                builder.multipart(form).send().await?
            }
        };

        let job: Job = read_json(resp).await?;
        logi(format!("Job ID: {}", job.id));
        Ok(job)
    }

    async fn seeded_form(&self, request: &ClipRequest, seed: &SeedImage, seconds: &str) -> Result<Form> {
        seed.crop.validate()?;
        let bytes = fs::read(&seed.path).await.map_err(|e| {
            ChainError::generation(
                "seed_image_unreadable",
                format!("{}: {}", seed.path.display(), e),
            )
        })?;
        let file_name = seed
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "seed.jpg".to_string());

        let inpaint_items = json!([{
            "frame_index": seed.frame_index,
            "type": "image",
            "file_name": file_name,
            "crop_bounds": seed.crop,
        }]);

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/jpeg")?;

        Ok(Form::new()
            .text("prompt", request.prompt.clone())
            .text("size", request.size.clone())
            .text("seconds", seconds.to_string())
            .text("model", self.cfg.deployment.clone())
            .text("inpaint_items", inpaint_items.to_string())
            .part("files", part))
    }

    async fn download(&self, id: &str, out_path: &Path) -> Result<u64> {
        let mut resp = self
            .client
            .get(self.content_url(id))
            .header("Api-Key", &self.cfg.api_key)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ChainError::generation(
                "download_failed",
                format!("HTTP {} fetching content of {}", resp.status().as_u16(), id),
            ));
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(out_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Status lookups and cancellation for a submitted job.
#[async_trait]
pub(crate) trait JobSource: Send + Sync {
    async fn fetch_job(&self, id: &str) -> Result<Job>;

    /// Best effort; failures are only logged.
    async fn cancel_job(&self, id: &str);
}

#[async_trait]
impl JobSource for SoraClient {
    async fn fetch_job(&self, id: &str) -> Result<Job> {
        let resp = self
            .client
            .get(self.job_url(id))
            .header("Api-Key", &self.cfg.api_key)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn cancel_job(&self, id: &str) {
        let result = self
            .client
            .delete(self.job_url(id))
            .header("Api-Key", &self.cfg.api_key)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => logi(format!("Cancelled remote job {}", id)),
            Ok(resp) => logw(format!(
                "Remote job {} cancel returned HTTP {}",
                id,
                resp.status().as_u16()
            )),
            Err(err) => logw(format!("Remote job {} cancel failed: {}", id, err)),
        }
    }
}

/// Polls `job` every `interval` until it succeeds. A failed or cancelled job
/// surfaces the backend error; cancelling `cancel` also cancels the remote job.
pub(crate) async fn wait_for_job<S: JobSource + ?Sized>(
    source: &S,
    mut job: Job,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Job> {
    let started = Instant::now();
    while !job.status.is_terminal() {
        if started.elapsed() >= timeout {
            return Err(ChainError::generation(
                "poll_timeout",
                format!(
                    "job {} still {:?} after {}s",
                    job.id,
                    job.status,
                    timeout.as_secs()
                ),
            ));
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                source.cancel_job(&job.id).await;
                return Err(ChainError::Cancelled);
            }
            _ = tokio::time::sleep(interval) => {}
        }

        job = source.fetch_job(&job.id).await?;
        tracing::debug!(
            job = %job.id,
            status = ?job.status,
            progress = job.progress.unwrap_or(0.0),
            "poll"
        );
    }

    if job.status != JobStatus::Succeeded {
        return Err(job.failure());
    }
    Ok(job)
}

async fn read_json(resp: Response) -> Result<Job> {
    let status = resp.status();
    let raw = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(error_from_body(status.as_u16(), &raw));
    }
    serde_json::from_str(&raw).map_err(|e| {
        ChainError::generation(
            "unexpected_response",
            format!("{}: {}", e, snippet(&raw)),
        )
    })
}

/// Backend errors arrive as `{"error":{"code":..,"message":..}}`; anything else
/// is reported with the HTTP status as the code.
pub(crate) fn error_from_body(http_status: u16, raw: &str) -> ChainError {
    let root: Option<serde_json::Value> = serde_json::from_str(raw).ok();
    let err = root.as_ref().and_then(|v| v.get("error"));
    let code = err
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("http_{}", http_status));
    let message = err
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| snippet(raw));
    ChainError::Generation { code, message }
}

fn snippet(raw: &str) -> String {
    raw.chars().take(MAX_BODY_SNIPPET).collect()
}

#[async_trait]
impl ClipGenerator for SoraClient {
    async fn generate(
        &self,
        request: &ClipRequest,
        out_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }

        let job = self.submit(request).await?;
        let job = wait_for_job(
            self,
            job,
            self.cfg.poll_interval(),
            self.cfg.poll_timeout(),
            cancel,
        )
        .await?;

        logok(format!("Job {} succeeded", job.id));
        let bytes = self.download(&job.id, out_path).await?;
        logok(format!(
            "Saved {} ({:.2} MB)",
            out_path.display(),
            bytes as f64 / (1024.0 * 1024.0)
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned status bodies; reports `running` once they run out.
    #[derive(Default)]
    struct ScriptedJobs {
        bodies: Mutex<VecDeque<&'static str>>,
        fetches: Mutex<usize>,
        cancelled: Mutex<Vec<String>>,
        cancel_on_fetch: Option<(usize, CancellationToken)>,
    }

    impl ScriptedJobs {
        fn new(bodies: &[&'static str]) -> Self {
            Self {
                bodies: Mutex::new(bodies.iter().copied().collect()),
                ..Default::default()
            }
        }

        fn fetches(&self) -> usize {
            *self.fetches.lock().unwrap()
        }
    }

    #[async_trait]
    impl JobSource for ScriptedJobs {
        async fn fetch_job(&self, id: &str) -> Result<Job> {
            let n = {
                let mut fetches = self.fetches.lock().unwrap();
                *fetches += 1;
                *fetches
            };
            if let Some((at, token)) = &self.cancel_on_fetch {
                if *at == n {
                    token.cancel();
                }
            }
            let body = self.bodies.lock().unwrap().pop_front();
            let mut job: Job =
                serde_json::from_str(body.unwrap_or(r#"{"id":"","status":"in_progress"}"#)).unwrap();
            job.id = id.to_string();
            Ok(job)
        }

        async fn cancel_job(&self, id: &str) {
            self.cancelled.lock().unwrap().push(id.to_string());
        }
    }

    fn queued(id: &str) -> Job {
        Job {
            id: id.to_string(),
            status: JobStatus::Queued,
            progress: None,
            error: None,
        }
    }

    const INTERVAL: Duration = Duration::from_secs(5);
    const TIMEOUT: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_poll_continues_through_pending_statuses() {
        let jobs = ScriptedJobs::new(&[
            r#"{"id":"","status":"queued"}"#,
            r#"{"id":"","status":"in_progress","progress":40}"#,
            r#"{"id":"","status":"warming_up"}"#,
            r#"{"id":"","status":"completed","progress":100}"#,
        ]);
        let cancel = CancellationToken::new();
        let job = wait_for_job(&jobs, queued("vid_1"), INTERVAL, TIMEOUT, &cancel)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.id, "vid_1");
        assert_eq!(jobs.fetches(), 4);
        assert!(jobs.cancelled.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_failure_with_backend_error() {
        let jobs = ScriptedJobs::new(&[
            r#"{"id":"","status":"in_progress"}"#,
            r#"{"id":"","status":"failed","error":{"code":"content_policy_violation","message":"Prompt rejected"}}"#,
            r#"{"id":"","status":"completed"}"#,
        ]);
        let cancel = CancellationToken::new();
        let err = wait_for_job(&jobs, queued("vid_2"), INTERVAL, TIMEOUT, &cancel)
            .await
            .unwrap_err();
        match err {
            ChainError::Generation { code, message } => {
                assert_eq!(code, "content_policy_violation");
                assert_eq!(message, "Prompt rejected");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(jobs.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out() {
        let jobs = ScriptedJobs::new(&[]);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let err = wait_for_job(&jobs, queued("vid_3"), INTERVAL, TIMEOUT, &cancel)
            .await
            .unwrap_err();
        match err {
            ChainError::Generation { code, .. } => assert_eq!(code, "poll_timeout"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(jobs.fetches(), 6);
        assert!(started.elapsed() >= TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_poll_cancels_remote_job() {
        let cancel = CancellationToken::new();
        let jobs = ScriptedJobs {
            cancel_on_fetch: Some((2, cancel.clone())),
            ..ScriptedJobs::new(&[])
        };
        let err = wait_for_job(&jobs, queued("vid_7"), INTERVAL, TIMEOUT, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Cancelled));
        assert_eq!(jobs.fetches(), 2);
        assert_eq!(*jobs.cancelled.lock().unwrap(), vec!["vid_7".to_string()]);
    }

    fn client() -> SoraClient {
        let cfg = Config::from_lookup(|key| match key {
            "AZURE_OPENAI_ENDPOINT" => Some("https://res.example.com".to_string()),
            "AZURE_OPENAI_DEPLOYMENT" => Some("sora-2".to_string()),
            "AZURE_OPENAI_API_KEY" => Some("k".to_string()),
            _ => None,
        })
        .unwrap();
        SoraClient::new(cfg).unwrap()
    }

    #[test]
    fn test_job_urls() {
        let c = client();
        assert_eq!(
            c.jobs_url(),
            "https://res.example.com/openai/v1/videos?api-version=preview"
        );
        assert_eq!(
            c.job_url("vid_1"),
            "https://res.example.com/openai/v1/videos/vid_1?api-version=preview"
        );
        assert_eq!(
            c.content_url("vid_1"),
            "https://res.example.com/openai/v1/videos/vid_1/content?api-version=preview"
        );
    }

    #[test]
    fn test_error_body_parsing() {
        let err = error_from_body(
            400,
            r#"{"error":{"code":"content_policy_violation","message":"Your prompt was rejected"}}"#,
        );
        match err {
            ChainError::Generation { code, message } => {
                assert_eq!(code, "content_policy_violation");
                assert_eq!(message, "Your prompt was rejected");
            }
            other => panic!("unexpected {:?}", other),
        }

        match error_from_body(502, "Bad Gateway") {
            ChainError::Generation { code, message } => {
                assert_eq!(code, "http_502");
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_submit() {
        let c = client();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = ClipRequest {
            prompt: "x".to_string(),
            length: crate::clip_plan::ClipLength::Short,
            size: "1280x720".to_string(),
            seed: None,
        };
        let err = c
            .generate(&request, Path::new("never.mp4"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Cancelled));
    }
}
