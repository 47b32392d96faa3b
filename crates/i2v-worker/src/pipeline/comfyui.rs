//! ComfyUI-backed pipeline.
//!
//! Per job: upload the input image, queue the img2vid graph, poll the prompt
//! history until it completes, then download the MP4 written by the video
//! combine node.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::workflow::{build_img2vid_workflow, VIDEO_OUTPUT_NODE};
use super::{PipelineOutput, PipelineRequest, VideoPipeline};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Deserialize)]
struct UploadImageResponse {
    name: String,
    #[serde(default)]
    subfolder: String,
}

#[derive(Debug, Deserialize)]
struct QueuePromptResponse {
    prompt_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct PromptStatus {
    #[serde(default)]
    status_str: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PromptHistory {
    #[serde(default)]
    status: PromptStatus,
    #[serde(default)]
    outputs: BTreeMap<String, NodeOutput>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    gifs: Vec<OutputFile>,
    #[serde(default)]
    videos: Vec<OutputFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutputFile {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default = "default_output_type")]
    kind: String,
}

fn default_output_type() -> String {
    "output".to_string()
}

impl NodeOutput {
    fn video(&self) -> Option<&OutputFile> {
        self.gifs
            .iter()
            .chain(self.videos.iter())
            .find(|f| f.filename.ends_with(".mp4"))
    }
}

impl PromptHistory {
    /// The MP4 from the combine node, falling back to any node that wrote one.
    fn video_output(&self) -> Option<&OutputFile> {
        self.outputs
            .get(VIDEO_OUTPUT_NODE)
            .and_then(NodeOutput::video)
            .or_else(|| self.outputs.values().find_map(NodeOutput::video))
    }

    fn failed(&self) -> bool {
        self.status.status_str.as_deref() == Some("error")
    }

    fn finished(&self) -> bool {
        self.status.completed || self.status.status_str.as_deref() == Some("success")
    }
}

/// Pipeline that drives a ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUiPipeline {
    client: Client,
    base_url: Url,
    checkpoint: String,
    client_id: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl ComfyUiPipeline {
    /// Connect to the configured server and verify it answers.
    pub async fn connect(config: &WorkerConfig, client: Client) -> WorkerResult<Self> {
        let pipeline = Self::new(
            client,
            &config.comfyui_url,
            &config.comfyui_checkpoint,
            config.comfyui_poll_interval,
            config.comfyui_timeout,
        )?;
        pipeline.health_check().await?;
        Ok(pipeline)
    }

    pub fn new(
        client: Client,
        base_url: &str,
        checkpoint: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> WorkerResult<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| WorkerError::config_error(format!("invalid COMFYUI_URL: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            checkpoint: checkpoint.to_string(),
            client_id: Uuid::new_v4().to_string(),
            poll_interval,
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> WorkerResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| WorkerError::config_error(format!("invalid ComfyUI path {}: {}", path, e)))
    }

    /// `GET /system_stats`.
    pub async fn health_check(&self) -> WorkerResult<()> {
        let response = self
            .client
            .get(self.endpoint("system_stats")?)
            .send()
            .await
            .map_err(|e| {
                WorkerError::config_error(format!(
                    "ComfyUI not reachable at {}: {}",
                    self.base_url, e
                ))
            })?;
        ensure_success(response, "system_stats").await?;
        debug!("ComfyUI is up at {}", self.base_url);
        Ok(())
    }

    async fn upload_image(&self, path: &Path, name: String) -> WorkerResult<String> {
        let bytes = tokio::fs::read(path).await?;
        let part = Part::bytes(bytes)
            .file_name(name)
            .mime_str("image/png")?;
        let form = Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(self.endpoint("upload/image")?)
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadImageResponse = ensure_success(response, "upload/image")
            .await?
            .json()
            .await?;

        Ok(if uploaded.subfolder.is_empty() {
            uploaded.name
        } else {
            format!("{}/{}", uploaded.subfolder, uploaded.name)
        })
    }

    async fn queue_prompt(&self, workflow: Value) -> WorkerResult<String> {
        let body = json!({ "prompt": workflow, "client_id": self.client_id });
        let response = self
            .client
            .post(self.endpoint("prompt")?)
            .json(&body)
            .send()
            .await?;
        let queued: QueuePromptResponse = ensure_success(response, "prompt").await?.json().await?;
        Ok(queued.prompt_id)
    }

    async fn history(&self, prompt_id: &str) -> WorkerResult<Option<PromptHistory>> {
        let response = self
            .client
            .get(self.endpoint(&format!("history/{}", prompt_id))?)
            .send()
            .await?;
        let mut entries: HashMap<String, PromptHistory> =
            ensure_success(response, "history").await?.json().await?;
        Ok(entries.remove(prompt_id))
    }

    async fn wait_for_completion(&self, prompt_id: &str) -> WorkerResult<PromptHistory> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if let Some(entry) = self.history(prompt_id).await? {
                if entry.failed() {
                    return Err(WorkerError::pipeline_failed(format!(
                        "ComfyUI prompt {} failed: {}",
                        prompt_id,
                        execution_error(&entry.status.messages)
                    )));
                }
                if entry.finished() || entry.video_output().is_some() {
                    return Ok(entry);
                }
            }

            if Instant::now() >= deadline {
                return Err(WorkerError::pipeline_timeout(format!(
                    "ComfyUI prompt {} did not finish within {}s",
                    prompt_id,
                    self.timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn download(&self, file: &OutputFile, output_path: &Path) -> WorkerResult<u64> {
        let response = self
            .client
            .get(self.endpoint("view")?)
            .query(&[
                ("filename", file.filename.as_str()),
                ("subfolder", file.subfolder.as_str()),
                ("type", file.kind.as_str()),
            ])
            .send()
            .await?;
        let bytes = ensure_success(response, "view").await?.bytes().await?;
        tokio::fs::write(output_path, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

#[async_trait]
impl VideoPipeline for ComfyUiPipeline {
    fn name(&self) -> &'static str {
        "comfyui"
    }

    async fn generate(&self, request: PipelineRequest<'_>) -> WorkerResult<PipelineOutput> {
        let job_id = request.job_id;

        let image_name = self
            .upload_image(request.image_path, format!("i2v-{}.png", job_id))
            .await?;

        let workflow = build_img2vid_workflow(
            request.params,
            &self.checkpoint,
            &image_name,
            &format!("i2v/{}", job_id),
        );
        let prompt_id = self.queue_prompt(workflow).await?;
        info!(job_id = %job_id, prompt_id = %prompt_id, "Queued ComfyUI prompt");

        let entry = self.wait_for_completion(&prompt_id).await?;
        let Some(video) = entry.video_output() else {
            warn!(
                job_id = %job_id,
                prompt_id = %prompt_id,
                "Prompt finished without a video output"
            );
            return Err(WorkerError::pipeline_failed(format!(
                "ComfyUI prompt {} produced no video",
                prompt_id
            )));
        };

        let size = self.download(video, request.output_path).await?;
        info!(
            job_id = %job_id,
            "Downloaded {} ({} bytes) from ComfyUI",
            video.filename,
            size
        );
        Ok(PipelineOutput::Encoded)
    }
}

async fn ensure_success(response: Response, route: &str) -> WorkerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(WorkerError::pipeline_failed(format!(
        "ComfyUI {} returned HTTP {}: {}",
        route, status, body
    )))
}

/// Pull the exception message out of ComfyUI's `execution_error` event.
fn execution_error(messages: &[Value]) -> String {
    messages
        .iter()
        .filter_map(|m| m.as_array())
        .find(|m| m.first().and_then(Value::as_str) == Some("execution_error"))
        .and_then(|m| m.get(1))
        .and_then(|data| data.get("exception_message"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown execution error".to_string())
}
