//! End-to-end job handling against mock image, presign and upload endpoints.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use i2v_media::{FrameEncoder, MediaResult, RgbImage};
use i2v_models::{JobId, JobRequest, JobResponse, JobStatus};
use i2v_storage::{RetryPolicy, UploadThingClient, UploadThingConfig};
use i2v_worker::{
    Generator, JobExecutor, JobHandler, JobSource, LocalJobSource, PipelineOutput,
    PipelineRequest, VideoPipeline, WorkerConfig, WorkerError, WorkerResult,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "sk_test_123";
const FILE_URL: &str = "https://utfs.io/f/video.mp4";

enum Behavior {
    Frames,
    Fail,
    Panic,
}

struct FakePipeline {
    behavior: Behavior,
    seen: Mutex<Vec<(PathBuf, u32, u32)>>,
}

impl FakePipeline {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl VideoPipeline for FakePipeline {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn generate(&self, request: PipelineRequest<'_>) -> WorkerResult<PipelineOutput> {
        assert!(request.image_path.exists());
        self.seen.lock().unwrap().push((
            request.image_path.to_path_buf(),
            request.image.width(),
            request.image.height(),
        ));

        match self.behavior {
            Behavior::Frames => {
                let p = request.params;
                Ok(PipelineOutput::Frames(
                    (0..p.num_frames)
                        .map(|_| RgbImage::new(p.width, p.height))
                        .collect(),
                ))
            }
            Behavior::Fail => Err(WorkerError::pipeline_failed("CUDA out of memory")),
            Behavior::Panic => panic!("model crashed"),
        }
    }
}

#[derive(Default)]
struct FakeEncoder {
    outputs: Mutex<Vec<(PathBuf, usize, u32)>>,
}

#[async_trait]
impl FrameEncoder for FakeEncoder {
    async fn encode(&self, frames: Vec<RgbImage>, fps: u32, output: &Path) -> MediaResult<()> {
        tokio::fs::write(output, b"fake mp4 payload").await?;
        self.outputs
            .lock()
            .unwrap()
            .push((output.to_path_buf(), frames.len(), fps));
        Ok(())
    }
}

struct Harness {
    server: MockServer,
    work_dir: TempDir,
    pipeline: Arc<FakePipeline>,
    encoder: Arc<FakeEncoder>,
    handler: JobHandler,
}

impl Harness {
    async fn new(behavior: Behavior) -> Self {
        let server = MockServer::start().await;
        let work_dir = TempDir::new().unwrap();
        let pipeline = FakePipeline::new(behavior);
        let encoder = Arc::new(FakeEncoder::default());

        let config = WorkerConfig {
            work_dir: work_dir.path().to_path_buf(),
            upload_retry: RetryPolicy::new(1, Duration::from_millis(10)),
            ..WorkerConfig::default()
        };
        let uploader = UploadThingClient::new(
            UploadThingConfig::new(Some(API_KEY.to_string()), &server.uri()).unwrap(),
        )
        .unwrap();

        let generator = Generator::new(
            reqwest::Client::new(),
            pipeline.clone(),
            encoder.clone(),
            uploader,
            &config,
        );

        Self {
            server,
            work_dir,
            pipeline,
            encoder,
            handler: JobHandler::new(generator),
        }
    }

    fn image_url(&self) -> String {
        format!("{}/images/cat.png", self.server.uri())
    }

    async fn mount_image(&self) {
        Mock::given(method("GET"))
            .and(path("/images/cat.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png_bytes(40, 30)),
            )
            .mount(&self.server)
            .await;
    }

    async fn mount_upload(&self) {
        Mock::given(method("POST"))
            .and(path("/v6/uploadFiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "url": format!("{}/s3-upload", self.server.uri()),
                    "fields": {"key": "abc"},
                    "fileUrl": FILE_URL,
                    "key": "abc"
                }]
            })))
            .mount(&self.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/s3-upload"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&self.server)
            .await;
    }

    fn work_dir_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.work_dir.path())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.is_file())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

#[tokio::test]
async fn test_successful_job_returns_file_url_and_cleans_up() {
    let harness = Harness::new(Behavior::Frames).await;
    harness.mount_image().await;
    harness.mount_upload().await;

    let job = JobRequest::new(json!({
        "image_url": harness.image_url(),
        "width": 64,
        "height": 32,
        "num_frames": 4,
        "fps": 6
    }));
    let response = harness.handler.handle(&job).await;

    assert_eq!(response.status, JobStatus::Success);
    assert_eq!(response.result.as_deref(), Some(FILE_URL));
    assert!(response.error.is_none());
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"status": "SUCCESS", "result": FILE_URL})
    );

    // Pipeline got the resized image
    let seen = harness.pipeline.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!((seen[0].1, seen[0].2), (64, 32));

    // Encoder got every frame, and the video is gone after upload
    let outputs = harness.encoder.outputs.lock().unwrap().clone();
    assert_eq!(outputs.len(), 1);
    assert_eq!((outputs[0].1, outputs[0].2), (4, 6));
    assert!(!outputs[0].0.exists());
    assert!(!seen[0].0.exists());
    assert!(harness.work_dir_files().is_empty());
}

#[tokio::test]
async fn test_missing_image_url_fails_without_requests() {
    let harness = Harness::new(Behavior::Frames).await;

    let response = harness.handler.handle(&JobRequest::new(json!({}))).await;

    assert_eq!(response.status, JobStatus::Error);
    assert_eq!(response.error.as_deref(), Some("Missing 'image_url' in input"));
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"status": "ERROR", "result": Value::Null, "error": "Missing 'image_url' in input"})
    );
    assert!(harness.server.received_requests().await.unwrap().is_empty());
    assert!(harness.pipeline.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_parameters_fail_without_requests() {
    let harness = Harness::new(Behavior::Frames).await;

    let response = harness
        .handler
        .handle(&JobRequest::new(json!({
            "image_url": harness.image_url(),
            "width": 1001
        })))
        .await;

    assert_eq!(response.status, JobStatus::Error);
    assert!(response.error.unwrap().contains("width"));
    assert!(harness.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_image_download_failure() {
    let harness = Harness::new(Behavior::Frames).await;
    Mock::given(method("GET"))
        .and(path("/images/cat.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.server)
        .await;

    let response = harness
        .handler
        .handle(&JobRequest::new(json!({"image_url": harness.image_url()})))
        .await;

    assert_eq!(response.status, JobStatus::Error);
    let error = response.error.unwrap();
    assert!(error.starts_with("Download failed"), "{}", error);
    assert!(error.contains("404"));
    assert!(harness.pipeline.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_pipeline_failure_cleans_up_input_image() {
    let harness = Harness::new(Behavior::Fail).await;
    harness.mount_image().await;
    harness.mount_upload().await;

    let response = harness
        .handler
        .handle(&JobRequest::new(json!({"image_url": harness.image_url()})))
        .await;

    assert_eq!(response.status, JobStatus::Error);
    assert_eq!(response.result, None);
    assert!(response.error.unwrap().contains("CUDA out of memory"));

    let seen = harness.pipeline.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].0.exists());
    assert!(harness.work_dir_files().is_empty());
    assert!(harness.encoder.outputs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_pipeline_panic_becomes_error_response() {
    let harness = Harness::new(Behavior::Panic).await;
    harness.mount_image().await;

    let response = harness
        .handler
        .handle(&JobRequest::new(json!({"image_url": harness.image_url()})))
        .await;

    assert_eq!(response.status, JobStatus::Error);
    assert!(response.error.is_some());
    assert!(harness.work_dir_files().is_empty());
}

#[tokio::test]
async fn test_upload_exhaustion_reports_last_error() {
    let harness = Harness::new(Behavior::Frames).await;
    harness.mount_image().await;
    Mock::given(method("POST"))
        .and(path("/v6/uploadFiles"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(2)
        .mount(&harness.server)
        .await;

    let response = harness
        .handler
        .handle(&JobRequest::new(json!({"image_url": harness.image_url()})))
        .await;

    assert_eq!(response.status, JobStatus::Error);
    assert!(response.error.unwrap().contains("upstream down"));
    assert!(harness.work_dir_files().is_empty());
}

#[tokio::test]
async fn test_executor_runs_local_job_once() {
    let harness = Harness::new(Behavior::Frames).await;
    harness.mount_image().await;
    harness.mount_upload().await;

    let input = json!({"input": {"image_url": harness.image_url(), "num_frames": 2}});
    let source = LocalJobSource::from_args(
        vec!["--test_input".to_string(), input.to_string()],
        harness.work_dir.path(),
    )
    .unwrap()
    .unwrap();

    let executor = JobExecutor::new(
        harness.handler.clone(),
        Box::new(source),
        Duration::from_millis(10),
    );
    let handled = executor.run().await.unwrap();

    assert_eq!(handled, 1);
    assert_eq!(harness.encoder.outputs.lock().unwrap().len(), 1);
}

/// A queue that never has work.
struct IdleSource;

#[async_trait]
impl JobSource for IdleSource {
    async fn next_job(&mut self) -> WorkerResult<Option<JobRequest>> {
        Ok(None)
    }

    async fn complete(&mut self, _job_id: &JobId, _response: &JobResponse) -> WorkerResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_executor_honours_shutdown_requested_before_run() {
    let harness = Harness::new(Behavior::Frames).await;
    let executor = JobExecutor::new(
        harness.handler.clone(),
        Box::new(IdleSource),
        Duration::from_secs(60),
    );

    executor.shutdown();
    let handled = tokio::time::timeout(Duration::from_millis(500), executor.run())
        .await
        .expect("executor ignored an early shutdown")
        .unwrap();

    assert_eq!(handled, 0);
}

#[tokio::test]
async fn test_executor_stops_idle_polling_on_shutdown() {
    let harness = Harness::new(Behavior::Frames).await;
    let executor = Arc::new(JobExecutor::new(
        harness.handler.clone(),
        Box::new(IdleSource),
        Duration::from_secs(60),
    ));

    let running = tokio::spawn({
        let executor = Arc::clone(&executor);
        async move { executor.run().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    executor.shutdown();

    let handled = tokio::time::timeout(Duration::from_millis(500), running)
        .await
        .expect("executor kept polling after shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(handled, 0);
}
