//! Job sources.
//!
//! A source hands out one job at a time and receives its response:
//! [`LocalJobSource`] runs a single test input, [`HttpJobSource`] polls the
//! serverless queue endpoints.

use std::path::Path;

use async_trait::async_trait;
use i2v_models::{JobId, JobRequest, JobResponse};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{WorkerError, WorkerResult};

/// Name of the local test input file.
pub const TEST_INPUT_FILE: &str = "test_input.json";

const TEST_INPUT_ARG: &str = "--test_input";
const LOCAL_JOB_ID: &str = "local_test";

#[async_trait]
pub trait JobSource: Send + Sync {
    /// Fetch the next job, or `None` when nothing is queued right now.
    async fn next_job(&mut self) -> WorkerResult<Option<JobRequest>>;

    /// Report the response for a finished job.
    async fn complete(&mut self, job_id: &JobId, response: &JobResponse) -> WorkerResult<()>;

    /// True once the source will never produce another job.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Runs exactly one job from a command-line argument or `test_input.json`.
#[derive(Debug)]
pub struct LocalJobSource {
    job: Option<JobRequest>,
    responses: Vec<(JobId, JobResponse)>,
}

impl LocalJobSource {
    pub fn new(job: JobRequest) -> Self {
        Self {
            job: Some(job),
            responses: Vec::new(),
        }
    }

    /// Build from `--test_input '<json>'` (or `--test_input=<json>`), falling
    /// back to `test_input.json` in `dir`. `Ok(None)` when neither is present.
    pub fn from_args<I>(args: I, dir: &Path) -> WorkerResult<Option<Self>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let raw = if arg == TEST_INPUT_ARG {
                args.next().ok_or_else(|| {
                    WorkerError::config_error(format!("{} requires a JSON value", TEST_INPUT_ARG))
                })?
            } else if let Some(value) = arg.strip_prefix("--test_input=") {
                value.to_string()
            } else {
                continue;
            };
            info!("Using job input from {}", TEST_INPUT_ARG);
            return Ok(Some(Self::new(parse_job(&raw)?)));
        }

        let path = dir.join(TEST_INPUT_FILE);
        if path.is_file() {
            let raw = std::fs::read_to_string(&path)?;
            info!("Using job input from {}", path.display());
            return Ok(Some(Self::new(parse_job(&raw)?)));
        }

        Ok(None)
    }

    /// Responses reported so far.
    pub fn responses(&self) -> &[(JobId, JobResponse)] {
        &self.responses
    }
}

fn parse_job(raw: &str) -> WorkerResult<JobRequest> {
    let mut value: serde_json::Value = serde_json::from_str(raw)?;
    if let Some(object) = value.as_object_mut() {
        object.entry("id").or_insert_with(|| json!(LOCAL_JOB_ID));
    }
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl JobSource for LocalJobSource {
    async fn next_job(&mut self) -> WorkerResult<Option<JobRequest>> {
        Ok(self.job.take())
    }

    async fn complete(&mut self, job_id: &JobId, response: &JobResponse) -> WorkerResult<()> {
        println!("{}", serde_json::to_string_pretty(response)?);
        self.responses.push((job_id.clone(), response.clone()));
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.job.is_none()
    }
}

/// Polls the serverless job endpoints over HTTP.
#[derive(Debug, Clone)]
pub struct HttpJobSource {
    client: Client,
    get_job_url: String,
    post_output_url: String,
    api_key: Option<String>,
}

impl HttpJobSource {
    pub fn new(
        client: Client,
        get_job_url: &str,
        post_output_url: &str,
        worker_id: &str,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            get_job_url: get_job_url.replace("$ID", worker_id),
            post_output_url: post_output_url.to_string(),
            api_key,
        }
    }

    /// Build from `RUNPOD_WEBHOOK_GET_JOB`, `RUNPOD_WEBHOOK_POST_OUTPUT`,
    /// `RUNPOD_POD_ID` and `RUNPOD_AI_API_KEY`. `Ok(None)` when the queue
    /// endpoint is not configured.
    pub fn from_env(client: Client) -> WorkerResult<Option<Self>> {
        let Ok(get_job_url) = std::env::var("RUNPOD_WEBHOOK_GET_JOB") else {
            return Ok(None);
        };
        let post_output_url = std::env::var("RUNPOD_WEBHOOK_POST_OUTPUT").map_err(|_| {
            WorkerError::config_error(
                "RUNPOD_WEBHOOK_POST_OUTPUT must be set with RUNPOD_WEBHOOK_GET_JOB",
            )
        })?;
        let worker_id = std::env::var("RUNPOD_POD_ID").unwrap_or_else(|_| "local".to_string());
        let api_key = std::env::var("RUNPOD_AI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        Ok(Some(Self::new(
            client,
            &get_job_url,
            &post_output_url,
            &worker_id,
            api_key,
        )))
    }

    fn output_url(&self, job_id: &JobId) -> String {
        self.post_output_url.replace("$ID", job_id.as_str())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(reqwest::header::AUTHORIZATION, key),
            None => request,
        }
    }
}

/// Job id of a raw payload, accepting string or numeric ids.
fn raw_job_id(value: &Value) -> Option<JobId> {
    match value.get("id")? {
        Value::String(id) if !id.is_empty() => Some(JobId::from_string(id.as_str())),
        Value::Number(id) => Some(JobId::from_string(id.to_string())),
        _ => None,
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn next_job(&mut self) -> WorkerResult<Option<JobRequest>> {
        let response = self
            .authorize(self.client.get(&self.get_job_url))
            .send()
            .await
            .map_err(|e| WorkerError::queue_failed(format!("job poll failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::queue_failed(format!(
                "job poll returned HTTP {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(&body)?;
        let id = raw_job_id(&value);
        match serde_json::from_value::<JobRequest>(value) {
            Ok(job) => {
                debug!(job_id = %job.id, "Received job");
                Ok(Some(job))
            }
            // Report the bad payload against the job so the queue does not hang on it
            Err(e) => match id {
                Some(id) => {
                    warn!(job_id = %id, "Rejected job payload: {}", e);
                    let response = JobResponse::error(format!("Invalid job payload: {}", e));
                    self.complete(&id, &response).await?;
                    Ok(None)
                }
                None => Err(e.into()),
            },
        }
    }

    async fn complete(&mut self, job_id: &JobId, response: &JobResponse) -> WorkerResult<()> {
        let result = self
            .authorize(self.client.post(self.output_url(job_id)))
            .json(&json!({ "output": response }))
            .send()
            .await
            .map_err(|e| WorkerError::queue_failed(format!("posting output failed: {}", e)))?;

        let status = result.status();
        if !status.is_success() {
            return Err(WorkerError::queue_failed(format!(
                "posting output for {} returned HTTP {}",
                job_id, status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_ok;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_local_source_from_argument() {
        let dir = TempDir::new().unwrap();
        let mut source = LocalJobSource::from_args(
            args(&["i2v-worker", "--test_input", r#"{"input": {"image_url": "https://x/a.png"}}"#]),
            dir.path(),
        )
        .unwrap()
        .unwrap();

        assert!(!source.is_exhausted());
        let job = source.next_job().await.unwrap().unwrap();
        assert_eq!(job.id.as_str(), "local_test");
        assert_eq!(job.input["image_url"], "https://x/a.png");

        assert!(source.is_exhausted());
        assert!(source.next_job().await.unwrap().is_none());

        source
            .complete(&job.id, &JobResponse::success("https://u/f.mp4"))
            .await
            .unwrap();
        assert_eq!(source.responses().len(), 1);
    }

    #[test]
    fn test_local_source_equals_form_and_file() {
        let dir = TempDir::new().unwrap();
        let source = LocalJobSource::from_args(
            args(&["bin", r#"--test_input={"id": "abc", "input": {}}"#]),
            dir.path(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(source.job.as_ref().unwrap().id.as_str(), "abc");

        assert!(LocalJobSource::from_args(args(&["bin"]), dir.path())
            .unwrap()
            .is_none());

        std::fs::write(
            dir.path().join(TEST_INPUT_FILE),
            r#"{"input": {"image_url": "https://x/b.png"}}"#,
        )
        .unwrap();
        let source = LocalJobSource::from_args(args(&["bin"]), dir.path())
            .unwrap()
            .unwrap();
        assert_eq!(source.job.as_ref().unwrap().input["image_url"], "https://x/b.png");
    }

    #[test]
    fn test_local_source_rejects_bad_arguments() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            LocalJobSource::from_args(args(&["bin", "--test_input"]), dir.path()),
            Err(WorkerError::ConfigError(_))
        ));
        assert!(matches!(
            LocalJobSource::from_args(args(&["bin", "--test_input", "{not json"]), dir.path()),
            Err(WorkerError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_http_source_polls_and_posts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job-take/pod-7"))
            .and(header("authorization", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "job-42",
                "input": {"image_url": "https://x/c.png"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/job-take/pod-7"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/job-done/job-42"))
            .and(body_json(json!({
                "output": {"status": "SUCCESS", "result": "https://u/v.mp4"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut source = HttpJobSource::new(
            Client::new(),
            &format!("{}/job-take/$ID", server.uri()),
            &format!("{}/job-done/$ID", server.uri()),
            "pod-7",
            Some("secret".to_string()),
        );

        let job = assert_ok!(source.next_job().await).unwrap();
        assert_eq!(job.id.as_str(), "job-42");
        assert!(source.next_job().await.unwrap().is_none());
        assert!(!source.is_exhausted());

        source
            .complete(&job.id, &JobResponse::success("https://u/v.mp4"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_source_reports_malformed_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job-take/pod-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "input": {"image_url": "https://x/d.png"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/job-done/42"))
            .and(body_partial_json(json!({"output": {"status": "ERROR"}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut source = HttpJobSource::new(
            Client::new(),
            &format!("{}/job-take/$ID", server.uri()),
            &format!("{}/job-done/$ID", server.uri()),
            "pod-3",
            None,
        );

        assert!(assert_ok!(source.next_job().await).is_none());
    }

    #[tokio::test]
    async fn test_http_source_malformed_job_without_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#""not a job""#))
            .mount(&server)
            .await;

        let mut source = HttpJobSource::new(
            Client::new(),
            &format!("{}/job-take/$ID", server.uri()),
            &format!("{}/job-done/$ID", server.uri()),
            "pod-3",
            None,
        );
        assert!(matches!(source.next_job().await, Err(WorkerError::Json(_))));
    }

    #[tokio::test]
    async fn test_http_source_poll_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut source = HttpJobSource::new(
            Client::new(),
            &format!("{}/job-take/$ID", server.uri()),
            &format!("{}/job-done/$ID", server.uri()),
            "pod-1",
            None,
        );
        assert!(matches!(
            source.next_job().await,
            Err(WorkerError::QueueFailed(_))
        ));
    }
}
