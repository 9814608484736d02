//! Gemini segment locator.
//!
//! The source video is sent through the Files API (resumable upload), polled
//! until it is active, and then referenced from a generateContent call that
//! carries the editing prompt.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Body, Client};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::GeminiConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::locator::{build_prompt, parse_locator_response, LocateRequest, LocatorOutput, SegmentLocator};

/// Gemini API client.
#[derive(Debug, Clone)]
pub struct GeminiLocator {
    config: GeminiConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    File { file_data: FileData<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

/// File resource returned by the Files API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl RemoteFile {
    fn state(&self) -> &str {
        self.state.as_deref().unwrap_or("STATE_UNSPECIFIED")
    }
}

/// MIME type sent for an uploaded video.
pub fn video_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

impl GeminiLocator {
    /// Create a new locator. Every API call is bounded by the request timeout.
    pub fn new(config: GeminiConfig) -> WorkerResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| WorkerError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn api_key(&self) -> WorkerResult<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| WorkerError::config_error("GEMINI_API_KEY not set"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Upload the video with the resumable upload protocol.
    async fn upload_file(&self, video_path: &Path, api_key: &str) -> WorkerResult<RemoteFile> {
        let size = tokio::fs::metadata(video_path).await?.len();
        let mime_type = video_mime_type(video_path);
        let display_name = video_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video");

        info!(path = %video_path.display(), size, mime_type, "Uploading video to Gemini");

        let start = self
            .client
            .post(self.url("upload/v1beta/files"))
            .query(&[("key", api_key)])
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(|e| WorkerError::ai_failed(format!("Gemini upload request failed: {}", e)))?;

        if !start.status().is_success() {
            let status = start.status();
            let error_text = start.text().await.unwrap_or_default();
            return Err(WorkerError::ai_failed(format!(
                "Gemini upload returned {}: {}",
                status, error_text
            )));
        }

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| WorkerError::ai_failed("Gemini upload did not return an upload URL"))?;

        let file = tokio::fs::File::open(video_path).await?;
        let response = self
            .client
            .post(&upload_url)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| WorkerError::ai_failed(format!("Gemini upload failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(WorkerError::ai_failed(format!(
                "Gemini upload returned {}: {}",
                status, error_text
            )));
        }

        let uploaded: UploadResponse = response.json().await.map_err(|e| {
            WorkerError::ai_failed(format!("Failed to parse Gemini upload response: {}", e))
        })?;

        debug!(name = %uploaded.file.name, state = uploaded.file.state(), "Video uploaded");
        Ok(uploaded.file)
    }

    /// Poll the uploaded file until the service has finished processing it.
    async fn wait_until_active(&self, mut file: RemoteFile, api_key: &str) -> WorkerResult<RemoteFile> {
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.max_upload_wait_secs);

        loop {
            match file.state() {
                "ACTIVE" => return Ok(file),
                "FAILED" => {
                    return Err(WorkerError::ai_failed(format!(
                        "Gemini could not process uploaded video {}",
                        file.name
                    )))
                }
                state => debug!(name = %file.name, state, "Waiting for uploaded video"),
            }

            if tokio::time::Instant::now() + poll_interval > deadline {
                return Err(WorkerError::ai_failed(format!(
                    "Uploaded video {} did not become active within {}s",
                    file.name, self.config.max_upload_wait_secs
                )));
            }
            tokio::time::sleep(poll_interval).await;

            let response = self
                .client
                .get(self.url(&format!("v1beta/{}", file.name)))
                .query(&[("key", api_key)])
                .send()
                .await
                .map_err(|e| WorkerError::ai_failed(format!("Gemini file lookup failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(WorkerError::ai_failed(format!(
                    "Gemini file lookup returned {}: {}",
                    status, error_text
                )));
            }

            file = response.json().await.map_err(|e| {
                WorkerError::ai_failed(format!("Failed to parse Gemini file state: {}", e))
            })?;
        }
    }

    /// Ask the model for segments.
    async fn generate(&self, file: &RemoteFile, prompt: &str, api_key: &str) -> WorkerResult<String> {
        let mime_type = file.mime_type.as_deref().unwrap_or("video/mp4");
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::File {
                        file_data: FileData {
                            mime_type,
                            file_uri: &file.uri,
                        },
                    },
                    Part::Text { text: prompt },
                ],
            }],
        };

        info!(model = %self.config.model, "Calling Gemini generateContent");

        let response = self
            .client
            .post(self.url(&format!("v1beta/models/{}:generateContent", self.config.model)))
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::ai_failed(format!("Gemini API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(WorkerError::ai_failed(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            WorkerError::ai_failed(format!("Failed to parse Gemini response: {}", e))
        })?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(WorkerError::ai_failed("No content in Gemini response"));
        }
        Ok(text)
    }

    /// Remove the uploaded file. Failures are only logged.
    async fn delete_file(&self, name: &str, api_key: &str) {
        let result = self
            .client
            .delete(self.url(&format!("v1beta/{}", name)))
            .query(&[("key", api_key)])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(name, "Deleted uploaded video from Gemini");
            }
            Ok(response) => warn!(name, status = %response.status(), "Failed to delete uploaded video"),
            Err(e) => warn!(name, "Failed to delete uploaded video: {}", e),
        }
    }
}

#[async_trait]
impl SegmentLocator for GeminiLocator {
    async fn locate(&self, request: &LocateRequest<'_>) -> WorkerResult<LocatorOutput> {
        let api_key = self.api_key()?;
        let file = self.upload_file(request.video_path, api_key).await?;
        let name = file.name.clone();

        let result = async {
            let file = self.wait_until_active(file, api_key).await?;
            let prompt = build_prompt(request.video, request.script_text);
            let text = self.generate(&file, &prompt, api_key).await?;
            parse_locator_response(&text)
        }
        .await;

        self.delete_file(&name, api_key).await;

        if let Ok(output) = &result {
            info!(segments = output.segments.len(), "Gemini returned segments");
        }
        result
    }
}
