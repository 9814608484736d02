//! Job status and download handlers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::warn;

use autoedit_models::{DurationSummary, Job, JobId, JobProgress, JobStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Job status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduction_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl From<Job> for StatusResponse {
    fn from(job: Job) -> Self {
        let completed = job.status == JobStatus::Completed;
        let failed = job.status == JobStatus::Failed;

        Self {
            download_url: completed.then(|| format!("/api/download/{}", job.id)),
            segments_count: completed.then_some(job.segments.len()),
            error: if failed {
                Some(job.error.unwrap_or_else(|| "Unknown error".to_string()))
            } else {
                None
            },
            job_id: job.id.0,
            status: job.status,
            progress: job.progress,
            duration: job.duration,
            reduction_percentage: job.reduction_percentage,
            analysis: job.analysis,
        }
    }
}

async fn find_job(state: &AppState, job_id: String) -> ApiResult<Job> {
    state
        .store
        .get(&JobId::from_string(job_id))
        .await
        .map_err(|_| ApiError::not_found("Job not found"))
}

/// Current state of a job.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let job = find_job(&state, job_id).await?;
    Ok(Json(StatusResponse::from(job)))
}

/// Stream the edited video of a completed job.
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let unavailable = || ApiError::not_found("Processed video not available");

    let job = find_job(&state, job_id).await.map_err(|_| unavailable())?;
    let output_path = match (job.status, job.output_path) {
        (JobStatus::Completed, Some(path)) => path,
        _ => return Err(unavailable()),
    };

    let file = match tokio::fs::File::open(&output_path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(job_id = %job.id, path = %output_path.display(), "Output file missing: {}", e);
            return Err(unavailable());
        }
    };
    let size = file.metadata().await?.len();

    let filename = output_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("edited.mp4")
        .replace('"', "");

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job() -> Job {
        Job::new(JobId::from_string("abc"), "/tmp/abc", "/tmp/abc/in.mp4", None, Some(String::new()))
    }

    #[test]
    fn test_queued_status_has_no_outcome_fields() {
        let response = StatusResponse::from(job());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "queued");
        assert_eq!(json["job_id"], "abc");
        assert!(json.get("download_url").is_none());
        assert!(json.get("error").is_none());
        assert!(json.get("progress").is_none());
    }

    #[test]
    fn test_failed_status_carries_error() {
        let mut job = job();
        job.fail("model unavailable").unwrap();

        let json = serde_json::to_value(StatusResponse::from(job)).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "model unavailable");
        assert_eq!(json["progress"]["percent"], 100);
        assert!(json.get("download_url").is_none());
    }

    #[test]
    fn test_completed_status_has_download_url() {
        let mut job = job();
        job.start(4, chrono::Utc::now()).unwrap();
        job.complete(autoedit_models::JobOutcome {
            output_path: PathBuf::from("/tmp/abc/processed_in.mp4"),
            segments: vec![autoedit_models::Segment::new(0.0, 30.0)],
            analysis: "ok".to_string(),
            duration: DurationSummary {
                original: 120.0,
                processed: 30.0,
            },
        })
        .unwrap();

        let json = serde_json::to_value(StatusResponse::from(job)).unwrap();
        assert_eq!(json["download_url"], "/api/download/abc");
        assert_eq!(json["segments_count"], 1);
        assert_eq!(json["reduction_percentage"], 75.0);
    }
}
