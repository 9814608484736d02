//! Video and script upload.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use autoedit_models::{Job, JobId};
use autoedit_worker::{estimate_processing_seconds, extract_script, ScriptFormat};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Accepted video extensions.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub job_id: String,
    pub message: &'static str,
    pub estimated_seconds: u64,
}

/// Files and fields received from the form.
#[derive(Debug, Default)]
struct UploadForm {
    video_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    script_text: Option<String>,
}

/// Accept a video plus a script and queue a job.
///
/// Nothing is kept on disk unless a job was created.
pub async fn upload(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Json<UploadResponse>> {
    let id = JobId::new();
    let work_dir = state.config.upload_folder.join(id.as_str());
    tokio::fs::create_dir_all(&work_dir).await?;

    match create_job(&state, &id, &work_dir, multipart).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            if let Err(cleanup_err) = tokio::fs::remove_dir_all(&work_dir).await {
                warn!(job_id = %id, "Failed to remove rejected upload: {}", cleanup_err);
            }
            metrics::record_upload_rejected(e.status_code().as_u16());
            Err(e)
        }
    }
}

async fn create_job(
    state: &AppState,
    id: &JobId,
    work_dir: &Path,
    multipart: Multipart,
) -> ApiResult<UploadResponse> {
    let form = receive_form(work_dir, multipart).await?;

    let video_path = form
        .video_path
        .ok_or_else(|| ApiError::bad_request("No video file uploaded"))?;

    let script_text = match (&form.script_path, form.script_text) {
        (Some(path), _) => extract_script(path.clone())
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        (None, Some(text)) => text,
        (None, None) => return Err(ApiError::bad_request("No script provided (either file or text)")),
    };

    let duration = match state.prober.probe(&video_path).await {
        Ok(info) => Some(info.duration),
        Err(e) => {
            warn!(job_id = %id, "Could not probe uploaded video: {}", e);
            None
        }
    };
    let estimated_seconds = estimate_processing_seconds(duration, state.processing_factor);

    let job = Job::new(id.clone(), work_dir, video_path, form.script_path, Some(script_text));
    state.store.create(job).await?;
    state.store.persist_logged().await;

    if let Err(e) = state.executor.submit(id.clone()).await {
        warn!(job_id = %id, "Could not queue job: {}", e);
        let _ = state.store.delete(id).await;
        state.store.persist_logged().await;
        return Err(ApiError::ServiceUnavailable(
            "Server is busy, please try again later".to_string(),
        ));
    }

    metrics::record_job_submitted();
    info!(job_id = %id, estimated_seconds, "Job queued");

    Ok(UploadResponse {
        status: "queued",
        job_id: id.to_string(),
        message: "Video uploaded and queued for processing",
        estimated_seconds,
    })
}

async fn receive_form(work_dir: &Path, mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                if file_name.is_empty() {
                    return Err(ApiError::bad_request("No video file selected"));
                }
                if form.video_path.is_some() {
                    return Err(ApiError::bad_request("Only one video file may be uploaded"));
                }
                if !extension_of(&file_name).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str())) {
                    return Err(ApiError::bad_request(format!(
                        "Video file format not allowed. Allowed formats: {}",
                        VIDEO_EXTENSIONS.join(", ")
                    )));
                }

                let path = work_dir.join(sanitize_filename(&file_name, "video"));
                save_field(field, &path).await?;
                form.video_path = Some(path);
            }
            "script" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                // Browsers send an empty part when no file was chosen
                if file_name.is_empty() {
                    continue;
                }
                if form.script_path.is_some() {
                    return Err(ApiError::bad_request("Only one script file may be uploaded"));
                }
                let allowed = ScriptFormat::accepted_extensions();
                if !extension_of(&file_name).is_some_and(|ext| allowed.contains(&ext.as_str())) {
                    return Err(ApiError::bad_request(format!(
                        "Script file format not allowed. Allowed formats: {}",
                        allowed.join(", ")
                    )));
                }

                let path = work_dir.join(sanitize_filename(&file_name, "script"));
                save_field(field, &path).await?;
                form.script_path = Some(path);
            }
            "script_text" => {
                let text = field.text().await.map_err(multipart_error)?;
                form.script_text = Some(text).filter(|t| !t.trim().is_empty());
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Stream a file field to disk.
async fn save_field(mut field: Field<'_>, path: &Path) -> ApiResult<()> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::bad_request(format!("Invalid upload: {}", e.body_text()))
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Reduce a client file name to a safe single path component.
pub fn sanitize_filename(name: &str, fallback_stem: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    };

    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (base, None),
    };

    let stem = clean(stem);
    let stem = match stem.trim_matches('_') {
        "" => fallback_stem,
        trimmed => trimmed,
    };

    match ext {
        Some(ext) => format!("{}.{}", stem, clean(ext)),
        None => stem.to_string(),
    }
}
