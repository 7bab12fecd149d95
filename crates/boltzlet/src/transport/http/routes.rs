//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Multipart, Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;

use crate::request::PredictionRequest;
use crate::service::{JobService, LookupError};
use crate::uploads::{UploadError, UploadKind};
use crate::version::VersionInfo;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
    pub version: VersionInfo,
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

fn validation_error(loc: &[&str], msg: String, error_type: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "detail": [{
                "loc": loc,
                "msg": msg,
                "type": error_type
            }]
        })),
    )
        .into_response()
}

impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let status = match &self {
            LookupError::JobNotFound
            | LookupError::InfoNotFound
            | LookupError::FileNotFound
            | LookupError::StructureNotFound => StatusCode::NOT_FOUND,
            LookupError::FileNotAllowed => StatusCode::FORBIDDEN,
            LookupError::Archive(_) | LookupError::ArchiveTask(_) => {
                tracing::error!(error = %self, "Archive construction failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        detail(status, self.to_string())
    }
}

async fn health_check(State(service): State<Arc<JobService>>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy",
        version: service.version().clone(),
    })
}

async fn predict(
    State(service): State<Arc<JobService>>,
    body: Result<Json<PredictionRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return validation_error(&["body"], rejection.body_text(), "json_invalid");
        }
    };
    if let Err(e) = request.validate() {
        return validation_error(&["body", "sequences"], e.to_string(), "value_error");
    }

    // Run detached so a dropped connection cannot abandon the predictor
    // halfway and leave the record `running`.
    match service.spawn_prediction(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Prediction task lost");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "prediction task lost")
        }
    }
}

async fn list_jobs(State(service): State<Arc<JobService>>) -> Response {
    match service.list_jobs() {
        Ok(jobs) => Json(json!({ "jobs": jobs })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list jobs");
            detail(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to list jobs: {e}"))
        }
    }
}

async fn get_job(
    State(service): State<Arc<JobService>>,
    Path(job_id): Path<String>,
) -> Result<Response, LookupError> {
    Ok(Json(service.job(&job_id)?).into_response())
}

async fn get_results(
    State(service): State<Arc<JobService>>,
    Path(job_id): Path<String>,
) -> Result<Response, LookupError> {
    Ok(Json(service.results(&job_id)?).into_response())
}

async fn get_file(
    State(service): State<Arc<JobService>>,
    Path((job_id, filename)): Path<(String, String)>,
) -> Result<Response, LookupError> {
    let path = service.artifact(&job_id, &filename)?;
    let read_failed =
        |e: &dyn std::fmt::Display| detail(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read file: {e}"));

    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) => return Ok(read_failed(&e)),
    };
    if path.extension().is_some_and(|ext| ext == "json") {
        return Ok(match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => Json(value).into_response(),
            Err(e) => read_failed(&e),
        });
    }

    let mime = mime_guess::from_path(&path).first_or_text_plain();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], text).into_response())
}

async fn get_pdb(
    State(service): State<Arc<JobService>>,
    Path(job_id): Path<String>,
) -> Result<Response, LookupError> {
    let (id, path) = service.structure(&job_id)?;
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to open structure file");
            return Ok(detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to read file: {e}"),
            ));
        }
    };
    let body = Body::from_stream(tokio_util::io::ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "chemical/x-pdb".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}.pdb\""),
            ),
        ],
        body,
    )
        .into_response())
}

async fn download(
    State(service): State<Arc<JobService>>,
    Path(job_id): Path<String>,
) -> Result<Response, LookupError> {
    let (id, bytes) = service.archive(&job_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}_results.zip\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn upload(service: &JobService, kind: UploadKind, mut multipart: Multipart) -> Response {
    let mut file = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((name, bytes)),
                    Err(e) => return detail(StatusCode::BAD_REQUEST, e.body_text()),
                }
                break;
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => return detail(StatusCode::BAD_REQUEST, e.body_text()),
        }
    }

    let Some((name, bytes)) = file else {
        return detail(StatusCode::BAD_REQUEST, UploadError::MissingFile.to_string());
    };
    match service.uploads().save(kind, &name, &bytes) {
        Ok(stored) => Json(stored).into_response(),
        Err(e @ (UploadError::Rejected(_) | UploadError::MissingFile)) => {
            detail(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(UploadError::Io { source, .. }) => {
            tracing::error!(error = %source, "Failed to store upload");
            detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to save file: {source}"),
            )
        }
    }
}

async fn upload_msa(State(service): State<Arc<JobService>>, multipart: Multipart) -> Response {
    upload(&service, UploadKind::Msa, multipart).await
}

async fn upload_template(
    State(service): State<Arc<JobService>>,
    multipart: Multipart,
) -> Response {
    upload(&service, UploadKind::Template, multipart).await
}

pub fn routes(service: Arc<JobService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/predict", post(predict))
        .route("/upload_msa", post(upload_msa))
        .route("/upload_template", post(upload_template))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/results", get(get_results))
        .route("/api/jobs/{id}/file/{filename}", get(get_file))
        .route("/api/jobs/{id}/pdb", get(get_pdb))
        .route("/api/jobs/{id}/download", get(download))
        .with_state(service)
}
