use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::archive::{naming, ArchivedFile};
use crate::watch::{SessionSnapshot, SubmitOutcome, WatchSupervisor};

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<WatchSupervisor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadRequest {
    pub customer_ident: Option<String>,
    pub wait_seconds: Option<f64>,
    pub poll_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub status: &'static str,
    pub customer_ident: String,
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestDocumentResponse {
    pub customer_ident: String,
    pub document_ident: String,
    pub file_name: Option<String>,
    pub size_bytes: u64,
    pub saved_at: chrono::DateTime<chrono::Utc>,
    /// Path under `/files` where the document can be fetched.
    pub url: Option<String>,
}

impl From<ArchivedFile> for LatestDocumentResponse {
    fn from(file: ArchivedFile) -> Self {
        let file_name = file.file_name().map(str::to_string);
        Self {
            url: file_name.as_ref().map(|name| format!("/files/{}", name)),
            customer_ident: file.customer_ident,
            document_ident: file.document_ident,
            file_name,
            size_bytes: file.size_bytes,
            saved_at: file.saved_at,
        }
    }
}

/// GET /healthz
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /download
///
/// Starts a watch and answers immediately; the result is observed through
/// `GET /download/{customerIdent}` or the archive.
pub async fn start_download(
    State(state): State<AppState>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DownloadResponse>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let customer_ident = request
        .customer_ident
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("customerIdent is required".to_string()))?;
    if !naming::ident_fits(&customer_ident) {
        return Err(ApiError::BadRequest("customerIdent is too long".to_string()));
    }

    let wait = seconds("waitSeconds", request.wait_seconds)?;
    let poll = seconds("pollSeconds", request.poll_seconds)?;

    let outcome = state.supervisor.submit(&customer_ident, wait, poll);
    let status = match outcome {
        SubmitOutcome::Accepted { .. } => "accepted",
        SubmitOutcome::AlreadyRunning { .. } => "already_running",
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadResponse {
            status,
            customer_ident,
            session_id: outcome.session_id(),
        }),
    ))
}

/// GET /download/{customerIdent}
///
/// A finished session is returned once and then forgotten.
pub async fn get_download_status(
    State(state): State<AppState>,
    Path(customer_ident): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state
        .supervisor
        .poll(&customer_ident)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no watch tracked for '{}'", customer_ident)))
}

/// GET /documents/{customerIdent}/latest
pub async fn get_latest_document(
    State(state): State<AppState>,
    Path(customer_ident): Path<String>,
) -> Result<Json<LatestDocumentResponse>, ApiError> {
    let latest = state
        .supervisor
        .archive()
        .latest(&customer_ident)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    latest
        .map(|file| Json(file.into()))
        .ok_or_else(|| ApiError::NotFound(format!("no document archived for '{}'", customer_ident)))
}

/// Convert optional request seconds; anything not positive means zero.
fn seconds(field: &str, value: Option<f64>) -> Result<Option<Duration>, ApiError> {
    match value {
        None => Ok(None),
        Some(v) if v.is_nan() => Err(ApiError::BadRequest(format!("{} must be a number", field))),
        Some(v) if v <= 0.0 => Ok(Some(Duration::ZERO)),
        Some(v) => Duration::try_from_secs_f64(v)
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("{} is out of range", field))),
    }
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalError(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_conversion() {
        assert_eq!(seconds("waitSeconds", None).unwrap(), None);
        assert_eq!(
            seconds("waitSeconds", Some(1.5)).unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(seconds("waitSeconds", Some(-3.0)).unwrap(), Some(Duration::ZERO));
        assert!(seconds("waitSeconds", Some(f64::NAN)).is_err());
        assert!(seconds("waitSeconds", Some(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_request_field_names() {
        let request: DownloadRequest = serde_json::from_str(
            r#"{"customerIdent": "abc", "waitSeconds": 10, "pollSeconds": 2.5}"#,
        )
        .unwrap();
        assert_eq!(request.customer_ident.as_deref(), Some("abc"));
        assert_eq!(request.wait_seconds, Some(10.0));
        assert_eq!(request.poll_seconds, Some(2.5));

        let empty: DownloadRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.customer_ident.is_none());
    }
}
