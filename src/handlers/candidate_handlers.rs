//! HTTP handlers for candidates and their CVs.
//!
//! Create and update accept either `multipart/form-data` (text fields plus an
//! optional `cv` file part) or a JSON body. The CV part is streamed straight
//! into the temp directory; everything after that is delegated to
//! `CandidateService`.

use crate::{
    errors::AppError,
    models::{
        candidate::{CandidateUpdate, NewCandidate},
        response::{ApiResponse, PageMeta},
    },
    services::{
        candidate_service::CandidateService,
        candidate_store::ListQuery,
        file_storage::{FileStorage, IncomingFile, UploadError},
        upload_policy::UploadRejection,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::io::ReaderStream;
use tracing::warn;

const CV_FIELD: &str = "cv";
const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 100;

/// Raw `?page=&limit=&search=`. Values are kept as strings so malformed
/// numbers fall back to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub search: Option<String>,
}

impl ListParams {
    pub fn into_query(self) -> ListQuery {
        let page = self
            .page
            .and_then(|p| p.trim().parse::<u32>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(DEFAULT_PAGE);
        let limit = self
            .limit
            .and_then(|l| l.trim().parse::<u32>().ok())
            .filter(|l| *l >= 1)
            .map(|l| l.min(MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);
        let search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        ListQuery {
            page,
            limit,
            search,
        }
    }
}

/// `GET /api/candidates`
pub async fn list_candidates(
    State(service): State<CandidateService>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.into_query();
    let page = service.list(&query).await?;

    let message = match &query.search {
        Some(term) => format!("Found {} candidates matching \"{}\"", page.total, term),
        None => "Candidates retrieved successfully".to_string(),
    };
    let meta = PageMeta::new(query.page, query.limit, page.total);
    Ok(Json(ApiResponse::success(page.candidates, message).with_meta(meta)))
}

/// `GET /api/candidates/{id}`
pub async fn get_candidate(
    State(service): State<CandidateService>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&raw_id)?;
    let candidate = service.get(id).await?;
    Ok(Json(ApiResponse::success(
        candidate,
        "Candidate retrieved successfully",
    )))
}

/// `POST /api/candidates`
pub async fn create_candidate(
    State(service): State<CandidateService>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    let submission = read_submission(&service, request).await?;
    let with_cv = submission.cv.is_some();
    let (input, cv) = submission.into_parts::<NewCandidate>(service.files()).await?;

    let candidate = service.create(input, cv).await?;
    let message = if with_cv {
        "Candidate created successfully with CV upload"
    } else {
        "Candidate created successfully"
    };
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(candidate, message)),
    ))
}

/// `PUT /api/candidates/{id}`
pub async fn update_candidate(
    State(service): State<CandidateService>,
    Path(raw_id): Path<String>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    // Checked before the body is read so nothing reaches the temp dir.
    let id = parse_id(&raw_id)?;
    let submission = read_submission(&service, request).await?;
    let with_cv = submission.cv.is_some();
    let (input, cv) = submission
        .into_parts::<CandidateUpdate>(service.files())
        .await?;

    let candidate = service.update(id, input, cv).await?;
    let message = if with_cv {
        "Candidate updated successfully with new CV"
    } else {
        "Candidate updated successfully"
    };
    Ok(Json(ApiResponse::success(candidate, message)))
}

/// `DELETE /api/candidates/{id}`
pub async fn delete_candidate(
    State(service): State<CandidateService>,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&raw_id)?;
    service.delete(id).await?;
    Ok(Json(ApiResponse::message("Candidate deleted successfully")))
}

/// `GET /api/candidates/{id}/cv`: stream the stored file as an attachment.
pub async fn download_cv(
    State(service): State<CandidateService>,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&raw_id)?;
    let download = service.open_cv(id).await?;

    let body = Body::from_stream(ReaderStream::new(download.file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(download.content_type),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size_bytes));
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download.file_name.replace(['"', '\\'], "_")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::bad_request("Invalid candidate ID"))
}

/// Request fields plus the CV already sitting in the temp directory.
#[derive(Debug, Default)]
struct Submission {
    fields: Map<String, Value>,
    cv: Option<IncomingFile>,
}

impl Submission {
    /// Deserialize the fields into `T`. The received file is discarded when
    /// the fields do not fit.
    async fn into_parts<T: DeserializeOwned>(
        self,
        files: &FileStorage,
    ) -> Result<(T, Option<IncomingFile>), AppError> {
        match serde_json::from_value::<T>(Value::Object(self.fields)) {
            Ok(input) => Ok((input, self.cv)),
            Err(err) => {
                if let Some(cv) = &self.cv {
                    files.remove_if_exists(&cv.temp_path).await;
                }
                Err(AppError::bad_request("Invalid form data format").with_message(err.to_string()))
            }
        }
    }
}

async fn read_submission(
    service: &CandidateService,
    request: Request,
) -> Result<Submission, AppError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, service)
            .await
            .map_err(|rej| {
                AppError::new(rej.status(), "Invalid form data format").with_message(rej.body_text())
            })?;
        return read_multipart(service.files(), multipart).await;
    }

    let Json(body) = Json::<Value>::from_request(request, service)
        .await
        .map_err(|rej| {
            AppError::new(rej.status(), "Invalid request body").with_message(rej.body_text())
        })?;
    match body {
        Value::Object(fields) => Ok(Submission { fields, cv: None }),
        _ => Err(AppError::bad_request("Invalid request body")
            .with_message("Expected a JSON object")),
    }
}

/// Drain the multipart stream. If anything fails after the CV was received,
/// the temp file is removed before the error is returned.
async fn read_multipart(files: &FileStorage, mut multipart: Multipart) -> Result<Submission, AppError> {
    let mut submission = Submission::default();
    let mut candidate_data = None;

    if let Err(err) = collect_parts(files, &mut multipart, &mut submission, &mut candidate_data).await {
        if let Some(cv) = submission.cv.take() {
            files.remove_if_exists(&cv.temp_path).await;
        }
        return Err(err);
    }

    // Fields sent individually win over the bundled `candidateData` object.
    if let Some(Value::Object(bundled)) = candidate_data {
        for (key, value) in bundled {
            submission.fields.entry(key).or_insert(value);
        }
    }
    Ok(submission)
}

async fn collect_parts(
    files: &FileStorage,
    multipart: &mut Multipart,
    submission: &mut Submission,
    candidate_data: &mut Option<Value>,
) -> Result<(), AppError> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if let Some(file_name) = field.file_name().map(str::to_string) {
            if name != CV_FIELD {
                return Err(UploadError::from(UploadRejection::UnexpectedField).into());
            }
            if submission.cv.is_some() {
                return Err(UploadError::from(UploadRejection::TooManyFiles).into());
            }
            // Browsers send an empty part when no file was chosen.
            if file_name.is_empty() {
                continue;
            }
            let mime_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let received = files.receive(&file_name, &mime_type, field).await?;
            submission.cv = Some(received);
            continue;
        }

        let text = field.text().await?;
        match name.as_str() {
            "education" | "workExperience" => {
                submission.fields.insert(name.clone(), json_array(&name, &text));
            }
            "candidateData" => match serde_json::from_str::<Value>(&text) {
                Ok(value @ Value::Object(_)) => *candidate_data = Some(value),
                _ => {
                    return Err(AppError::bad_request("Invalid form data format")
                        .with_message("candidateData must be a JSON object"));
                }
            },
            _ => {
                submission.fields.insert(name, Value::String(text));
            }
        }
    }
    Ok(())
}

/// Nested collections travel as JSON strings inside the form. Anything that
/// is not an array is treated as empty.
fn json_array(name: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Array(Vec::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Array(_)) => value,
        Ok(_) | Err(_) => {
            warn!(field = name, "ignoring form field that is not a JSON array");
            Value::Array(Vec::new())
        }
    }
}
