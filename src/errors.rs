use crate::{
    models::response::ApiResponse,
    services::{
        candidate_service::CandidateError, candidate_store::StoreError, file_storage::UploadError,
    },
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;
use tracing::error;

const REDACTED_MESSAGE: &str = "Something went wrong";

/// An error on its way to the client, rendered as the standard envelope with
/// `success: false`.
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub error: String,
    pub message: Option<String>,
    pub details: Option<Value>,
    /// Underlying cause of a 500. Never rendered directly; see
    /// [`reveal_internal_errors`].
    cause: Option<String>,
}

/// Unredacted copy of a 500, attached to the response as an extension.
#[derive(Clone)]
struct InternalCause(AppError);

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: None,
            details: None,
            cause: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// 500 whose body says only "Something went wrong". The cause is kept
    /// for [`reveal_internal_errors`].
    pub fn internal(cause: impl fmt::Display) -> Self {
        let mut err = Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            .with_message(REDACTED_MESSAGE);
        err.cause = Some(cause.to_string());
        err
    }

    fn render(self) -> Response {
        let body = ApiResponse {
            success: false,
            data: self.details,
            error: Some(self.error),
            message: self.message,
            meta: None,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Response layer for development: swap redacted 500 bodies for ones that
/// carry the underlying cause. Installed by `routes::app` when enabled.
pub async fn reveal_internal_errors(mut response: Response) -> Response {
    match response.extensions_mut().remove::<InternalCause>() {
        Some(InternalCause(err)) => err.render(),
        None => response,
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.error, message),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(mut self) -> Response {
        let revealed = self.cause.take().map(|cause| AppError {
            message: Some(cause),
            ..self.clone()
        });
        let mut response = self.render();
        if let Some(revealed) = revealed {
            response.extensions_mut().insert(InternalCause(revealed));
        }
        response
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Rejected(rejection) => AppError::bad_request(rejection.to_string()),
            UploadError::Interrupted(source) => {
                AppError::bad_request("File upload error").with_message(source.to_string())
            }
            UploadError::Io(io) => {
                error!(error = %io, "file storage failure");
                AppError::internal(io)
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), "File upload error").with_message(err.body_text())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        CandidateError::from(err).into()
    }
}

impl From<CandidateError> for AppError {
    fn from(err: CandidateError) -> Self {
        match err {
            CandidateError::Validation(errors) => AppError::bad_request("Validation failed")
                .with_message("Please check the provided data")
                .with_details(json!(errors)),
            CandidateError::NotFound(_) => AppError::not_found("Candidate not found"),
            CandidateError::CvNotFound(_) => AppError::not_found("CV not found for this candidate"),
            CandidateError::Conflict(_) => AppError::new(
                StatusCode::CONFLICT,
                "A record with this data already exists.",
            ),
            CandidateError::Upload(upload) => upload.into(),
            err @ CandidateError::CvNotAttached { candidate_id, .. } => {
                error!(candidate_id, error = %err, "create finished without its CV");
                AppError::internal(err).with_details(json!({ "candidateId": candidate_id }))
            }
            CandidateError::Store(store) => {
                error!(error = %store, "database failure");
                AppError::internal(store)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{upload_policy::UploadRejection, validation::FieldError};
    use axum::body::to_bytes;

    async fn body_of(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_errors_carry_field_list() {
        let err: AppError = CandidateError::Validation(vec![FieldError::new(
            "email",
            "Please provide a valid email address",
        )])
        .into();
        let (status, body) = body_of(err).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["message"], "Please check the provided data");
        assert_eq!(body["data"][0]["field"], "email");
    }

    #[tokio::test]
    async fn conflict_and_missing_map_to_their_statuses() {
        let (status, body) = body_of(CandidateError::Conflict("a@b.co".into()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "A record with this data already exists.");

        let (status, body) = body_of(CandidateError::NotFound(7).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Candidate not found");
    }

    #[tokio::test]
    async fn upload_rejections_are_bad_requests() {
        let err: AppError = UploadError::Rejected(UploadRejection::UnexpectedField).into();
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unexpected file field.");
    }

    #[tokio::test]
    async fn internal_errors_are_redacted_by_default() {
        let (status, body) = body_of(AppError::internal("disk on fire")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["message"], "Something went wrong");
    }

    #[tokio::test]
    async fn reveal_layer_restores_internal_cause() {
        let err = AppError::internal("disk on fire").with_details(json!({ "candidateId": 3 }));
        let response = reveal_internal_errors(err.into_response()).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["message"], "disk on fire");
        assert_eq!(body["data"]["candidateId"], 3);
    }

    #[tokio::test]
    async fn reveal_layer_leaves_client_errors_alone() {
        let err = AppError::from(CandidateError::NotFound(7));
        let response = reveal_internal_errors(err.into_response()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
