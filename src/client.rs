//! Typed HTTP client for the candidate API.
//!
//! Reads (`list_candidates`, `get_candidate`, `download_cv`) go through
//! [`with_backoff`]; creates, updates and deletes are sent once.

use crate::{
    models::{
        candidate::{CandidateUpdate, CandidateWithRelations, NewCandidate},
        response::PageMeta,
    },
    retry::{RetryPolicy, Retryable, with_backoff},
    services::upload_policy::UploadSpec,
};
use bytes::Bytes;
use reqwest::{
    Client, Response, StatusCode,
    multipart::{Form, Part},
};
use serde::{Deserialize, de::DeserializeOwned};
use std::{path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no response from server: {0}")]
    NoResponse(#[source] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("could not decode response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("could not build request: {0}")]
    Request(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Retryable for ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::NoResponse(_) => true,
            ClientError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A CV to attach to a create or update.
#[derive(Debug, Clone)]
pub struct CvUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl CvUpload {
    /// Read a file from disk, deriving the MIME type from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("cv.pdf")
            .to_string();
        Ok(Self {
            mime_type: UploadSpec::content_type_for(&file_name).to_string(),
            file_name,
            bytes,
        })
    }

    fn into_part(self) -> ClientResult<Part> {
        Part::bytes(self.bytes)
            .file_name(self.file_name)
            .mime_str(&self.mime_type)
            .map_err(|err| ClientError::Request(err.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CandidateList {
    pub candidates: Vec<CandidateWithRelations>,
    pub meta: Option<PageMeta>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<String>,
    message: Option<String>,
    meta: Option<PageMeta>,
}

#[derive(Debug, Clone)]
pub struct AtsClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl AtsClient {
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ClientError::Request(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_candidates(&self, request: &ListRequest) -> ClientResult<CandidateList> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(page) = request.page {
            query.push(("page", page.to_string()));
        }
        if let Some(limit) = request.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(search) = &request.search {
            query.push(("search", search.clone()));
        }

        let url = self.url("/api/candidates");
        let (url, query) = (&url, &query);
        with_backoff(self.retry, move || async move {
            let response = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(ClientError::NoResponse)?;
            let envelope = envelope::<Vec<CandidateWithRelations>>(response).await?;
            Ok(CandidateList {
                candidates: envelope.data.unwrap_or_default(),
                meta: envelope.meta,
            })
        })
        .await
    }

    pub async fn get_candidate(&self, id: i64) -> ClientResult<CandidateWithRelations> {
        let url = self.url(&format!("/api/candidates/{id}"));
        let url = &url;
        with_backoff(self.retry, move || async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(ClientError::NoResponse)?;
            data(response).await
        })
        .await
    }

    pub async fn download_cv(&self, id: i64) -> ClientResult<Bytes> {
        let url = self.url(&format!("/api/candidates/{id}/cv"));
        let url = &url;
        with_backoff(self.retry, move || async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(ClientError::NoResponse)?;
            let response = ensure_success(response).await?;
            response.bytes().await.map_err(ClientError::Decode)
        })
        .await
    }

    pub async fn create_candidate(
        &self,
        input: &NewCandidate,
        cv: Option<CvUpload>,
    ) -> ClientResult<CandidateWithRelations> {
        let mut form = Form::new()
            .text("firstName", input.first_name.clone())
            .text("lastName", input.last_name.clone())
            .text("email", input.email.clone())
            .text("education", to_json(&input.education)?)
            .text("workExperience", to_json(&input.work_experience)?);
        if let Some(phone) = &input.phone {
            form = form.text("phone", phone.clone());
        }
        if let Some(address) = &input.address {
            form = form.text("address", address.clone());
        }
        if let Some(cv) = cv {
            form = form.part("cv", cv.into_part()?);
        }

        let response = self
            .client
            .post(self.url("/api/candidates"))
            .multipart(form)
            .send()
            .await
            .map_err(ClientError::NoResponse)?;
        data(response).await
    }

    pub async fn update_candidate(
        &self,
        id: i64,
        input: &CandidateUpdate,
        cv: Option<CvUpload>,
    ) -> ClientResult<CandidateWithRelations> {
        let fields = [
            ("firstName", &input.first_name),
            ("lastName", &input.last_name),
            ("email", &input.email),
            ("phone", &input.phone),
            ("address", &input.address),
        ];
        let mut form = Form::new();
        for (name, value) in fields {
            if let Some(value) = value {
                form = form.text(name, value.clone());
            }
        }
        if let Some(cv) = cv {
            form = form.part("cv", cv.into_part()?);
        }

        let response = self
            .client
            .put(self.url(&format!("/api/candidates/{id}")))
            .multipart(form)
            .send()
            .await
            .map_err(ClientError::NoResponse)?;
        data(response).await
    }

    pub async fn delete_candidate(&self, id: i64) -> ClientResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/candidates/{id}")))
            .send()
            .await
            .map_err(ClientError::NoResponse)?;
        ensure_success(response).await?;
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> ClientResult<String> {
    serde_json::to_string(value).map_err(|err| ClientError::Request(err.to_string()))
}

async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<Envelope<serde_json::Value>>().await {
        Ok(body) => match (body.error, body.message) {
            (Some(error), Some(message)) => format!("{error}: {message}"),
            (Some(text), None) | (None, Some(text)) => text,
            (None, None) => "no error message".to_string(),
        },
        Err(_) => "unreadable error body".to_string(),
    };
    Err(ClientError::Status { status, message })
}

async fn envelope<T: DeserializeOwned>(response: Response) -> ClientResult<Envelope<T>> {
    let response = ensure_success(response).await?;
    response.json().await.map_err(ClientError::Decode)
}

async fn data<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    envelope::<T>(response)
        .await?
        .data
        .ok_or_else(|| ClientError::Status {
            status,
            message: "response carried no data".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ClientError {
        ClientError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            message: String::new(),
        }
    }

    #[test]
    fn only_server_errors_and_missing_responses_retry() {
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(409).is_retryable());
        assert!(!ClientError::Request("bad".into()).is_retryable());
    }

    #[tokio::test]
    async fn cv_upload_reads_file_and_guesses_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.docx");
        tokio::fs::write(&path, b"PK").await.unwrap();

        let cv = CvUpload::from_path(&path).await.unwrap();
        assert_eq!(cv.file_name, "resume.docx");
        assert_eq!(
            cv.mime_type,
            crate::services::upload_policy::DOCX_MIME
        );
        assert_eq!(cv.bytes, b"PK");
    }
}
