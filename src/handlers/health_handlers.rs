//! Banner, liveness and readiness handlers.
//!
//! - GET /         -> service banner
//! - GET /healthz  -> liveness ("ok"), no I/O
//! - GET /readyz   -> database ping plus a write/read/delete probe in the
//!   upload temp directory

use crate::services::candidate_service::CandidateService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const PROBE_BYTES: &[u8] = b"readyz";

/// `GET /`
pub async fn banner() -> impl IntoResponse {
    Json(BannerResponse {
        message: "ATS API Server Running",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`: 200 when every check passes, 503 otherwise.
pub async fn readyz(State(service): State<CandidateService>) -> impl IntoResponse {
    let database = match service.store().ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(err) => CheckStatus::failed(format!("error: {err}")),
    };

    let paths = service.files().paths();
    let disk = match fs::create_dir_all(&paths.temp_dir).await {
        Ok(()) => probe_disk(&paths.temp_dir).await,
        Err(err) => CheckStatus::failed(format!("could not create temp dir: {err}")),
    };

    let overall_ok = database.ok && disk.ok;
    let mut checks = BTreeMap::new();
    checks.insert("database", database);
    checks.insert("disk", disk);

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn probe_disk(dir: &Path) -> CheckStatus {
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(err) = fs::write(&probe, PROBE_BYTES).await {
        return CheckStatus::failed(format!("could not write probe file: {err}"));
    }

    let read = fs::read(&probe).await;
    let removed = fs::remove_file(&probe).await;
    match (read, removed) {
        (Ok(bytes), Ok(())) if bytes == PROBE_BYTES => CheckStatus::ok(),
        (Ok(bytes), Err(err)) if bytes == PROBE_BYTES => CheckStatus {
            ok: true,
            error: Some(format!("could not remove probe file: {err}")),
        },
        (Ok(_), _) => CheckStatus::failed("probe file content mismatch"),
        (Err(err), _) => CheckStatus::failed(format!("could not read probe file: {err}")),
    }
}

#[derive(Serialize)]
struct BannerResponse {
    message: &'static str,
    version: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
