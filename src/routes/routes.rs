//! Routes for the candidate API.
//!
//! ## Structure
//! - **Service endpoints**
//!   - `GET    /`        — banner
//!   - `GET    /healthz` — liveness
//!   - `GET    /readyz`  — readiness (database + disk)
//!
//! - **Candidate endpoints** under `/api/candidates`
//!   - `GET    /`          — list (supports page, limit, search)
//!   - `POST   /`          — create, optionally with a `cv` file part
//!   - `GET    /{id}`      — fetch one with nested collections
//!   - `PUT    /{id}`      — partial update, optionally replacing the CV
//!   - `DELETE /{id}`      — delete record and CV
//!   - `GET    /{id}/cv`   — download the CV as an attachment

use crate::{
    handlers::{
        candidate_handlers::{
            create_candidate, delete_candidate, download_cv, get_candidate, list_candidates,
            update_candidate,
        },
        health_handlers::{banner, healthz, readyz},
    },
    errors::reveal_internal_errors,
    services::candidate_service::CandidateService,
};
use axum::{Router, extract::DefaultBodyLimit, middleware, routing::get};

/// Room for the text fields that travel alongside the CV.
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Build the router for all endpoints. Handlers share `CandidateService` as state.
pub fn routes() -> Router<CandidateService> {
    Router::new()
        .route("/", get(banner))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/api/candidates",
            get(list_candidates).post(create_candidate),
        )
        .route(
            "/api/candidates/{id}",
            get(get_candidate)
                .put(update_candidate)
                .delete(delete_candidate),
        )
        .route("/api/candidates/{id}/cv", get(download_cv))
}

/// The complete application: routes, body limit sized to the CV cap, and state.
///
/// With `expose_internal_errors` set, 500 responses carry their cause instead
/// of the generic message.
pub fn app(service: CandidateService, expose_internal_errors: bool) -> Router {
    let body_limit = service.files().spec().max_bytes + FORM_OVERHEAD_BYTES;
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);
    let router = routes().layer(DefaultBodyLimit::max(body_limit));
    let router = if expose_internal_errors {
        router.layer(middleware::map_response(reveal_internal_errors))
    } else {
        router
    };
    router.with_state(service)
}
