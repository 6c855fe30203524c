//! `AtsClient` against the real router on an ephemeral port, plus retry
//! behavior against a scripted stub server.

use ats_backend::{
    build_service,
    client::{AtsClient, ClientError, CvUpload, ListRequest},
    db,
    models::{
        candidate::{CandidateUpdate, NewCandidate},
        work_experience::NewWorkExperience,
    },
    retry::RetryPolicy,
    routes::routes,
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_api() -> (AtsClient, TempDir) {
    let pool = db::connect_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let service = build_service(pool, dir.path(), 1024 * 1024).await.unwrap();
    let addr = serve(routes::app(service, false)).await;
    let client = AtsClient::new(format!("http://{addr}"))
        .unwrap()
        .with_retry_policy(fast_retries());
    (client, dir)
}

fn grace() -> NewCandidate {
    NewCandidate {
        first_name: "Grace".into(),
        last_name: "Hopper".into(),
        email: "grace@x.com".into(),
        phone: Some("+1 555 000 1111".into()),
        work_experience: vec![NewWorkExperience {
            company: "Acme Corp".into(),
            position: "Rear Admiral".into(),
            start_date: "1943-01-01".into(),
            end_date: None,
            description: None,
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn client_round_trips_a_candidate_with_cv() {
    let (client, _dir) = spawn_api().await;
    let cv = CvUpload {
        file_name: "grace.pdf".into(),
        mime_type: "application/pdf".into(),
        bytes: b"%PDF-1.7 compiler".to_vec(),
    };

    let created = client.create_candidate(&grace(), Some(cv)).await.unwrap();
    assert!(created.cv_file_path().is_some());

    let fetched = client.get_candidate(created.id()).await.unwrap();
    assert_eq!(fetched.candidate.email, "grace@x.com");
    assert_eq!(fetched.work_experience[0].company, "Acme Corp");

    let listed = client
        .list_candidates(&ListRequest {
            search: Some("acme".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(listed.candidates.len(), 1);
    assert_eq!(listed.meta.unwrap().total, 1);

    let bytes = client.download_cv(created.id()).await.unwrap();
    assert_eq!(&bytes[..], b"%PDF-1.7 compiler");

    let updated = client
        .update_candidate(
            created.id(),
            &CandidateUpdate {
                address: Some("Arlington, VA".into()),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(updated.candidate.address.as_deref(), Some("Arlington, VA"));
    assert_eq!(updated.cv_file_path(), created.cv_file_path());

    client.delete_candidate(created.id()).await.unwrap();
    let err = client.get_candidate(created.id()).await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status, .. } if status == 404));
}

#[tokio::test]
async fn client_surfaces_conflicts_without_retrying() {
    let (client, _dir) = spawn_api().await;
    client.create_candidate(&grace(), None).await.unwrap();

    let err = client.create_candidate(&grace(), None).await.unwrap_err();
    let ClientError::Status { status, message } = err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(status, 409);
    assert!(message.contains("already exists"));
}

#[derive(Clone, Default)]
struct Flaky {
    calls: Arc<AtomicU32>,
}

/// Fails twice with 503, then answers.
async fn flaky_get(State(flaky): State<Flaky>) -> impl IntoResponse {
    if flaky.calls.fetch_add(1, Ordering::SeqCst) < 2 {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "success": false }))).into_response();
    }
    Json(json!({
        "success": true,
        "data": {
            "id": 1,
            "firstName": "Grace",
            "lastName": "Hopper",
            "email": "grace@x.com",
            "phone": null,
            "address": null,
            "cvFilePath": null,
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "education": [],
            "workExperience": []
        }
    }))
    .into_response()
}

async fn always_unavailable(State(flaky): State<Flaky>) -> impl IntoResponse {
    flaky.calls.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "success": false, "error": "Internal server error" })),
    )
}

#[tokio::test]
async fn reads_retry_through_server_errors() {
    let flaky = Flaky::default();
    let app = Router::new()
        .route("/api/candidates/{id}", get(flaky_get))
        .with_state(flaky.clone());
    let addr = serve(app).await;
    let client = AtsClient::new(format!("http://{addr}"))
        .unwrap()
        .with_retry_policy(fast_retries());

    let candidate = client.get_candidate(1).await.unwrap();

    assert_eq!(candidate.candidate.first_name, "Grace");
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn writes_are_never_retried() {
    let flaky = Flaky::default();
    let app = Router::new()
        .route(
            "/api/candidates",
            get(always_unavailable).post(always_unavailable),
        )
        .with_state(flaky.clone());
    let addr = serve(app).await;
    let client = AtsClient::new(format!("http://{addr}"))
        .unwrap()
        .with_retry_policy(fast_retries());

    let err = client.create_candidate(&grace(), None).await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status, .. } if status == 503));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);

    let err = client
        .list_candidates(&ListRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status, .. } if status == 503));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 1 + 4);
}

#[tokio::test]
async fn unreachable_server_is_retried_then_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = AtsClient::new(format!("http://{addr}"))
        .unwrap()
        .with_retry_policy(fast_retries());
    let err = client.get_candidate(1).await.unwrap_err();
    assert!(matches!(err, ClientError::NoResponse(_)));
}
