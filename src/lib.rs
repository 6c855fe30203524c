//! Applicant tracking backend: candidates with nested education and work
//! history, plus one CV file per candidate kept on local disk.

pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod retry;
pub mod routes;
pub mod services;

use services::{
    candidate_service::CandidateService,
    candidate_store::SqliteCandidateStore,
    file_storage::{FileStorage, StoragePaths},
    upload_policy::UploadSpec,
};
use sqlx::SqlitePool;
use std::{path::Path, sync::Arc};

/// Wire the SQLite store and CV storage into a service, creating the upload
/// directories if needed.
pub async fn build_service(
    pool: SqlitePool,
    upload_dir: impl AsRef<Path>,
    max_file_size: u64,
) -> std::io::Result<CandidateService> {
    let paths = StoragePaths::new(upload_dir)?;
    paths.ensure_dirs().await?;
    let files = FileStorage::new(paths, UploadSpec::cv_default(max_file_size));
    let store = Arc::new(SqliteCandidateStore::new(Arc::new(pool)));
    Ok(CandidateService::new(store, files))
}
