//! Sequences validation, persistence and the CV file
//! lifecycle for every candidate operation.
//!
//! Create: `NoFile → TempReceived → EntityCreated → Finalized → EntityUpdated`.
//! Update: `NoFile → TempReceived → Finalized → EntityUpdated`.
//!
//! Every step that can fail after a file reached disk returns a
//! [`StepFailure`] naming the file it leaves behind; the service removes that
//! file before the error is surfaced.

use super::{
    candidate_store::{CandidatePage, CandidateStore, ListQuery, StoreError, UpdatedCandidate},
    file_storage::{FileStorage, FinalizedFile, IncomingFile, SweepReport, UploadError},
    upload_policy::UploadSpec,
    validation::{FieldError, validate_new_candidate, validate_update},
};
use crate::models::candidate::{CandidatePatch, CandidateUpdate, CandidateWithRelations, NewCandidate};
use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("candidate {0} not found")]
    NotFound(i64),
    #[error("no CV stored for candidate {0}")]
    CvNotFound(i64),
    #[error("a candidate with email `{0}` already exists")]
    Conflict(String),
    #[error("candidate {candidate_id} was created but its CV could not be stored")]
    CvNotAttached {
        candidate_id: i64,
        #[source]
        source: Box<CandidateError>,
    },
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CandidateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail(email) => CandidateError::Conflict(email),
            StoreError::NotFound(id) => CandidateError::NotFound(id),
            other => CandidateError::Store(other),
        }
    }
}

pub type CandidateResult<T> = Result<T, CandidateError>;

/// Where a create or update currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    NoFile,
    TempReceived,
    EntityCreated,
    Finalized,
    EntityUpdated,
}

/// Cleanup owed by a failed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    Nothing,
    RemoveFile(PathBuf),
}

impl Compensation {
    fn for_temp(file: Option<&IncomingFile>) -> Self {
        match file {
            Some(file) => Compensation::RemoveFile(file.temp_path.clone()),
            None => Compensation::Nothing,
        }
    }
}

/// A step's error paired with the cleanup it requires.
#[derive(Debug)]
pub struct StepFailure {
    pub stage: UploadStage,
    pub error: CandidateError,
    pub compensation: Compensation,
}

impl StepFailure {
    fn new(stage: UploadStage, error: impl Into<CandidateError>, compensation: Compensation) -> Self {
        Self {
            stage,
            error: error.into(),
            compensation,
        }
    }
}

/// An opened CV ready to stream back to the client.
#[derive(Debug)]
pub struct CvDownload {
    pub file: File,
    pub file_name: String,
    pub content_type: &'static str,
    pub size_bytes: u64,
}

#[derive(Clone)]
pub struct CandidateService {
    store: Arc<dyn CandidateStore>,
    files: FileStorage,
}

impl CandidateService {
    pub fn new(store: Arc<dyn CandidateStore>, files: FileStorage) -> Self {
        Self { store, files }
    }

    pub fn store(&self) -> &Arc<dyn CandidateStore> {
        &self.store
    }

    pub fn files(&self) -> &FileStorage {
        &self.files
    }

    /// Run the failed step's compensation, then hand back its error.
    /// Cleanup problems are logged by the compensator and never replace the
    /// original error.
    async fn settle(&self, failure: StepFailure) -> CandidateError {
        debug!(stage = ?failure.stage, error = %failure.error, "step failed, compensating");
        if let Compensation::RemoveFile(path) = &failure.compensation {
            self.files.remove_if_exists(path).await;
        }
        failure.error
    }

    pub async fn list(&self, query: &ListQuery) -> CandidateResult<CandidatePage> {
        Ok(self.store.list(query).await?)
    }

    pub async fn get(&self, id: i64) -> CandidateResult<CandidateWithRelations> {
        self.store
            .find(id)
            .await?
            .ok_or(CandidateError::NotFound(id))
    }

    /// Create a candidate, attaching `cv` when present.
    ///
    /// If finalizing or attaching the CV fails the record stays, without a
    /// file, and `CvNotAttached` is returned. No file is left on disk for a
    /// failed create.
    pub async fn create(
        &self,
        input: NewCandidate,
        cv: Option<IncomingFile>,
    ) -> CandidateResult<CandidateWithRelations> {
        let stage = if cv.is_some() {
            UploadStage::TempReceived
        } else {
            UploadStage::NoFile
        };

        let draft = match validate_new_candidate(input) {
            Ok(draft) => draft,
            Err(errors) => {
                let failure = StepFailure::new(
                    stage,
                    CandidateError::Validation(errors),
                    Compensation::for_temp(cv.as_ref()),
                );
                return Err(self.settle(failure).await);
            }
        };

        let created = match self.store.insert(&draft).await {
            Ok(created) => created,
            Err(err) => {
                let failure = StepFailure::new(stage, err, Compensation::for_temp(cv.as_ref()));
                return Err(self.settle(failure).await);
            }
        };
        let candidate_id = created.id();

        let Some(file) = cv else {
            info!(candidate_id, "candidate created");
            return Ok(created);
        };
        debug!(candidate_id, stage = ?UploadStage::EntityCreated, "candidate row inserted");

        let finalized = match self.finalize(&file, candidate_id, UploadStage::EntityCreated).await {
            Ok(finalized) => finalized,
            Err(failure) => return Err(self.partial_entity(candidate_id, failure).await),
        };

        match self
            .attach(candidate_id, &CandidatePatch::default(), &finalized)
            .await
        {
            Ok(updated) => {
                info!(
                    candidate_id,
                    path = %finalized.final_path.display(),
                    size_bytes = file.size_bytes,
                    "candidate created with CV"
                );
                Ok(updated.candidate)
            }
            Err(failure) => Err(self.partial_entity(candidate_id, failure).await),
        }
    }

    /// Apply a partial update, replacing the CV when `cv` is present.
    ///
    /// The previous CV is removed only after the record points at the new
    /// one; if the update does not commit the previous file stays untouched.
    pub async fn update(
        &self,
        id: i64,
        input: CandidateUpdate,
        cv: Option<IncomingFile>,
    ) -> CandidateResult<CandidateWithRelations> {
        let stage = if cv.is_some() {
            UploadStage::TempReceived
        } else {
            UploadStage::NoFile
        };

        let patch = match validate_update(input) {
            Ok(patch) => patch,
            Err(errors) => {
                let failure = StepFailure::new(
                    stage,
                    CandidateError::Validation(errors),
                    Compensation::for_temp(cv.as_ref()),
                );
                return Err(self.settle(failure).await);
            }
        };

        match self.store.find(id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let failure = StepFailure::new(
                    stage,
                    CandidateError::NotFound(id),
                    Compensation::for_temp(cv.as_ref()),
                );
                return Err(self.settle(failure).await);
            }
            Err(err) => {
                let failure = StepFailure::new(stage, err, Compensation::for_temp(cv.as_ref()));
                return Err(self.settle(failure).await);
            }
        };

        let Some(file) = cv else {
            let updated = self.store.update(id, &patch, None).await?;
            info!(candidate_id = id, "candidate updated");
            return Ok(updated.candidate);
        };

        let finalized = match self.finalize(&file, id, UploadStage::TempReceived).await {
            Ok(finalized) => finalized,
            Err(failure) => return Err(self.settle(failure).await),
        };

        let updated = match self.attach(id, &patch, &finalized).await {
            Ok(updated) => updated,
            Err(failure) => return Err(self.settle(failure).await),
        };

        if let Some(previous) = updated.previous_cv_path.as_deref() {
            if Path::new(previous) != finalized.final_path {
                self.files.remove_if_exists(Path::new(previous)).await;
            }
        }
        info!(
            candidate_id = id,
            path = %finalized.final_path.display(),
            "candidate updated with new CV"
        );
        Ok(updated.candidate)
    }

    /// Delete the record first, then its CV.
    pub async fn delete(&self, id: i64) -> CandidateResult<()> {
        let removed = self
            .store
            .delete(id)
            .await?
            .ok_or(CandidateError::NotFound(id))?;
        if let Some(path) = removed.cv_file_path.as_deref() {
            self.files.remove_if_exists(Path::new(path)).await;
        }
        info!(candidate_id = id, "candidate deleted");
        Ok(())
    }

    pub async fn open_cv(&self, id: i64) -> CandidateResult<CvDownload> {
        let candidate = self.get(id).await?;
        let stored = candidate
            .cv_file_path()
            .ok_or(CandidateError::CvNotFound(id))?;

        let file = match self.files.open(stored).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(candidate_id = id, path = stored, "referenced CV missing on disk");
                return Err(CandidateError::CvNotFound(id));
            }
            Err(err) => return Err(UploadError::Io(err).into()),
        };
        let size_bytes = file
            .metadata()
            .await
            .map_err(UploadError::Io)?
            .len();
        let file_name = Path::new(stored)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("candidate-{id}-cv"));

        Ok(CvDownload {
            content_type: UploadSpec::content_type_for(&file_name),
            file,
            file_name,
            size_bytes,
        })
    }

    /// Remove CV files no record references and stale temp files.
    pub async fn reconcile(&self, min_age: Duration) -> CandidateResult<SweepReport> {
        let referenced: HashSet<PathBuf> = self
            .store
            .cv_paths()
            .await?
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let report = self
            .files
            .sweep(&referenced, min_age)
            .await
            .map_err(UploadError::Io)?;
        Ok(report)
    }

    /// `→ Finalized`. The rename leaves at most the temp file behind.
    async fn finalize(
        &self,
        file: &IncomingFile,
        owner_id: i64,
        stage: UploadStage,
    ) -> Result<FinalizedFile, StepFailure> {
        self.files.finalize(file, owner_id).await.map_err(|err| {
            StepFailure::new(stage, err, Compensation::RemoveFile(file.temp_path.clone()))
        })
    }

    /// `Finalized → EntityUpdated`. A failure here leaves the finalized file
    /// unreferenced, so it is the one to remove.
    async fn attach(
        &self,
        id: i64,
        patch: &CandidatePatch,
        finalized: &FinalizedFile,
    ) -> Result<UpdatedCandidate, StepFailure> {
        self.store
            .update(id, patch, Some(&finalized.path_string()))
            .await
            .map_err(|err| {
                StepFailure::new(
                    UploadStage::Finalized,
                    err,
                    Compensation::RemoveFile(finalized.final_path.clone()),
                )
            })
    }

    /// Settle a failure that happened after the record was inserted. The
    /// record is kept without a CV.
    async fn partial_entity(&self, candidate_id: i64, failure: StepFailure) -> CandidateError {
        let stage = failure.stage;
        let source = self.settle(failure).await;
        error!(
            candidate_id,
            stage = ?stage,
            error = %source,
            "candidate persisted without its CV"
        );
        CandidateError::CvNotAttached {
            candidate_id,
            source: Box::new(source),
        }
    }
}
