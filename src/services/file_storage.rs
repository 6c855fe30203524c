//! On-disk CV storage: temp receiver, finalizer, compensator and the
//! orphan sweep.
//!
//! Layout beneath the configured upload directory:
//! - `cvs/`  finalized files named `<owner>_<millis>_<name><ext>`
//! - `temp/` in-flight uploads named `temp_<millis>_<name>`

use super::upload_policy::{SizeLimiter, UploadRejection, UploadSpec, extension_of};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    collections::HashSet,
    error::Error as StdError,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Temp names tried before giving up; only the first is untagged.
const TEMP_NAME_ATTEMPTS: usize = 4;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Rejected(#[from] UploadRejection),
    #[error("upload stream interrupted: {0}")]
    Interrupted(#[source] Box<dyn StdError + Send + Sync>),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Directories derived from the configured upload root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub base_dir: PathBuf,
    pub cv_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl StoragePaths {
    /// Resolve `base` to an absolute path and derive the CV and temp roots.
    pub fn new(base: impl AsRef<Path>) -> io::Result<Self> {
        let base_dir = std::path::absolute(base.as_ref())?;
        Ok(Self {
            cv_dir: base_dir.join("cvs"),
            temp_dir: base_dir.join("temp"),
            base_dir,
        })
    }

    pub async fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [&self.base_dir, &self.cv_dir, &self.temp_dir] {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// A file that finished streaming into the temp directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub temp_path: PathBuf,
}

/// A file renamed into its permanent, owner-prefixed location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedFile {
    pub owner_id: i64,
    pub final_path: PathBuf,
}

impl FinalizedFile {
    /// The form stored in the candidate row.
    pub fn path_string(&self) -> String {
        self.final_path.to_string_lossy().into_owned()
    }
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_cvs: Vec<PathBuf>,
    pub removed_temp: Vec<PathBuf>,
    pub skipped_recent: usize,
}

#[derive(Clone, Debug)]
pub struct FileStorage {
    paths: StoragePaths,
    spec: Arc<UploadSpec>,
}

impl FileStorage {
    pub fn new(paths: StoragePaths, spec: UploadSpec) -> Self {
        Self {
            paths,
            spec: Arc::new(spec),
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn spec(&self) -> &UploadSpec {
        &self.spec
    }

    /// Filter, then stream an upload into the temp directory.
    ///
    /// The file type is checked before the temp file is created. The size
    /// cap is enforced per chunk; on any failure the partial file is removed
    /// and nothing is left behind.
    pub async fn receive<S, E>(
        &self,
        original_name: &str,
        mime_type: &str,
        stream: S,
    ) -> UploadResult<IncomingFile>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.spec.check(mime_type, original_name)?;
        self.paths.ensure_dirs().await?;

        let (temp_path, mut file) = self.create_temp(original_name).await?;
        let mut limiter = self.spec.limiter();

        pin_mut!(stream);
        let written = write_limited(&mut file, stream, &mut limiter).await;
        let written = match written {
            Ok(()) => file.flush().await.map_err(UploadError::from),
            Err(err) => Err(err),
        };
        drop(file);

        if let Err(err) = written {
            debug!(path = %temp_path.display(), error = %err, "discarding partial upload");
            self.remove_if_exists(&temp_path).await;
            return Err(err);
        }

        debug!(
            path = %temp_path.display(),
            size_bytes = limiter.received(),
            "upload received"
        );
        Ok(IncomingFile {
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes: limiter.received(),
            temp_path,
        })
    }

    /// Create a fresh temp file. An existing file is never reused: a name
    /// taken by a concurrent upload gets a random tag after the timestamp.
    async fn create_temp(&self, original_name: &str) -> io::Result<(PathBuf, File)> {
        let mut name = temp_file_name(original_name);
        for _ in 0..TEMP_NAME_ATTEMPTS {
            let path = self.paths.temp_dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "temp name taken, retrying with a tag");
                    name = tagged_temp_file_name(original_name);
                }
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            "could not find a free temp file name",
        ))
    }

    /// Rename a received file to its permanent, owner-prefixed name.
    ///
    /// Must be called exactly once per temp file: a second call fails with
    /// `NotFound` because the source is gone. On rename failure the temp file
    /// is removed (best effort) and the rename error is returned.
    pub async fn finalize(&self, file: &IncomingFile, owner_id: i64) -> UploadResult<FinalizedFile> {
        let final_path = self
            .paths
            .cv_dir
            .join(final_file_name(owner_id, &file.original_name));

        if let Err(err) = fs::rename(&file.temp_path, &final_path).await {
            warn!(
                candidate_id = owner_id,
                from = %file.temp_path.display(),
                to = %final_path.display(),
                error = %err,
                "failed to move upload into place"
            );
            self.remove_if_exists(&file.temp_path).await;
            return Err(UploadError::Io(err));
        }

        debug!(candidate_id = owner_id, path = %final_path.display(), "upload finalized");
        Ok(FinalizedFile {
            owner_id,
            final_path,
        })
    }

    /// Delete `path` if it exists. Never fails: errors are logged only, since
    /// this always runs next to a primary error that must reach the caller.
    pub async fn remove_if_exists(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove file"),
        }
    }

    /// Open a stored CV for reading. Paths outside the CV directory are
    /// reported as missing.
    pub async fn open(&self, stored_path: &str) -> io::Result<File> {
        let path = Path::new(stored_path);
        if !path.starts_with(&self.paths.cv_dir) {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                "file is outside the CV directory",
            ));
        }
        File::open(path).await
    }

    /// Remove CV files no candidate references and leftover temp files.
    ///
    /// Files younger than `min_age` are skipped so uploads still moving
    /// through the create flow are not swept away underneath it.
    pub async fn sweep(
        &self,
        referenced: &HashSet<PathBuf>,
        min_age: Duration,
    ) -> io::Result<SweepReport> {
        self.paths.ensure_dirs().await?;
        let mut report = SweepReport::default();

        for (dir, is_temp) in [(&self.paths.cv_dir, false), (&self.paths.temp_dir, true)] {
            let mut entries = fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if !meta.is_file() {
                    continue;
                }
                let path = entry.path();
                if !is_temp && referenced.contains(&path) {
                    continue;
                }
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| SystemTime::now().duration_since(m).ok())
                    .unwrap_or_default();
                if age < min_age {
                    report.skipped_recent += 1;
                    continue;
                }

                self.remove_if_exists(&path).await;
                if is_temp {
                    report.removed_temp.push(path);
                } else {
                    report.removed_cvs.push(path);
                }
            }
        }

        info!(
            removed_cvs = report.removed_cvs.len(),
            removed_temp = report.removed_temp.len(),
            skipped_recent = report.skipped_recent,
            "storage sweep finished"
        );
        Ok(report)
    }
}

async fn write_limited<S, E>(
    file: &mut File,
    mut stream: std::pin::Pin<&mut S>,
    limiter: &mut SizeLimiter,
) -> UploadResult<()>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| UploadError::Interrupted(err.into()))?;
        limiter.record(chunk.len())?;
        file.write_all(&chunk).await?;
    }
    Ok(())
}

/// `temp_<millis>_<name>` with every character outside `[A-Za-z0-9.]`
/// replaced by `_`.
pub fn temp_file_name(original_name: &str) -> String {
    format!(
        "temp_{}_{}",
        Utc::now().timestamp_millis(),
        clean_temp_name(original_name)
    )
}

/// `temp_<millis>_<tag>_<name>`, used when the plain name is already taken.
fn tagged_temp_file_name(original_name: &str) -> String {
    let tag = Uuid::new_v4().simple().to_string();
    format!(
        "temp_{}_{}_{}",
        Utc::now().timestamp_millis(),
        &tag[..8],
        clean_temp_name(original_name)
    )
}

fn clean_temp_name(original_name: &str) -> String {
    original_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}

/// `<owner>_<millis>_<sanitized base><extension>`.
pub fn final_file_name(owner_id: i64, original_name: &str) -> String {
    let (base, extension) = match extension_of(original_name) {
        Some(ext) => (&original_name[..original_name.len() - ext.len()], ext),
        None => (original_name, ""),
    };
    format!(
        "{}_{}_{}{}",
        owner_id,
        Utc::now().timestamp_millis(),
        sanitize_base_name(base),
        extension
    )
}

/// Lower-case and replace each run of characters outside `[A-Za-z0-9]`
/// with a single `_`.
pub fn sanitize_base_name(base: &str) -> String {
    let mut out = String::with_capacity(base.len());
    let mut last_was_replacement = false;
    for c in base.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_replacement = false;
        } else if !last_was_replacement {
            out.push('_');
            last_was_replacement = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::upload_policy::PDF_MIME;
    use futures::stream;
    use std::convert::Infallible;
    use tempfile::TempDir;

    fn storage(max_bytes: u64) -> (TempDir, FileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let paths = StoragePaths::new(dir.path()).unwrap();
        (dir, FileStorage::new(paths, UploadSpec::cv_default(max_bytes)))
    }

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, Infallible>> {
        stream::iter(
            parts
                .iter()
                .copied()
                .map(|p| Ok::<_, Infallible>(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn file_count(dir: &Path) -> usize {
        let mut count = 0;
        if let Ok(mut entries) = fs::read_dir(dir).await {
            while let Some(entry) = entries.next_entry().await.unwrap() {
                if entry.metadata().await.unwrap().is_file() {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn final_name_embeds_owner_and_sanitized_base() {
        let name = final_file_name(42, "résumé final.pdf");
        let (owner, rest) = name.split_once('_').unwrap();
        let (millis, tail) = rest.split_once('_').unwrap();
        assert_eq!(owner, "42");
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(tail, "r_sum_final.pdf");
    }

    #[test]
    fn final_name_keeps_extension_case() {
        let name = final_file_name(7, "My.CV.DOCX");
        assert!(name.ends_with("_my_cv.DOCX"), "{name}");
    }

    #[test]
    fn temp_name_replaces_each_character() {
        let name = temp_file_name("my cv (1).pdf");
        assert!(name.starts_with("temp_"));
        assert!(name.ends_with("_my_cv__1_.pdf"), "{name}");
    }

    #[tokio::test]
    async fn receive_writes_temp_file() {
        let (_dir, storage) = storage(1024);
        let file = storage
            .receive("cv.pdf", PDF_MIME, chunks(&[b"%PDF-", b"1.7"]))
            .await
            .unwrap();

        assert_eq!(file.size_bytes, 8);
        assert!(file.temp_path.starts_with(&storage.paths().temp_dir));
        assert_eq!(fs::read(&file.temp_path).await.unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn tagged_temp_name_keeps_prefix_and_name() {
        let name = tagged_temp_file_name("cv.pdf");
        let parts: Vec<&str> = name.splitn(4, '_').collect();
        assert_eq!(parts[0], "temp");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[3], "cv.pdf");
    }

    #[tokio::test]
    async fn concurrent_uploads_with_same_name_get_their_own_temp_files() {
        let (_dir, storage) = storage(1024);
        let slow = |byte: u8| {
            stream::iter(0..4).then(move |_| async move {
                tokio::task::yield_now().await;
                Ok::<_, Infallible>(Bytes::from(vec![byte; 4]))
            })
        };

        let (a, b) = tokio::join!(
            storage.receive("cv.pdf", PDF_MIME, slow(b'A')),
            storage.receive("cv.pdf", PDF_MIME, slow(b'B')),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.temp_path, b.temp_path);
        assert_eq!(fs::read(&a.temp_path).await.unwrap(), vec![b'A'; 16]);
        assert_eq!(fs::read(&b.temp_path).await.unwrap(), vec![b'B'; 16]);

        let final_a = storage.finalize(&a, 1).await.unwrap();
        let final_b = storage.finalize(&b, 2).await.unwrap();
        assert_eq!(fs::read(&final_a.final_path).await.unwrap(), vec![b'A'; 16]);
        assert_eq!(fs::read(&final_b.final_path).await.unwrap(), vec![b'B'; 16]);
    }

    #[tokio::test]
    async fn rejected_type_creates_nothing() {
        let (_dir, storage) = storage(1024);
        let err = storage
            .receive("setup.pdf", "application/x-msdownload", chunks(&[b"MZ"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Rejected(UploadRejection::InvalidType { .. })
        ));
        assert_eq!(file_count(&storage.paths().temp_dir).await, 0);
        assert_eq!(file_count(&storage.paths().cv_dir).await, 0);
    }

    #[tokio::test]
    async fn oversize_stream_is_discarded_midway() {
        let (_dir, storage) = storage(4);
        let err = storage
            .receive("cv.pdf", PDF_MIME, chunks(&[b"abc", b"def", b"ghi"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Rejected(UploadRejection::TooLarge { max_bytes: 4 })
        ));
        assert_eq!(file_count(&storage.paths().temp_dir).await, 0);
    }

    #[tokio::test]
    async fn interrupted_stream_is_discarded() {
        let (_dir, storage) = storage(1024);
        let parts = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ]);
        let err = storage.receive("cv.pdf", PDF_MIME, parts).await.unwrap_err();

        assert!(matches!(err, UploadError::Interrupted(_)));
        assert_eq!(file_count(&storage.paths().temp_dir).await, 0);
    }

    #[tokio::test]
    async fn finalize_moves_file_and_is_not_repeatable() {
        let (_dir, storage) = storage(1024);
        let incoming = storage
            .receive("CV Final.pdf", PDF_MIME, chunks(&[b"pdf"]))
            .await
            .unwrap();

        let finalized = storage.finalize(&incoming, 9).await.unwrap();
        assert!(finalized.final_path.starts_with(&storage.paths().cv_dir));
        assert!(!incoming.temp_path.exists());
        assert_eq!(fs::read(&finalized.final_path).await.unwrap(), b"pdf");

        let err = storage.finalize(&incoming, 9).await.unwrap_err();
        match err {
            UploadError::Io(io_err) => assert_eq!(io_err.kind(), ErrorKind::NotFound),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(file_count(&storage.paths().cv_dir).await, 1);
    }

    #[tokio::test]
    async fn remove_if_exists_ignores_missing_files() {
        let (_dir, storage) = storage(1024);
        let path = storage.paths().cv_dir.join("never-written.pdf");
        storage.remove_if_exists(&path).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn open_refuses_paths_outside_cv_dir() {
        let (dir, storage) = storage(1024);
        let outside = dir.path().join("secret.txt");
        fs::write(&outside, b"x").await.unwrap();

        let err = storage.open(&outside.to_string_lossy()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn sweep_removes_unreferenced_files_only() {
        let (_dir, storage) = storage(1024);
        storage.paths().ensure_dirs().await.unwrap();
        let kept = storage.paths().cv_dir.join("1_1_kept.pdf");
        let orphan = storage.paths().cv_dir.join("2_1_orphan.pdf");
        let stale = storage.paths().temp_dir.join("temp_1_stale.pdf");
        for path in [&kept, &orphan, &stale] {
            fs::write(path, b"x").await.unwrap();
        }

        let referenced = HashSet::from([kept.clone()]);
        let report = storage.sweep(&referenced, Duration::ZERO).await.unwrap();

        assert_eq!(report.removed_cvs, vec![orphan.clone()]);
        assert_eq!(report.removed_temp, vec![stale.clone()]);
        assert!(kept.exists());
        assert!(!orphan.exists());
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn sweep_skips_recent_files() {
        let (_dir, storage) = storage(1024);
        storage.paths().ensure_dirs().await.unwrap();
        let fresh = storage.paths().cv_dir.join("3_1_fresh.pdf");
        fs::write(&fresh, b"x").await.unwrap();

        let report = storage
            .sweep(&HashSet::new(), Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(report.removed_cvs.is_empty());
        assert_eq!(report.skipped_recent, 1);
        assert!(fresh.exists());
    }
}
