//! Accept/reject rules for incoming CV files.
//!
//! Type checks run on the part headers before anything touches disk; the
//! size check runs per chunk while the body streams in.

use thiserror::Error;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Why an upload was refused. Each variant renders as one human-readable
/// sentence that is returned to the client unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadRejection {
    #[error("Invalid file type. Only {allowed} files are allowed.")]
    InvalidType { allowed: String },
    #[error("File too large. Maximum size is {}.", format_size(*.max_bytes))]
    TooLarge { max_bytes: u64 },
    #[error("Unexpected file field.")]
    UnexpectedField,
    #[error("Only one CV file may be uploaded per request.")]
    TooManyFiles,
}

/// Upload policy: which files are accepted and how large they may be.
///
/// Every extension is expected to have a matching MIME type and vice versa;
/// `cv_default` keeps the two lists paired.
#[derive(Debug, Clone)]
pub struct UploadSpec {
    pub allowed_mime_types: Vec<String>,
    pub allowed_extensions: Vec<String>,
    pub max_bytes: u64,
}

impl UploadSpec {
    /// PDF and DOCX, capped at `max_bytes`.
    pub fn cv_default(max_bytes: u64) -> Self {
        Self {
            allowed_mime_types: vec![PDF_MIME.into(), DOCX_MIME.into()],
            allowed_extensions: vec![".pdf".into(), ".docx".into()],
            max_bytes,
        }
    }

    /// Check MIME type and file-name extension. Both must pass.
    pub fn check(&self, mime_type: &str, file_name: &str) -> Result<(), UploadRejection> {
        let mime_ok = self
            .allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type.trim()));
        let extension_ok = extension_of(file_name)
            .map(|ext| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.allowed_extensions.iter().any(|a| *a == ext));

        if mime_ok && extension_ok {
            Ok(())
        } else {
            Err(UploadRejection::InvalidType {
                allowed: self.allowed_extensions.join(", "),
            })
        }
    }

    pub fn limiter(&self) -> SizeLimiter {
        SizeLimiter {
            max_bytes: self.max_bytes,
            received: 0,
        }
    }

    /// Content type to serve a stored file with, by extension.
    pub fn content_type_for(file_name: &str) -> &'static str {
        match extension_of(file_name).map(|e| e.to_ascii_lowercase()).as_deref() {
            Some(".pdf") => PDF_MIME,
            Some(".docx") => DOCX_MIME,
            _ => "application/octet-stream",
        }
    }
}

/// Running byte count for one upload.
#[derive(Debug)]
pub struct SizeLimiter {
    max_bytes: u64,
    received: u64,
}

impl SizeLimiter {
    /// Account for another chunk; fails as soon as the total exceeds the cap.
    pub fn record(&mut self, chunk_len: usize) -> Result<u64, UploadRejection> {
        self.received = self.received.saturating_add(chunk_len as u64);
        if self.received > self.max_bytes {
            Err(UploadRejection::TooLarge {
                max_bytes: self.max_bytes,
            })
        } else {
            Ok(self.received)
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

/// The suffix starting at the last `.`, if any.
pub fn extension_of(file_name: &str) -> Option<&str> {
    file_name.rfind('.').map(|idx| &file_name[idx..])
}

fn format_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{}KB", bytes / KIB)
    } else {
        format!("{} bytes", bytes)
    }
}
