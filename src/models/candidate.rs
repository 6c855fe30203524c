//! Represents a candidate and the request shapes used to create or patch one.

use super::{
    education::{Education, NewEducation},
    work_experience::{NewWorkExperience, WorkExperience},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A candidate row as stored in SQLite.
///
/// `cv_file_path` is the only record of which CV file belongs to this
/// candidate; nothing else tracks the file-to-owner mapping.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub cv_file_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A candidate together with its nested collections, as returned by the API.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateWithRelations {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub education: Vec<Education>,
    pub work_experience: Vec<WorkExperience>,
}

impl CandidateWithRelations {
    pub fn id(&self) -> i64 {
        self.candidate.id
    }

    pub fn cv_file_path(&self) -> Option<&str> {
        self.candidate.cv_file_path.as_deref()
    }
}

/// Body of a create request, before validation. Missing fields deserialize
/// empty so they surface as validation errors rather than parse errors.
#[derive(Deserialize, Serialize, Clone, Debug, Default, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct NewCandidate {
    #[validate(length(min = 2, max = 50, message = "First name must be between 2 and 50 characters"))]
    pub first_name: String,

    #[validate(length(min = 2, max = 50, message = "Last name must be between 2 and 50 characters"))]
    pub last_name: String,

    #[validate(email(message = "Please provide a valid email address"))]
    pub email: String,

    pub phone: Option<String>,

    #[validate(length(max = 200, message = "Address must be less than 200 characters"))]
    pub address: Option<String>,

    #[validate(nested)]
    pub education: Vec<NewEducation>,

    #[validate(nested)]
    pub work_experience: Vec<NewWorkExperience>,
}

/// Body of an update request. Absent fields are left unchanged.
///
/// `phone` and `address` may be set to an empty string to clear them.
#[derive(Deserialize, Serialize, Clone, Debug, Default, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CandidateUpdate {
    #[serde(default)]
    #[validate(length(min = 2, max = 50, message = "First name must be between 2 and 50 characters"))]
    pub first_name: Option<String>,

    #[serde(default)]
    #[validate(length(min = 2, max = 50, message = "Last name must be between 2 and 50 characters"))]
    pub last_name: Option<String>,

    #[serde(default)]
    #[validate(email(message = "Please provide a valid email address"))]
    pub email: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    #[validate(length(max = 200, message = "Address must be less than 200 characters"))]
    pub address: Option<String>,
}

/// A validated work-experience entry with parsed dates.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkDraft {
    pub company: String,
    pub position: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

/// A validated, normalized candidate ready to be inserted.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateDraft {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub education: Vec<NewEducation>,
    pub work_experience: Vec<WorkDraft>,
}

/// A validated partial update. `Some(None)` clears an optional column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidatePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<Option<String>>,
    pub address: Option<Option<String>>,
}
