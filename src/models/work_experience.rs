//! A candidate's work-experience entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// One work-experience row, owned by a candidate.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkExperience {
    pub id: i64,
    pub candidate_id: i64,
    pub company: String,
    pub position: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Work-experience entry as submitted with a new candidate.
///
/// Dates arrive as strings (`YYYY-MM-DD` or RFC 3339) and are parsed during
/// validation; an empty `endDate` means the position is current.
#[derive(Deserialize, Serialize, Clone, Debug, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkExperience {
    #[validate(length(
        min = 2,
        max = 100,
        message = "Company name must be between 2 and 100 characters"
    ))]
    pub company: String,

    #[validate(length(min = 2, max = 100, message = "Position must be between 2 and 100 characters"))]
    pub position: String,

    #[serde(default)]
    pub start_date: String,

    #[serde(default)]
    pub end_date: Option<String>,

    #[serde(default)]
    #[validate(length(max = 1000, message = "Description must be less than 1000 characters"))]
    pub description: Option<String>,
}

impl NewWorkExperience {
    pub fn trimmed(mut self) -> Self {
        self.company = self.company.trim().to_string();
        self.position = self.position.trim().to_string();
        self.description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.end_date = self.end_date.filter(|d| !d.trim().is_empty());
        self
    }
}
