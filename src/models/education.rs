//! A candidate's education entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use sqlx::FromRow;
use validator::Validate;

/// One education row, owned by a candidate.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Education {
    pub id: i64,
    pub candidate_id: i64,
    pub degree: String,
    pub institution: String,
    pub graduation_year: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Education entry as submitted with a new candidate.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewEducation {
    #[validate(length(min = 2, max = 100, message = "Degree must be between 2 and 100 characters"))]
    pub degree: String,

    #[validate(length(
        min = 2,
        max = 100,
        message = "Institution must be between 2 and 100 characters"
    ))]
    pub institution: String,

    #[serde(default, deserialize_with = "year_or_blank")]
    pub graduation_year: Option<i64>,
}

/// Form clients send the year as a string, JSON clients as a number.
fn year_or_blank<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Year {
        Number(i64),
        Text(String),
    }

    match Option::<Year>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Year::Number(year)) => Ok(Some(year)),
        Some(Year::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Year::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom("Graduation year must be a valid year")),
    }
}

impl NewEducation {
    pub fn trimmed(mut self) -> Self {
        self.degree = self.degree.trim().to_string();
        self.institution = self.institution.trim().to_string();
        self
    }
}
