//! Normalization and validation of candidate input.
//!
//! Declarative rules live on the request types (`validator` derive); the
//! rules that depend on other fields or on the current date are checked here.

use crate::models::{
    candidate::{CandidateDraft, CandidatePatch, CandidateUpdate, NewCandidate, WorkDraft},
    education::NewEducation,
    work_experience::NewWorkExperience,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

const MIN_GRADUATION_YEAR: i64 = 1950;

/// One failed rule, addressed by its camelCase JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_new_candidate(input: NewCandidate) -> Result<CandidateDraft, Vec<FieldError>> {
    let input = NewCandidate {
        first_name: input.first_name.trim().to_string(),
        last_name: input.last_name.trim().to_string(),
        email: normalize_email(&input.email),
        phone: non_empty(input.phone),
        address: non_empty(input.address),
        education: input.education.into_iter().map(NewEducation::trimmed).collect(),
        work_experience: input
            .work_experience
            .into_iter()
            .map(NewWorkExperience::trimmed)
            .collect(),
    };

    let mut errors = declared_errors(input.validate());
    check_name("firstName", "First name", &input.first_name, &mut errors);
    check_name("lastName", "Last name", &input.last_name, &mut errors);
    if let Some(phone) = &input.phone {
        check_phone(phone, &mut errors);
    }
    for (idx, edu) in input.education.iter().enumerate() {
        if let Some(year) = edu.graduation_year {
            check_graduation_year(idx, year, &mut errors);
        }
    }
    let work_experience: Vec<WorkDraft> = input
        .work_experience
        .iter()
        .enumerate()
        .filter_map(|(idx, work)| work_dates(idx, work, &mut errors))
        .collect();

    if !errors.is_empty() {
        errors.sort_by(|a, b| a.field.cmp(&b.field));
        return Err(errors);
    }

    Ok(CandidateDraft {
        first_name: input.first_name,
        last_name: input.last_name,
        email: input.email,
        phone: input.phone,
        address: input.address,
        education: input.education,
        work_experience,
    })
}

/// Validate a partial update. Empty names and emails count as "not
/// provided"; an empty phone or address clears the column.
pub fn validate_update(input: CandidateUpdate) -> Result<CandidatePatch, Vec<FieldError>> {
    let input = CandidateUpdate {
        first_name: non_empty(input.first_name),
        last_name: non_empty(input.last_name),
        email: non_empty(input.email).map(|e| normalize_email(&e)),
        phone: input.phone.map(|p| p.trim().to_string()),
        address: input.address.map(|a| a.trim().to_string()),
    };

    let mut errors = declared_errors(input.validate());
    if let Some(first) = &input.first_name {
        check_name("firstName", "First name", first, &mut errors);
    }
    if let Some(last) = &input.last_name {
        check_name("lastName", "Last name", last, &mut errors);
    }
    if let Some(phone) = input.phone.as_deref().filter(|p| !p.is_empty()) {
        check_phone(phone, &mut errors);
    }

    if !errors.is_empty() {
        errors.sort_by(|a, b| a.field.cmp(&b.field));
        return Err(errors);
    }

    Ok(CandidatePatch {
        first_name: input.first_name,
        last_name: input.last_name,
        email: input.email,
        phone: input.phone.map(|p| Some(p).filter(|p| !p.is_empty())),
        address: input.address.map(|a| Some(a).filter(|a| !a.is_empty())),
    })
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_name(field: &str, label: &str, value: &str, errors: &mut Vec<FieldError>) {
    if value.is_empty() {
        return;
    }
    let valid = value
        .chars()
        .all(|c| c.is_alphabetic() || c.is_whitespace() || c == '\'' || c == '-');
    if !valid {
        errors.push(FieldError::new(
            field,
            format!("{label} contains invalid characters"),
        ));
    }
}

fn check_phone(phone: &str, errors: &mut Vec<FieldError>) {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    let length = digits.chars().count();
    let valid = (10..=20).contains(&length)
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '(' | ')' | '.' | '-'));
    if !valid {
        errors.push(FieldError::new("phone", "Please provide a valid phone number"));
    }
}

fn check_graduation_year(idx: usize, year: i64, errors: &mut Vec<FieldError>) {
    let max_year = i64::from(Utc::now().year()) + 10;
    if !(MIN_GRADUATION_YEAR..=max_year).contains(&year) {
        errors.push(FieldError::new(
            format!("education[{idx}].graduationYear"),
            "Please provide a valid graduation year",
        ));
    }
}

fn work_dates(
    idx: usize,
    work: &NewWorkExperience,
    errors: &mut Vec<FieldError>,
) -> Option<WorkDraft> {
    let start = parse_date(&work.start_date);
    if start.is_none() {
        let message = if work.start_date.trim().is_empty() {
            "Start date is required"
        } else {
            "Please provide a valid start date (YYYY-MM-DD)"
        };
        errors.push(FieldError::new(
            format!("workExperience[{idx}].startDate"),
            message,
        ));
    }

    let end = match work.end_date.as_deref() {
        None => None,
        Some(raw) => match parse_date(raw) {
            Some(end) => Some(end),
            None => {
                errors.push(FieldError::new(
                    format!("workExperience[{idx}].endDate"),
                    "Please provide a valid end date (YYYY-MM-DD)",
                ));
                return None;
            }
        },
    };

    let start = start?;
    if let Some(end) = end {
        if end <= start {
            errors.push(FieldError::new(
                format!("workExperience[{idx}].endDate"),
                "End date must be after start date",
            ));
            return None;
        }
    }

    Some(WorkDraft {
        company: work.company.clone(),
        position: work.position.clone(),
        start_date: start,
        end_date: end,
        description: work.description.clone(),
    })
}

fn declared_errors(result: Result<(), ValidationErrors>) -> Vec<FieldError> {
    let mut out = Vec::new();
    if let Err(errors) = result {
        flatten("", &errors, &mut out);
    }
    out
}

fn flatten(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let name = camel_case(&field.to_string());
        let path = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}.{name}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{path} is invalid"));
                    out.push(FieldError::new(path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    flatten(&format!("{path}[{idx}]"), inner, out);
                }
            }
        }
    }
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper_next = false;
    for c in snake.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
