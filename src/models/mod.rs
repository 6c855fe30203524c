//! Core data models for the applicant tracking service.
//!
//! Row types map to SQLite tables via `sqlx::FromRow` and serialize as
//! camelCase JSON via `serde`. Request types carry `validator` rules.

pub mod candidate;
pub mod education;
pub mod response;
pub mod work_experience;
