//! Persistence for candidates and their nested collections.
//!
//! The orchestrator only sees the `CandidateStore` trait; the SQLite
//! implementation is built once at startup around the shared pool.

use crate::models::{
    candidate::{Candidate, CandidateDraft, CandidatePatch, CandidateWithRelations},
    education::Education,
    work_experience::WorkExperience,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

const CANDIDATE_COLUMNS: &str = "c.id, c.first_name, c.last_name, c.email, c.phone, c.address, \
     c.cv_file_path, c.created_at, c.updated_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a candidate with email `{0}` already exists")]
    DuplicateEmail(String),
    #[error("candidate {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Page request for listing and searching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
}

impl ListQuery {
    fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }

    fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// A committed update and the CV path it replaced.
#[derive(Debug, Clone)]
pub struct UpdatedCandidate {
    pub candidate: CandidateWithRelations,
    pub previous_cv_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CandidatePage {
    pub candidates: Vec<CandidateWithRelations>,
    pub total: u64,
}

#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> StoreResult<()>;

    /// Insert a candidate with its education and work entries, without a CV.
    async fn insert(&self, draft: &CandidateDraft) -> StoreResult<CandidateWithRelations>;

    async fn find(&self, id: i64) -> StoreResult<Option<CandidateWithRelations>>;

    /// Apply `patch` and, when given, point the record at a new CV file.
    /// The returned previous path is the one this update overwrote, so two
    /// racing CV updates each see a different predecessor.
    /// Fails with `NotFound` if the row is gone.
    async fn update(
        &self,
        id: i64,
        patch: &CandidatePatch,
        cv_file_path: Option<&str>,
    ) -> StoreResult<UpdatedCandidate>;

    /// Delete a candidate and its nested rows, returning the removed row.
    async fn delete(&self, id: i64) -> StoreResult<Option<Candidate>>;

    /// Newest first; ties broken by ascending id.
    async fn list(&self, query: &ListQuery) -> StoreResult<CandidatePage>;

    /// Every CV path currently referenced by a record.
    async fn cv_paths(&self) -> StoreResult<Vec<String>>;
}

/// `CandidateStore` over the process-wide SQLite pool.
#[derive(Clone)]
pub struct SqliteCandidateStore {
    pub db: Arc<SqlitePool>,
}

impl SqliteCandidateStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Attach education and work rows to each candidate, keeping order.
    async fn with_relations(
        &self,
        candidates: Vec<Candidate>,
    ) -> StoreResult<Vec<CandidateWithRelations>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, candidate_id, degree, institution, graduation_year, created_at, updated_at \
             FROM education WHERE candidate_id IN (",
        );
        push_id_list(&mut builder, &ids);
        builder.push(") ORDER BY id ASC");
        let education: Vec<Education> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, candidate_id, company, position, start_date, end_date, description, \
             created_at, updated_at FROM work_experience WHERE candidate_id IN (",
        );
        push_id_list(&mut builder, &ids);
        builder.push(") ORDER BY start_date DESC, id ASC");
        let work: Vec<WorkExperience> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut education_by_owner: HashMap<i64, Vec<Education>> = HashMap::new();
        for row in education {
            education_by_owner.entry(row.candidate_id).or_default().push(row);
        }
        let mut work_by_owner: HashMap<i64, Vec<WorkExperience>> = HashMap::new();
        for row in work {
            work_by_owner.entry(row.candidate_id).or_default().push(row);
        }

        Ok(candidates
            .into_iter()
            .map(|candidate| CandidateWithRelations {
                education: education_by_owner.remove(&candidate.id).unwrap_or_default(),
                work_experience: work_by_owner.remove(&candidate.id).unwrap_or_default(),
                candidate,
            })
            .collect())
    }
}

#[async_trait]
impl CandidateStore for SqliteCandidateStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    async fn insert(&self, draft: &CandidateDraft) -> StoreResult<CandidateWithRelations> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO candidates (first_name, last_name, email, phone, address, \
             cv_file_path, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, NULL, ?, ?) RETURNING id",
        )
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.email)
        .bind(&draft.phone)
        .bind(&draft.address)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let id = match inserted {
            Ok(id) => id,
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::DuplicateEmail(draft.email.clone()));
            }
            Err(err) => return Err(StoreError::Sqlx(err)),
        };

        for edu in &draft.education {
            sqlx::query(
                "INSERT INTO education (candidate_id, degree, institution, graduation_year, \
                 created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&edu.degree)
            .bind(&edu.institution)
            .bind(edu.graduation_year)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for work in &draft.work_experience {
            sqlx::query(
                "INSERT INTO work_experience (candidate_id, company, position, start_date, \
                 end_date, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&work.company)
            .bind(&work.position)
            .bind(work.start_date)
            .bind(work.end_date)
            .bind(&work.description)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.find(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn find(&self, id: i64) -> StoreResult<Option<CandidateWithRelations>> {
        let row = sqlx::query_as::<_, Candidate>(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates c WHERE c.id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        match row {
            Some(candidate) => Ok(self.with_relations(vec![candidate]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        id: i64,
        patch: &CandidatePatch,
        cv_file_path: Option<&str>,
    ) -> StoreResult<UpdatedCandidate> {
        let mut tx = self.db.begin().await?;

        // No-op write first: takes the write lock before the old path is read.
        let previous_cv_path = sqlx::query_scalar::<_, Option<String>>(
            "UPDATE candidates SET updated_at = updated_at WHERE id = ? RETURNING cv_file_path",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE candidates SET updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(first_name) = &patch.first_name {
            builder.push(", first_name = ").push_bind(first_name.clone());
        }
        if let Some(last_name) = &patch.last_name {
            builder.push(", last_name = ").push_bind(last_name.clone());
        }
        if let Some(email) = &patch.email {
            builder.push(", email = ").push_bind(email.clone());
        }
        if let Some(phone) = &patch.phone {
            builder.push(", phone = ").push_bind(phone.clone());
        }
        if let Some(address) = &patch.address {
            builder.push(", address = ").push_bind(address.clone());
        }
        if let Some(path) = cv_file_path {
            builder.push(", cv_file_path = ").push_bind(path.to_string());
        }
        builder.push(" WHERE id = ").push_bind(id);

        match builder.build().execute(&mut *tx).await {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                let email = patch.email.clone().unwrap_or_default();
                return Err(StoreError::DuplicateEmail(email));
            }
            Err(err) => return Err(StoreError::Sqlx(err)),
        }
        tx.commit().await?;

        let candidate = self.find(id).await?.ok_or(StoreError::NotFound(id))?;
        Ok(UpdatedCandidate {
            candidate,
            previous_cv_path,
        })
    }

    async fn delete(&self, id: i64) -> StoreResult<Option<Candidate>> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM education WHERE candidate_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM work_experience WHERE candidate_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query_as::<_, Candidate>(
            "DELETE FROM candidates WHERE id = ? RETURNING id, first_name, last_name, email, \
             phone, address, cv_file_path, created_at, updated_at",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn list(&self, query: &ListQuery) -> StoreResult<CandidatePage> {
        let pattern = query.search_term().map(like_pattern);

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM candidates c");
        push_search_filter(&mut count, pattern.as_deref());
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&*self.db).await?;

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {CANDIDATE_COLUMNS} FROM candidates c"));
        push_search_filter(&mut select, pattern.as_deref());
        select.push(" ORDER BY c.created_at DESC, c.id ASC LIMIT ");
        select.push_bind(i64::from(query.limit));
        select.push(" OFFSET ");
        select.push_bind(query.offset());
        let rows: Vec<Candidate> = select.build_query_as().fetch_all(&*self.db).await?;

        Ok(CandidatePage {
            candidates: self.with_relations(rows).await?,
            total: total.max(0) as u64,
        })
    }

    async fn cv_paths(&self) -> StoreResult<Vec<String>> {
        let paths = sqlx::query_scalar::<_, String>(
            "SELECT cv_file_path FROM candidates WHERE cv_file_path IS NOT NULL",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(paths)
    }
}

fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
}

/// Case-insensitive substring match over name, email, education and work
/// fields, OR-ed together.
fn push_search_filter(builder: &mut QueryBuilder<'_, Sqlite>, pattern: Option<&str>) {
    let Some(pattern) = pattern else {
        return;
    };
    let pattern = pattern.to_string();

    builder.push(" WHERE (");
    for (idx, column) in ["c.first_name", "c.last_name", "c.email"].iter().enumerate() {
        if idx > 0 {
            builder.push(" OR ");
        }
        builder.push(format!("LOWER({column}) LIKE "));
        builder.push_bind(pattern.clone());
        builder.push(" ESCAPE '\\'");
    }
    builder.push(
        " OR EXISTS (SELECT 1 FROM education e WHERE e.candidate_id = c.id AND (LOWER(e.degree) LIKE ",
    );
    builder.push_bind(pattern.clone());
    builder.push(" ESCAPE '\\' OR LOWER(e.institution) LIKE ");
    builder.push_bind(pattern.clone());
    builder.push(" ESCAPE '\\'))");
    builder.push(
        " OR EXISTS (SELECT 1 FROM work_experience w WHERE w.candidate_id = c.id AND (LOWER(w.company) LIKE ",
    );
    builder.push_bind(pattern.clone());
    builder.push(" ESCAPE '\\' OR LOWER(w.position) LIKE ");
    builder.push_bind(pattern);
    builder.push(" ESCAPE '\\')))");
}

/// `%term%` with LIKE wildcards in the term matched literally.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        models::{candidate::WorkDraft, education::NewEducation},
        services::validation::parse_date,
    };

    async fn store() -> SqliteCandidateStore {
        let pool = db::connect_in_memory().await.unwrap();
        SqliteCandidateStore::new(Arc::new(pool))
    }

    fn draft(first: &str, email: &str) -> CandidateDraft {
        CandidateDraft {
            first_name: first.into(),
            last_name: "Tester".into(),
            email: email.into(),
            phone: None,
            address: None,
            education: Vec::new(),
            work_experience: Vec::new(),
        }
    }

    fn page(search: Option<&str>) -> ListQuery {
        ListQuery {
            page: 1,
            limit: 10,
            search: search.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn insert_and_find_with_relations() {
        let store = store().await;
        let mut input = draft("Ada", "ada@x.com");
        input.education.push(NewEducation {
            degree: "Mathematics".into(),
            institution: "University of London".into(),
            graduation_year: Some(1835),
        });
        input.work_experience = vec![
            WorkDraft {
                company: "Analytical Engines".into(),
                position: "Programmer".into(),
                start_date: parse_date("1842-01-01").unwrap(),
                end_date: None,
                description: None,
            },
            WorkDraft {
                company: "Babbage & Co".into(),
                position: "Translator".into(),
                start_date: parse_date("1843-01-01").unwrap(),
                end_date: None,
                description: Some("Notes".into()),
            },
        ];

        let created = store.insert(&input).await.unwrap();
        let found = store.find(created.id()).await.unwrap().unwrap();

        assert_eq!(found, created);
        assert_eq!(found.education.len(), 1);
        assert_eq!(found.work_experience[0].company, "Babbage & Co");
        assert!(found.cv_file_path().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_reported() {
        let store = store().await;
        store.insert(&draft("Ada", "ada@x.com")).await.unwrap();
        let err = store.insert(&draft("Other", "ada@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail(email) if email == "ada@x.com"));
    }

    #[tokio::test]
    async fn update_sets_fields_and_cv_path() {
        let store = store().await;
        let created = store.insert(&draft("Ada", "ada@x.com")).await.unwrap();

        let patch = CandidatePatch {
            last_name: Some("King".into()),
            phone: Some(Some("+44 20 7946 0000".into())),
            ..Default::default()
        };
        let updated = store
            .update(created.id(), &patch, Some("/tmp/cvs/1_1_cv.pdf"))
            .await
            .unwrap();

        assert_eq!(updated.candidate.candidate.last_name, "King");
        assert_eq!(updated.candidate.candidate.first_name, "Ada");
        assert_eq!(updated.candidate.cv_file_path(), Some("/tmp/cvs/1_1_cv.pdf"));
        assert_eq!(updated.previous_cv_path, None);
        assert_eq!(store.cv_paths().await.unwrap(), vec!["/tmp/cvs/1_1_cv.pdf"]);
    }

    #[tokio::test]
    async fn update_reports_the_path_it_replaced() {
        let store = store().await;
        let id = store.insert(&draft("Ada", "ada@x.com")).await.unwrap().id();
        let patch = CandidatePatch::default();

        store.update(id, &patch, Some("/tmp/cvs/a.pdf")).await.unwrap();
        let second = store.update(id, &patch, Some("/tmp/cvs/b.pdf")).await.unwrap();
        assert_eq!(second.previous_cv_path.as_deref(), Some("/tmp/cvs/a.pdf"));

        let fields_only = store.update(id, &patch, None).await.unwrap();
        assert_eq!(fields_only.previous_cv_path.as_deref(), Some("/tmp/cvs/b.pdf"));
        assert_eq!(fields_only.candidate.cv_file_path(), Some("/tmp/cvs/b.pdf"));
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let store = store().await;
        let err = store
            .update(99, &CandidatePatch::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(99)));
    }

    #[tokio::test]
    async fn delete_returns_removed_row_once() {
        let store = store().await;
        let created = store.insert(&draft("Ada", "ada@x.com")).await.unwrap();

        let removed = store.delete(created.id()).await.unwrap().unwrap();
        assert_eq!(removed.email, "ada@x.com");
        assert!(store.delete(created.id()).await.unwrap().is_none());
        assert!(store.find(created.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginated() {
        let store = store().await;
        for i in 0..5 {
            store
                .insert(&draft("Ada", &format!("ada{i}@x.com")))
                .await
                .unwrap();
        }

        let first = store
            .list(&ListQuery {
                page: 1,
                limit: 2,
                search: None,
            })
            .await
            .unwrap();
        let third = store
            .list(&ListQuery {
                page: 3,
                limit: 2,
                search: None,
            })
            .await
            .unwrap();

        assert_eq!(first.total, 5);
        let emails: Vec<&str> = first
            .candidates
            .iter()
            .map(|c| c.candidate.email.as_str())
            .collect();
        assert_eq!(emails, vec!["ada4@x.com", "ada3@x.com"]);
        assert_eq!(third.candidates.len(), 1);
        assert_eq!(third.candidates[0].candidate.email, "ada0@x.com");
    }

    #[tokio::test]
    async fn search_matches_nested_work_company() {
        let store = store().await;
        let mut grace = draft("Grace", "grace@navy.mil");
        grace.work_experience.push(WorkDraft {
            company: "Acme Corp".into(),
            position: "Engineer".into(),
            start_date: parse_date("1950-01-01").unwrap(),
            end_date: None,
            description: None,
        });
        store.insert(&grace).await.unwrap();
        store.insert(&draft("Alan", "alan@x.com")).await.unwrap();

        let result = store.list(&page(Some("ACME"))).await.unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.candidates[0].candidate.first_name, "Grace");

        let by_email = store.list(&page(Some("alan@"))).await.unwrap();
        assert_eq!(by_email.total, 1);
    }

    #[tokio::test]
    async fn search_treats_wildcards_literally() {
        let store = store().await;
        store.insert(&draft("Ada", "ada@x.com")).await.unwrap();

        assert_eq!(store.list(&page(Some("%"))).await.unwrap().total, 0);
        assert_eq!(store.list(&page(Some("_"))).await.unwrap().total, 0);
        assert_eq!(store.list(&page(Some("  "))).await.unwrap().total, 1);
    }
}
