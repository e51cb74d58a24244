use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;

use super::store::{
    AssignmentStore, GroupDirectory, PairingStore, ParticipantDirectory, StoreError, StoreResult,
};
use crate::models::{
    AssignmentRole, CohortId, Compatibility, Gender, Group, GroupAssignment, NewPairing, Pairing,
    Participant, Role,
};

/// PostgreSQL-backed store for participants, pairings, groups and assignments
///
/// Uniqueness of active pairings per student and of assignments per user is
/// enforced by the schema, so concurrent passes for the same cohort surface
/// as [`StoreError::Conflict`] instead of duplicate rows.
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client from a connection string
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(idle_timeout)
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        // Run migrations on startup
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool without running migrations
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new PostgreSQL client from settings
    pub async fn from_settings(
        url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
        acquire_timeout_secs: Option<u64>,
        idle_timeout_secs: Option<u64>,
    ) -> Result<Self, StoreError> {
        tracing::info!("Connecting to PostgreSQL");

        Self::new(
            url,
            max_connections.unwrap_or(10),
            min_connections.unwrap_or(1),
            Duration::from_secs(acquire_timeout_secs.unwrap_or(5)),
            Duration::from_secs(idle_timeout_secs.unwrap_or(600)),
        )
        .await
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

/// Translate unique-constraint violations into retryable conflicts
fn map_write_error(err: sqlx::Error, what: String) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(what);
        }
    }
    StoreError::SqlxError(err)
}

fn participant_from_row(row: &PgRow) -> StoreResult<Participant> {
    let gender: String = row.try_get("gender")?;
    let is_teacher: bool = row.try_get("is_teacher")?;

    Ok(Participant {
        user_id: row.try_get("user_id")?,
        cohort_id: row.try_get("cohort_id")?,
        role: if is_teacher { Role::Teacher } else { Role::Student },
        gender: gender.parse().map_err(StoreError::InvalidData)?,
        compatibility: Compatibility {
            country: row.try_get("country")?,
            city: row.try_get("city")?,
            education_level: row.try_get("education_level")?,
            institution: row.try_get("institution")?,
        },
        is_active: row.try_get("is_active")?,
    })
}

fn pairing_from_row(row: &PgRow) -> StoreResult<Pairing> {
    Ok(Pairing {
        id: row.try_get("id")?,
        cohort_id: row.try_get("cohort_id")?,
        teacher_id: row.try_get("teacher_id")?,
        student_id: row.try_get("student_id")?,
        is_active: row.try_get("is_active")?,
        exam_passed: row.try_get("exam_passed")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ParticipantDirectory for PostgresClient {
    async fn participants(&self, cohort_id: CohortId, gender: Gender) -> StoreResult<Vec<Participant>> {
        let query = r#"
            SELECT user_id, cohort_id, is_teacher, gender, country, city,
                   education_level, institution, is_active
            FROM cohort_participants
            WHERE cohort_id = $1 AND gender = $2 AND is_active
            ORDER BY user_id
        "#;

        let rows = sqlx::query(query)
            .bind(cohort_id)
            .bind(gender.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(participant_from_row).collect()
    }
}

#[async_trait]
impl PairingStore for PostgresClient {
    async fn pairings(&self, cohort_id: CohortId) -> StoreResult<Vec<Pairing>> {
        let query = r#"
            SELECT id, cohort_id, teacher_id, student_id, is_active, exam_passed, created_at
            FROM cohort_pairings
            WHERE cohort_id = $1
            ORDER BY id
        "#;

        let rows = sqlx::query(query).bind(cohort_id).fetch_all(&self.pool).await?;

        rows.iter().map(pairing_from_row).collect()
    }

    async fn insert_pairing(&self, pairing: &NewPairing) -> StoreResult<Pairing> {
        let query = r#"
            INSERT INTO cohort_pairings (cohort_id, teacher_id, student_id, is_active, created_at)
            VALUES ($1, $2, $3, TRUE, NOW())
            RETURNING id, cohort_id, teacher_id, student_id, is_active, exam_passed, created_at
        "#;

        let row = sqlx::query(query)
            .bind(pairing.cohort_id)
            .bind(pairing.teacher_id)
            .bind(pairing.student_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                map_write_error(
                    e,
                    format!(
                        "student {} already has an active pairing in cohort {}",
                        pairing.student_id, pairing.cohort_id
                    ),
                )
            })?;

        tracing::debug!(
            cohort_id = pairing.cohort_id,
            teacher_id = pairing.teacher_id,
            student_id = pairing.student_id,
            "Recorded pairing"
        );

        pairing_from_row(&row)
    }
}

#[async_trait]
impl GroupDirectory for PostgresClient {
    async fn groups(&self, cohort_id: CohortId, gender: Gender) -> StoreResult<Vec<Group>> {
        let query = r#"
            SELECT id, cohort_id
            FROM cohort_groups
            WHERE cohort_id = $1 AND gender = $2
            ORDER BY id
        "#;

        let rows = sqlx::query(query)
            .bind(cohort_id)
            .bind(gender.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> StoreResult<Group> {
                Ok(Group {
                    id: row.try_get("id")?,
                    cohort_id: row.try_get("cohort_id")?,
                    gender,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AssignmentStore for PostgresClient {
    async fn assignments(&self, cohort_id: CohortId) -> StoreResult<Vec<GroupAssignment>> {
        let query = r#"
            SELECT group_id, cohort_id, user_id, role_type
            FROM group_assignments
            WHERE cohort_id = $1
        "#;

        let rows = sqlx::query(query).bind(cohort_id).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> StoreResult<GroupAssignment> {
                let role_type: String = row.try_get("role_type")?;
                Ok(GroupAssignment {
                    group_id: row.try_get("group_id")?,
                    cohort_id: row.try_get("cohort_id")?,
                    user_id: row.try_get("user_id")?,
                    role_type: role_type
                        .parse::<AssignmentRole>()
                        .map_err(StoreError::InvalidData)?,
                })
            })
            .collect()
    }

    async fn insert_assignments(&self, batch: &[GroupAssignment]) -> StoreResult<()> {
        let query = r#"
            INSERT INTO group_assignments (group_id, cohort_id, user_id, role_type, created_at)
            VALUES ($1, $2, $3, $4, NOW())
        "#;

        let mut tx = self.pool.begin().await?;
        for assignment in batch {
            sqlx::query(query)
                .bind(assignment.group_id)
                .bind(assignment.cohort_id)
                .bind(assignment.user_id)
                .bind(assignment.role_type.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    map_write_error(
                        e,
                        format!(
                            "user {} already assigned in cohort {}",
                            assignment.user_id, assignment.cohort_id
                        ),
                    )
                })?;
        }
        tx.commit().await?;

        tracing::debug!(rows = batch.len(), "Recorded group assignments");

        Ok(())
    }
}
