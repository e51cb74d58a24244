use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CohortId, Gender, Group, GroupAssignment, NewPairing, Pairing, Participant};

/// Errors raised by the engine's stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    /// A uniqueness rule rejected the write, usually a concurrent pass got there first
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Whether running the same pass again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::SqlxError(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            StoreError::MigrateError(_) | StoreError::InvalidData(_) => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read access to cohort participants
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    /// Active participants of one gender, ordered by user id
    async fn participants(&self, cohort_id: CohortId, gender: Gender) -> StoreResult<Vec<Participant>>;
}

/// Teacher/student pairings; at most one active pairing per student and cohort
#[async_trait]
pub trait PairingStore: Send + Sync {
    async fn pairings(&self, cohort_id: CohortId) -> StoreResult<Vec<Pairing>>;

    async fn insert_pairing(&self, pairing: &NewPairing) -> StoreResult<Pairing>;
}

/// Read access to the cohort's communication groups
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Groups of one gender, ordered by id
    async fn groups(&self, cohort_id: CohortId, gender: Gender) -> StoreResult<Vec<Group>>;
}

/// Group assignments; at most one per user and cohort
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn assignments(&self, cohort_id: CohortId) -> StoreResult<Vec<GroupAssignment>>;

    /// Write a batch atomically: either every row lands or none does
    async fn insert_assignments(&self, batch: &[GroupAssignment]) -> StoreResult<()>;
}

/// Everything a pass needs
pub trait EngineStore: ParticipantDirectory + PairingStore + GroupDirectory + AssignmentStore {}

impl<T> EngineStore for T where T: ParticipantDirectory + PairingStore + GroupDirectory + AssignmentStore {}
