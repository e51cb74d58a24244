use serde::{Deserialize, Serialize};
use crate::models::domain::{CohortId, PassKind, PassReport};

/// Response for an accepted trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassAcceptedResponse {
    pub job_id: uuid::Uuid,
    pub cohort_id: CohortId,
    pub kind: PassKind,
    pub max_passes: u32,
}

/// Latest pass reports for a cohort
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortStatusResponse {
    pub cohort_id: CohortId,
    pub matching: Option<PassReport>,
    pub grouping: Option<PassReport>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
