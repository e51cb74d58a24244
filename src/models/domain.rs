use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type CohortId = i64;
pub type UserId = i64;
pub type GroupId = i64;

/// Binary gender partition. Matching and grouping never cross it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Processing order for a pass
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(format!("unknown gender: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// Compatibility attributes used for priority tiers. Each field is independently nullable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compatibility {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub education_level: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
}

/// A participant of a cohort as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub cohort_id: CohortId,
    pub role: Role,
    pub gender: Gender,
    #[serde(default)]
    pub compatibility: Compatibility,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Participant {
    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

fn default_true() -> bool { true }

/// Teacher/student pairing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pairing {
    pub id: i64,
    pub cohort_id: CohortId,
    pub teacher_id: UserId,
    pub student_id: UserId,
    pub is_active: bool,
    /// `None` until the student's exam has been evaluated
    pub exam_passed: Option<bool>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Pairing {
    /// Counts toward a teacher's load when the exam is passed or not yet evaluated
    pub fn counts_toward_load(&self) -> bool {
        self.exam_passed != Some(false)
    }

    /// Eligible for grouping: active with a passed exam
    pub fn is_groupable(&self) -> bool {
        self.is_active && self.exam_passed == Some(true)
    }
}

/// A pairing about to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPairing {
    pub cohort_id: CohortId,
    pub teacher_id: UserId,
    pub student_id: UserId,
}

/// Fixed-capacity communication group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub cohort_id: CohortId,
    pub gender: Gender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentRole {
    Lead,
    Member,
}

impl AssignmentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentRole::Lead => "lead",
            AssignmentRole::Member => "member",
        }
    }
}

impl FromStr for AssignmentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lead" => Ok(AssignmentRole::Lead),
            "member" => Ok(AssignmentRole::Member),
            other => Err(format!("unknown role type: {}", other)),
        }
    }
}

/// Participant to group assignment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAssignment {
    pub group_id: GroupId,
    pub cohort_id: CohortId,
    pub user_id: UserId,
    pub role_type: AssignmentRole,
}

/// Which background algorithm a pass runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    Matching,
    Grouping,
}

impl PassKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassKind::Matching => "matching",
            PassKind::Grouping => "grouping",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of background work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassJob {
    pub job_id: uuid::Uuid,
    pub cohort_id: CohortId,
    pub kind: PassKind,
    pub pass_number: u32,
    pub max_passes: u32,
    pub conflict_retries: u32,
}

impl PassJob {
    pub fn first(cohort_id: CohortId, kind: PassKind, max_passes: u32) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4(),
            cohort_id,
            kind,
            pass_number: 1,
            max_passes,
            conflict_retries: 0,
        }
    }

    /// The follow-up job submitted after a pass that left work behind
    pub fn next_pass(&self) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4(),
            pass_number: self.pass_number + 1,
            conflict_retries: 0,
            ..self.clone()
        }
    }

    /// Same pass again after a retryable failure
    pub fn retry(&self) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4(),
            conflict_retries: self.conflict_retries + 1,
            ..self.clone()
        }
    }
}

/// Per-gender outcome of one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenderPassStats {
    pub gender: Gender,
    pub skipped: bool,
    pub ceiling: Option<usize>,
    pub used_fallback: bool,
    pub created: usize,
}

impl GenderPassStats {
    pub fn skipped(gender: Gender) -> Self {
        Self {
            gender,
            skipped: true,
            ceiling: None,
            used_fallback: false,
            created: 0,
        }
    }
}

/// Outcome of one pass, also the per-cohort observability record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub cohort_id: CohortId,
    pub kind: PassKind,
    pub pass_number: u32,
    /// Pairings (matching) or assignments (grouping) written in this pass
    pub created: usize,
    /// Participants still unmatched or unassigned after the pass
    pub remaining: usize,
    pub genders: Vec<GenderPassStats>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}
