//! Cohort Match - capacity-balanced matching and group assignment engine
//!
//! Pairs teachers with students inside a cohort under a per-pass fairness
//! ceiling and compatibility priority tiers, then bin-packs confirmed
//! teacher/student blocks into the cohort's fixed-capacity groups. Both
//! algorithms run as background passes that resubmit themselves until the
//! cohort converges.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{priority_tier, CohortMatcher, Convergence, GroupOrganizer};
pub use models::{Gender, GroupAssignment, Pairing, Participant, PassKind, PassReport};
pub use services::{InMemoryStore, PassRunner, TaskQueue};
