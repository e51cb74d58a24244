// Core algorithm exports
pub mod capacity;
pub mod convergence;
pub mod matcher;
pub mod organizer;
pub mod priority;

pub use capacity::{ceil_div, select_candidates, CandidateSelection, Loaded};
pub use convergence::{decide, Convergence};
pub use matcher::{unmatched_count, CohortMatcher, GenderMatchPlan};
pub use organizer::{unassigned_count, AssignmentBatch, GenderGroupingPlan, GroupOrganizer};
pub use priority::{priority_tier, NO_MATCH_TIER};
