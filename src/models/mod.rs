// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    AssignmentRole, CohortId, Compatibility, Gender, GenderPassStats, Group, GroupAssignment,
    GroupId, NewPairing, Pairing, Participant, PassJob, PassKind, PassReport, Role, UserId,
};
pub use requests::TriggerPassRequest;
pub use responses::{CohortStatusResponse, ErrorResponse, HealthResponse, PassAcceptedResponse};
