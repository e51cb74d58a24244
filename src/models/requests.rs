use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to start a matching or grouping run for a cohort
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TriggerPassRequest {
    /// Overrides `engine.max_passes` for this run
    #[validate(range(min = 1, max = 1000))]
    #[serde(alias = "max_passes", rename = "maxPasses", default)]
    pub max_passes: Option<u32>,
}
