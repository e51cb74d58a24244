use crate::models::PassReport;

/// What to do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Nothing left to match or assign
    Converged,
    /// Work remains but the pass could not create anything; accepted terminal state
    Stalled,
    /// The run hit its pass budget with work remaining
    PassLimitReached,
    /// Submit another pass for the same cohort
    Resubmit,
}

impl Convergence {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Convergence::Resubmit)
    }
}

/// Decide whether the cohort needs another pass
///
/// A pass that created nothing cannot be followed by one that does (the inputs
/// are unchanged), so it ends the run instead of resubmitting forever.
pub fn decide(report: &PassReport, max_passes: u32) -> Convergence {
    if report.remaining == 0 {
        Convergence::Converged
    } else if report.created == 0 {
        Convergence::Stalled
    } else if report.pass_number >= max_passes {
        Convergence::PassLimitReached
    } else {
        Convergence::Resubmit
    }
}
