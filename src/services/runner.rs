use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use super::store::{EngineStore, StoreError};
use crate::core::{decide, unassigned_count, unmatched_count, CohortMatcher, Convergence, GroupOrganizer};
use crate::models::{CohortId, Gender, PassKind, PassReport};

/// Errors that abort a single pass
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the queue should run the same pass again
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_retryable(),
        }
    }
}

/// Runs matching and grouping passes against a store
///
/// Every gender of every pass reads the store afresh, so records written by
/// an earlier pass (or by the host application) are always taken into account.
pub struct PassRunner<S> {
    store: Arc<S>,
    matcher: CohortMatcher,
    organizer: GroupOrganizer,
}

impl<S: EngineStore> PassRunner<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            matcher: CohortMatcher::new(),
            organizer: GroupOrganizer::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn run_pass(
        &self,
        kind: PassKind,
        cohort_id: CohortId,
        pass_number: u32,
    ) -> Result<PassReport, EngineError> {
        match kind {
            PassKind::Matching => self.run_matching_pass(cohort_id, pass_number).await,
            PassKind::Grouping => self.run_grouping_pass(cohort_id, pass_number).await,
        }
    }

    /// One matching pass over both genders
    #[instrument(skip(self))]
    pub async fn run_matching_pass(
        &self,
        cohort_id: CohortId,
        pass_number: u32,
    ) -> Result<PassReport, EngineError> {
        let mut genders = Vec::with_capacity(Gender::ALL.len());
        let mut participants = Vec::new();

        for gender in Gender::ALL {
            let members = self.store.participants(cohort_id, gender).await?;
            let pairings = self.store.pairings(cohort_id).await?;

            let plan = self.matcher.plan_gender(cohort_id, gender, &members, &pairings);
            for pairing in &plan.pairings {
                self.store.insert_pairing(pairing).await?;
            }

            debug!(
                %gender,
                skipped = plan.stats.skipped,
                ceiling = ?plan.stats.ceiling,
                used_fallback = plan.stats.used_fallback,
                created = plan.stats.created,
                "Matching gender pass complete"
            );

            participants.extend(members);
            genders.push(plan.stats);
        }

        let pairings = self.store.pairings(cohort_id).await?;
        let report = PassReport {
            cohort_id,
            kind: PassKind::Matching,
            pass_number,
            created: genders.iter().map(|g| g.created).sum(),
            remaining: unmatched_count(&participants, &pairings),
            genders,
            finished_at: chrono::Utc::now(),
        };

        info!(
            cohort_id,
            pass_number,
            created = report.created,
            unmatched = report.remaining,
            "Matching pass complete"
        );

        Ok(report)
    }

    /// One grouping pass over both genders
    #[instrument(skip(self))]
    pub async fn run_grouping_pass(
        &self,
        cohort_id: CohortId,
        pass_number: u32,
    ) -> Result<PassReport, EngineError> {
        let mut genders = Vec::with_capacity(Gender::ALL.len());

        for gender in Gender::ALL {
            let participants = self.store.participants(cohort_id, gender).await?;
            let groups = self.store.groups(cohort_id, gender).await?;
            let pairings = self.store.pairings(cohort_id).await?;
            let assignments = self.store.assignments(cohort_id).await?;

            let plan = self.organizer.plan_gender(
                cohort_id,
                gender,
                &participants,
                &groups,
                &pairings,
                &assignments,
            );
            for batch in &plan.batches {
                self.store
                    .insert_assignments(&batch.to_assignments(cohort_id))
                    .await?;
            }

            debug!(
                %gender,
                skipped = plan.stats.skipped,
                ceiling = ?plan.stats.ceiling,
                used_fallback = plan.stats.used_fallback,
                created = plan.stats.created,
                "Grouping gender pass complete"
            );

            genders.push(plan.stats);
        }

        let pairings = self.store.pairings(cohort_id).await?;
        let assignments = self.store.assignments(cohort_id).await?;
        let report = PassReport {
            cohort_id,
            kind: PassKind::Grouping,
            pass_number,
            created: genders.iter().map(|g| g.created).sum(),
            remaining: unassigned_count(&pairings, &assignments),
            genders,
            finished_at: chrono::Utc::now(),
        };

        info!(
            cohort_id,
            pass_number,
            created = report.created,
            unassigned = report.remaining,
            "Grouping pass complete"
        );

        Ok(report)
    }

    /// Run passes back to back until the cohort converges, stalls, or runs out of passes
    pub async fn run_until_converged(
        &self,
        cohort_id: CohortId,
        kind: PassKind,
        max_passes: u32,
    ) -> Result<Vec<PassReport>, EngineError> {
        let mut reports = Vec::new();
        let mut pass_number = 1;

        loop {
            let report = self.run_pass(kind, cohort_id, pass_number).await?;
            let decision = decide(&report, max_passes);
            reports.push(report);

            if decision != Convergence::Resubmit {
                debug!(cohort_id, %kind, ?decision, passes = pass_number, "Run finished");
                return Ok(reports);
            }
            pass_number += 1;
        }
    }
}
