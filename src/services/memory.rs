use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::store::{
    AssignmentStore, GroupDirectory, PairingStore, ParticipantDirectory, StoreError, StoreResult,
};
use crate::models::{CohortId, Gender, Group, GroupAssignment, NewPairing, Pairing, Participant, UserId};

#[derive(Debug, Default)]
struct Tables {
    participants: Vec<Participant>,
    pairings: Vec<Pairing>,
    groups: Vec<Group>,
    assignments: Vec<GroupAssignment>,
    next_pairing_id: i64,
}

/// In-process store with the same uniqueness rules as the PostgreSQL schema
///
/// Used by the test suite and for running the engine without a database.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::InvalidData("in-memory store poisoned".to_string()))
    }

    pub fn add_participant(&self, participant: Participant) -> StoreResult<()> {
        self.lock()?.participants.push(participant);
        Ok(())
    }

    pub fn add_group(&self, group: Group) -> StoreResult<()> {
        self.lock()?.groups.push(group);
        Ok(())
    }

    /// Record an exam result for a student's active pairing
    pub fn set_exam_passed(&self, cohort_id: CohortId, student_id: UserId, passed: Option<bool>) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let pairing = tables
            .pairings
            .iter_mut()
            .find(|p| p.cohort_id == cohort_id && p.student_id == student_id && p.is_active)
            .ok_or_else(|| StoreError::InvalidData(format!("no active pairing for student {}", student_id)))?;
        pairing.exam_passed = passed;
        Ok(())
    }

    /// Soft-invalidate a student's active pairing
    pub fn deactivate_pairing(&self, cohort_id: CohortId, student_id: UserId) -> StoreResult<()> {
        let mut tables = self.lock()?;
        for pairing in tables
            .pairings
            .iter_mut()
            .filter(|p| p.cohort_id == cohort_id && p.student_id == student_id)
        {
            pairing.is_active = false;
        }
        Ok(())
    }
}

#[async_trait]
impl ParticipantDirectory for InMemoryStore {
    async fn participants(&self, cohort_id: CohortId, gender: Gender) -> StoreResult<Vec<Participant>> {
        let tables = self.lock()?;
        let mut found: Vec<Participant> = tables
            .participants
            .iter()
            .filter(|p| p.cohort_id == cohort_id && p.gender == gender && p.is_active)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.user_id);
        Ok(found)
    }
}

#[async_trait]
impl PairingStore for InMemoryStore {
    async fn pairings(&self, cohort_id: CohortId) -> StoreResult<Vec<Pairing>> {
        let tables = self.lock()?;
        Ok(tables
            .pairings
            .iter()
            .filter(|p| p.cohort_id == cohort_id)
            .cloned()
            .collect())
    }

    async fn insert_pairing(&self, pairing: &NewPairing) -> StoreResult<Pairing> {
        let mut tables = self.lock()?;
        let taken = tables.pairings.iter().any(|p| {
            p.cohort_id == pairing.cohort_id && p.student_id == pairing.student_id && p.is_active
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "student {} already has an active pairing in cohort {}",
                pairing.student_id, pairing.cohort_id
            )));
        }

        tables.next_pairing_id += 1;
        let record = Pairing {
            id: tables.next_pairing_id,
            cohort_id: pairing.cohort_id,
            teacher_id: pairing.teacher_id,
            student_id: pairing.student_id,
            is_active: true,
            exam_passed: None,
            created_at: chrono::Utc::now(),
        };
        tables.pairings.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl GroupDirectory for InMemoryStore {
    async fn groups(&self, cohort_id: CohortId, gender: Gender) -> StoreResult<Vec<Group>> {
        let tables = self.lock()?;
        let mut found: Vec<Group> = tables
            .groups
            .iter()
            .filter(|g| g.cohort_id == cohort_id && g.gender == gender)
            .cloned()
            .collect();
        found.sort_by_key(|g| g.id);
        Ok(found)
    }
}

#[async_trait]
impl AssignmentStore for InMemoryStore {
    async fn assignments(&self, cohort_id: CohortId) -> StoreResult<Vec<GroupAssignment>> {
        let tables = self.lock()?;
        Ok(tables
            .assignments
            .iter()
            .filter(|a| a.cohort_id == cohort_id)
            .copied()
            .collect())
    }

    async fn insert_assignments(&self, batch: &[GroupAssignment]) -> StoreResult<()> {
        let mut tables = self.lock()?;

        let mut seen: HashSet<(CohortId, UserId)> = tables
            .assignments
            .iter()
            .map(|a| (a.cohort_id, a.user_id))
            .collect();
        for assignment in batch {
            if !seen.insert((assignment.cohort_id, assignment.user_id)) {
                return Err(StoreError::Conflict(format!(
                    "user {} already assigned in cohort {}",
                    assignment.user_id, assignment.cohort_id
                )));
            }
        }

        tables.assignments.extend_from_slice(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssignmentRole, Compatibility, Role};

    fn student(id: UserId, gender: Gender) -> Participant {
        Participant {
            user_id: id,
            cohort_id: 1,
            role: Role::Student,
            gender,
            compatibility: Compatibility::default(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_participants_filtered_by_gender_and_activity() {
        let store = InMemoryStore::new();
        store.add_participant(student(2, Gender::Male)).unwrap();
        store.add_participant(student(1, Gender::Male)).unwrap();
        store.add_participant(student(3, Gender::Female)).unwrap();
        let mut inactive = student(4, Gender::Male);
        inactive.is_active = false;
        store.add_participant(inactive).unwrap();

        let males = store.participants(1, Gender::Male).await.unwrap();
        let ids: Vec<UserId> = males.iter().map(|p| p.user_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_active_pairing_conflicts() {
        let store = InMemoryStore::new();
        let new = NewPairing { cohort_id: 1, teacher_id: 10, student_id: 20 };

        store.insert_pairing(&new).await.unwrap();
        let err = store
            .insert_pairing(&NewPairing { teacher_id: 11, ..new })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Same student in another cohort is fine
        store.insert_pairing(&NewPairing { cohort_id: 2, ..new }).await.unwrap();
    }

    #[tokio::test]
    async fn test_conflicting_batch_writes_nothing() {
        let store = InMemoryStore::new();
        let lead = GroupAssignment { group_id: 1, cohort_id: 1, user_id: 10, role_type: AssignmentRole::Lead };
        store.insert_assignments(&[lead]).await.unwrap();

        let member = GroupAssignment { user_id: 20, role_type: AssignmentRole::Member, ..lead };
        let err = store.insert_assignments(&[member, lead]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.assignments(1).await.unwrap().len(), 1);
    }
}
