use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::core::capacity::{ceil_div, select_candidates, Loaded};
use crate::models::{
    AssignmentRole, CohortId, Gender, GenderPassStats, Group, GroupAssignment, GroupId, Pairing,
    Participant, UserId,
};

/// A batch of assignments written together: a teacher block, or late joiners of an existing block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentBatch {
    pub group_id: GroupId,
    pub lead: Option<UserId>,
    pub members: Vec<UserId>,
}

impl AssignmentBatch {
    pub fn to_assignments(&self, cohort_id: CohortId) -> Vec<GroupAssignment> {
        let lead = self.lead.map(|user_id| GroupAssignment {
            group_id: self.group_id,
            cohort_id,
            user_id,
            role_type: AssignmentRole::Lead,
        });
        let members = self.members.iter().map(|&user_id| GroupAssignment {
            group_id: self.group_id,
            cohort_id,
            user_id,
            role_type: AssignmentRole::Member,
        });
        lead.into_iter().chain(members).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len() + usize::from(self.lead.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Assignments planned for one gender in one pass
#[derive(Debug, Clone, PartialEq)]
pub struct GenderGroupingPlan {
    pub batches: Vec<AssignmentBatch>,
    pub stats: GenderPassStats,
}

/// Group organizer - bin-packs teacher blocks into the cohort's groups
///
/// A block is a teacher (lead) and every student paired with them whose
/// exam is passed (members). Students with a failed exam are never grouped.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupOrganizer;

impl GroupOrganizer {
    pub fn new() -> Self {
        Self
    }

    /// Plan one pass for `gender`
    ///
    /// # Arguments
    /// * `participants` - Active participants of the cohort, used to resolve teacher gender
    /// * `groups` - Groups of the cohort; other genders are ignored
    /// * `pairings` - Every pairing recorded for the cohort
    /// * `assignments` - Every group assignment recorded for the cohort
    pub fn plan_gender(
        &self,
        cohort_id: CohortId,
        gender: Gender,
        participants: &[Participant],
        groups: &[Group],
        pairings: &[Pairing],
        assignments: &[GroupAssignment],
    ) -> GenderGroupingPlan {
        let teachers: HashSet<UserId> = participants
            .iter()
            .filter(|p| p.gender == gender && p.is_teacher())
            .map(|p| p.user_id)
            .collect();

        let assigned: HashMap<UserId, GroupId> = assignments
            .iter()
            .filter(|a| a.cohort_id == cohort_id)
            .map(|a| (a.user_id, a.group_id))
            .collect();

        // teacher -> unassigned exam-passed students, ordered for determinism
        let mut blocks: BTreeMap<UserId, BTreeSet<UserId>> = BTreeMap::new();
        for pairing in pairings.iter().filter(|p| {
            p.cohort_id == cohort_id && p.is_groupable() && teachers.contains(&p.teacher_id)
        }) {
            let students = blocks.entry(pairing.teacher_id).or_default();
            if !assigned.contains_key(&pairing.student_id) {
                students.insert(pairing.student_id);
            }
        }

        let mut batches = Vec::new();
        let mut unassigned_teachers = Vec::new();
        let mut unassigned_students = 0;
        for (teacher_id, students) in blocks {
            unassigned_students += students.len();
            match assigned.get(&teacher_id) {
                // Exam passed after the teacher's block was placed
                Some(&group_id) if !students.is_empty() => batches.push(AssignmentBatch {
                    group_id,
                    lead: None,
                    members: students.into_iter().collect(),
                }),
                Some(_) => {}
                None => unassigned_teachers.push((teacher_id, students)),
            }
        }

        let gender_groups: Vec<&Group> = groups
            .iter()
            .filter(|g| g.gender == gender && g.cohort_id == cohort_id)
            .collect();

        if gender_groups.is_empty() || unassigned_teachers.len() + unassigned_students == 0 {
            return GenderGroupingPlan {
                batches: Vec::new(),
                stats: GenderPassStats::skipped(gender),
            };
        }

        let late_joiners: usize = batches.iter().map(AssignmentBatch::len).sum();
        if unassigned_teachers.is_empty() {
            return GenderGroupingPlan {
                batches,
                stats: GenderPassStats {
                    gender,
                    skipped: false,
                    ceiling: None,
                    used_fallback: false,
                    created: late_joiners,
                },
            };
        }

        let ceiling = ceil_div(unassigned_teachers.len(), gender_groups.len());

        let mut leads: HashMap<GroupId, usize> = HashMap::new();
        for assignment in assignments
            .iter()
            .filter(|a| a.role_type == AssignmentRole::Lead)
        {
            *leads.entry(assignment.group_id).or_default() += 1;
        }

        let loaded: Vec<Loaded> = gender_groups
            .iter()
            .map(|g| Loaded {
                id: g.id,
                load: leads.get(&g.id).copied().unwrap_or(0),
            })
            .collect();
        let selection = select_candidates(&loaded, ceiling);

        let mut pending = unassigned_teachers.into_iter();
        for group_id in selection.ids {
            let Some((teacher_id, students)) = pending.next() else {
                break;
            };
            batches.push(AssignmentBatch {
                group_id,
                lead: Some(teacher_id),
                members: students.into_iter().collect(),
            });
        }

        let created = batches.iter().map(AssignmentBatch::len).sum();
        GenderGroupingPlan {
            batches,
            stats: GenderPassStats {
                gender,
                skipped: false,
                ceiling: Some(ceiling),
                used_fallback: selection.used_fallback,
                created,
            },
        }
    }
}

/// Exam-passed teachers and students that still have no group
pub fn unassigned_count(pairings: &[Pairing], assignments: &[GroupAssignment]) -> usize {
    let assigned: HashSet<UserId> = assignments.iter().map(|a| a.user_id).collect();

    let mut waiting: HashSet<UserId> = HashSet::new();
    for pairing in pairings.iter().filter(|p| p.is_groupable()) {
        for user_id in [pairing.teacher_id, pairing.student_id] {
            if !assigned.contains(&user_id) {
                waiting.insert(user_id);
            }
        }
    }
    waiting.len()
}
