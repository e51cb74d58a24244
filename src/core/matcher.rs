use std::collections::{HashMap, HashSet};

use crate::core::{
    capacity::{ceil_div, select_candidates, Loaded},
    priority::priority_tier,
};
use crate::models::{CohortId, Gender, GenderPassStats, NewPairing, Pairing, Participant, UserId};

/// Pairings planned for one gender in one pass
#[derive(Debug, Clone, PartialEq)]
pub struct GenderMatchPlan {
    pub pairings: Vec<NewPairing>,
    pub stats: GenderPassStats,
}

/// Cohort matcher - pairs teachers with students, one gender at a time
///
/// # Pass outline
/// 1. Skip the gender when it has no active teacher or no active student
/// 2. Fairness ceiling = ceil(students / teachers)
/// 3. Candidate teachers are those under the ceiling, least-loaded first,
///    or every teacher when nobody is under it
/// 4. Each candidate takes the single best unpaired student by priority tier
///
/// Students that already have any pairing in the cohort are never considered again.
#[derive(Debug, Clone, Copy, Default)]
pub struct CohortMatcher;

impl CohortMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Plan one pass for `gender`
    ///
    /// # Arguments
    /// * `participants` - Active participants of the cohort; other genders are ignored
    /// * `pairings` - Every pairing currently recorded for the cohort
    pub fn plan_gender(
        &self,
        cohort_id: CohortId,
        gender: Gender,
        participants: &[Participant],
        pairings: &[Pairing],
    ) -> GenderMatchPlan {
        let mut teachers: Vec<&Participant> = Vec::new();
        let mut students: Vec<&Participant> = Vec::new();
        for participant in participants
            .iter()
            .filter(|p| p.gender == gender && p.is_active && p.cohort_id == cohort_id)
        {
            if participant.is_teacher() {
                teachers.push(participant);
            } else {
                students.push(participant);
            }
        }

        if teachers.is_empty() || students.is_empty() {
            return GenderMatchPlan {
                pairings: Vec::new(),
                stats: GenderPassStats::skipped(gender),
            };
        }

        let ceiling = ceil_div(students.len(), teachers.len());

        let mut loads: HashMap<UserId, usize> = HashMap::new();
        let mut paired_students: HashSet<UserId> = HashSet::new();
        for pairing in pairings.iter().filter(|p| p.cohort_id == cohort_id) {
            paired_students.insert(pairing.student_id);
            if pairing.counts_toward_load() {
                *loads.entry(pairing.teacher_id).or_default() += 1;
            }
        }

        let loaded: Vec<Loaded> = teachers
            .iter()
            .map(|t| Loaded {
                id: t.user_id,
                load: loads.get(&t.user_id).copied().unwrap_or(0),
            })
            .collect();
        let selection = select_candidates(&loaded, ceiling);

        let by_id: HashMap<UserId, &Participant> =
            teachers.iter().map(|t| (t.user_id, *t)).collect();

        let mut pool: Vec<&Participant> = students
            .into_iter()
            .filter(|s| !paired_students.contains(&s.user_id))
            .collect();
        pool.sort_by_key(|s| s.user_id);

        let mut planned = Vec::new();
        for teacher_id in &selection.ids {
            if pool.is_empty() {
                break;
            }
            let Some(teacher) = by_id.get(teacher_id) else {
                continue;
            };

            // Pool is sorted by id, so min_by_key keeps the lowest id within a tier
            let best = pool
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| priority_tier(&teacher.compatibility, &s.compatibility))
                .map(|(idx, _)| idx);

            if let Some(idx) = best {
                let student = pool.remove(idx);
                planned.push(NewPairing {
                    cohort_id,
                    teacher_id: teacher.user_id,
                    student_id: student.user_id,
                });
            }
        }

        GenderMatchPlan {
            stats: GenderPassStats {
                gender,
                skipped: false,
                ceiling: Some(ceiling),
                used_fallback: selection.used_fallback,
                created: planned.len(),
            },
            pairings: planned,
        }
    }
}

/// Teachers without any pairing plus students without any pairing
pub fn unmatched_count(participants: &[Participant], pairings: &[Pairing]) -> usize {
    let mut teachers_with: HashSet<UserId> = HashSet::new();
    let mut students_with: HashSet<UserId> = HashSet::new();
    for pairing in pairings {
        teachers_with.insert(pairing.teacher_id);
        students_with.insert(pairing.student_id);
    }

    participants
        .iter()
        .filter(|p| p.is_active)
        .filter(|p| {
            if p.is_teacher() {
                !teachers_with.contains(&p.user_id)
            } else {
                !students_with.contains(&p.user_id)
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Compatibility, Role};
    use chrono::Utc;

    fn participant(id: UserId, role: Role, gender: Gender, country: Option<&str>) -> Participant {
        Participant {
            user_id: id,
            cohort_id: 1,
            role,
            gender,
            compatibility: Compatibility {
                country: country.map(str::to_string),
                ..Compatibility::default()
            },
            is_active: true,
        }
    }

    fn pairing(teacher_id: UserId, student_id: UserId, exam_passed: Option<bool>) -> Pairing {
        Pairing {
            id: student_id,
            cohort_id: 1,
            teacher_id,
            student_id,
            is_active: true,
            exam_passed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_skips_gender_without_teachers() {
        let participants = vec![
            participant(1, Role::Student, Gender::Female, None),
            participant(2, Role::Teacher, Gender::Male, None),
        ];

        let plan = CohortMatcher::new().plan_gender(1, Gender::Female, &participants, &[]);
        assert!(plan.pairings.is_empty());
        assert!(plan.stats.skipped);
    }

    #[test]
    fn test_one_student_per_teacher_per_pass() {
        let participants = vec![
            participant(1, Role::Teacher, Gender::Male, None),
            participant(10, Role::Student, Gender::Male, None),
            participant(11, Role::Student, Gender::Male, None),
            participant(12, Role::Student, Gender::Male, None),
        ];

        let plan = CohortMatcher::new().plan_gender(1, Gender::Male, &participants, &[]);
        assert_eq!(plan.pairings.len(), 1);
        assert_eq!(plan.pairings[0].student_id, 10);
        assert_eq!(plan.stats.ceiling, Some(3));
    }

    #[test]
    fn test_excludes_already_paired_students() {
        let participants = vec![
            participant(1, Role::Teacher, Gender::Male, None),
            participant(10, Role::Student, Gender::Male, None),
            participant(11, Role::Student, Gender::Male, None),
        ];
        // A failed pairing still removes the student from the pool
        let pairings = vec![pairing(1, 10, Some(false))];

        let plan = CohortMatcher::new().plan_gender(1, Gender::Male, &participants, &pairings);
        assert_eq!(plan.pairings.len(), 1);
        assert_eq!(plan.pairings[0].student_id, 11);
    }

    #[test]
    fn test_least_loaded_teacher_goes_first() {
        let participants = vec![
            participant(1, Role::Teacher, Gender::Female, Some("TR")),
            participant(2, Role::Teacher, Gender::Female, None),
            participant(10, Role::Student, Gender::Female, None),
            participant(11, Role::Student, Gender::Female, None),
            participant(12, Role::Student, Gender::Female, Some("TR")),
            participant(13, Role::Student, Gender::Female, None),
        ];
        let pairings = vec![pairing(1, 10, None)];

        let plan = CohortMatcher::new().plan_gender(1, Gender::Female, &participants, &pairings);
        // Teacher 2 (load 0) picks before teacher 1 (load 1)
        assert_eq!(plan.pairings[0].teacher_id, 2);
        assert_eq!(plan.pairings[0].student_id, 11);
        assert_eq!(plan.pairings[1].teacher_id, 1);
        assert_eq!(plan.pairings[1].student_id, 12);
    }

    #[test]
    fn test_failed_pairings_do_not_count_toward_load() {
        let participants = vec![
            participant(1, Role::Teacher, Gender::Male, None),
            participant(10, Role::Student, Gender::Male, None),
            participant(11, Role::Student, Gender::Male, None),
        ];
        // ceiling = 2, the failed pairing is ignored -> load 0
        let pairings = vec![pairing(1, 10, Some(false))];

        let plan = CohortMatcher::new().plan_gender(1, Gender::Male, &participants, &pairings);
        assert!(!plan.stats.used_fallback);
        assert_eq!(plan.pairings.len(), 1);
    }

    #[test]
    fn test_fallback_when_all_teachers_saturated() {
        let participants = vec![
            participant(1, Role::Teacher, Gender::Male, None),
            participant(10, Role::Student, Gender::Male, None),
            participant(11, Role::Student, Gender::Male, None),
            participant(12, Role::Student, Gender::Male, None),
        ];
        // Pairings against inactive students still count toward the load
        let pairings = vec![pairing(1, 20, None), pairing(1, 21, None), pairing(1, 22, None)];

        let plan = CohortMatcher::new().plan_gender(1, Gender::Male, &participants, &pairings);
        assert!(plan.stats.used_fallback);
        assert_eq!(plan.pairings.len(), 1);
    }

    #[test]
    fn test_unmatched_count() {
        let participants = vec![
            participant(1, Role::Teacher, Gender::Male, None),
            participant(2, Role::Teacher, Gender::Male, None),
            participant(10, Role::Student, Gender::Male, None),
            participant(11, Role::Student, Gender::Male, None),
        ];
        let pairings = vec![pairing(1, 10, None)];

        assert_eq!(unmatched_count(&participants, &pairings), 2);
    }
}
