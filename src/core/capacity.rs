/// Integer ceiling division. `d` must be non-zero.
#[inline]
pub fn ceil_div(n: usize, d: usize) -> usize {
    debug_assert!(d > 0, "ceil_div by zero");
    n.div_ceil(d)
}

/// Something with a current occupancy, e.g. a teacher's pairing count or a group's lead count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loaded {
    pub id: i64,
    pub load: usize,
}

/// Candidates chosen for one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSelection {
    pub ids: Vec<i64>,
    pub used_fallback: bool,
}

/// Select candidates strictly under `ceiling`, least-loaded first (ties by id)
///
/// When nobody is under the ceiling, every item is returned ordered by id so the
/// pass can still make progress.
pub fn select_candidates(items: &[Loaded], ceiling: usize) -> CandidateSelection {
    let mut under: Vec<Loaded> = items
        .iter()
        .copied()
        .filter(|item| item.load < ceiling)
        .collect();

    if !under.is_empty() {
        under.sort_by_key(|item| (item.load, item.id));
        return CandidateSelection {
            ids: under.into_iter().map(|item| item.id).collect(),
            used_fallback: false,
        };
    }

    let mut ids: Vec<i64> = items.iter().map(|item| item.id).collect();
    ids.sort_unstable();

    CandidateSelection {
        ids,
        used_fallback: !items.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(7, 3), 3);
        assert_eq!(ceil_div(6, 3), 2);
        assert_eq!(ceil_div(5, 2), 3);
        assert_eq!(ceil_div(0, 4), 0);
        assert_eq!(ceil_div(1, 10), 1);
    }

    #[test]
    fn test_least_loaded_first() {
        let items = [
            Loaded { id: 1, load: 2 },
            Loaded { id: 2, load: 0 },
            Loaded { id: 3, load: 1 },
            Loaded { id: 4, load: 0 },
        ];

        let selection = select_candidates(&items, 3);
        assert_eq!(selection.ids, vec![2, 4, 3, 1]);
        assert!(!selection.used_fallback);
    }

    #[test]
    fn test_saturated_items_excluded() {
        let items = [Loaded { id: 1, load: 3 }, Loaded { id: 2, load: 1 }];

        let selection = select_candidates(&items, 3);
        assert_eq!(selection.ids, vec![2]);
    }

    #[test]
    fn test_fallback_when_all_saturated() {
        let items = [Loaded { id: 9, load: 3 }, Loaded { id: 5, load: 4 }];

        let selection = select_candidates(&items, 3);
        assert_eq!(selection.ids, vec![5, 9]);
        assert!(selection.used_fallback);
    }

    #[test]
    fn test_empty_input() {
        let selection = select_candidates(&[], 1);
        assert!(selection.ids.is_empty());
        assert!(!selection.used_fallback);
    }
}
