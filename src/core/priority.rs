use crate::models::Compatibility;

/// Tier used when no compatibility dimension matches. Still eligible.
pub const NO_MATCH_TIER: u8 = 99;

/// Compute the priority tier (lower is better) of a student for a teacher
///
/// Tiers, first match wins:
/// 1. country + city + education level + institution
/// 2. country + city + education level
/// 3. country + education level + institution
/// 4. country + education level
/// 5. institution
/// 6. education level
/// 7. country
/// 99. nothing in common
///
/// A dimension only matches when both sides carry a value and the values are equal.
#[inline]
pub fn priority_tier(teacher: &Compatibility, student: &Compatibility) -> u8 {
    let country = same(&teacher.country, &student.country);
    let city = same(&teacher.city, &student.city);
    let education = same(&teacher.education_level, &student.education_level);
    let institution = same(&teacher.institution, &student.institution);

    if country && city && education && institution {
        1
    } else if country && city && education {
        2
    } else if country && education && institution {
        3
    } else if country && education {
        4
    } else if institution {
        5
    } else if education {
        6
    } else if country {
        7
    } else {
        NO_MATCH_TIER
    }
}

#[inline]
fn same(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}
