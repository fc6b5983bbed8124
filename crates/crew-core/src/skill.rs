//! Skill matching and normalization.
//!
//! The dispatch subsystem matches a task's type against a contractor's
//! declared skills with a case-insensitive bidirectional substring rule:
//! `"Delivery"` matches `"delivery"` and `"Deliveries"`, and a declared
//! skill of `"del"` also matches `"Delivery"`.
//!
//! The bidirectional rule is deliberately preserved from the existing
//! mobile clients and is known to produce surprising matches for very
//! short tokens (a skill of "se" matches "Setup"). Callers should treat a
//! match as a coarse filter, not an authorization decision.

/// Returns true when `a` and `b` fuzzy-match: case-insensitive substring in
/// either direction.
#[must_use]
pub fn matches(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Returns true when any declared skill fuzzy-matches `wanted`.
#[must_use]
pub fn any_match(skills: &[String], wanted: &str) -> bool {
    skills.iter().any(|s| matches(s, wanted))
}

/// Normalizes a skill into its room token: lower-cased, internal whitespace
/// collapsed to single hyphens.
#[must_use]
pub fn normalize(skill: &str) -> String {
    skill
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_ignores_case() {
        assert!(matches("Delivery", "delivery"));
    }

    #[test]
    fn plural_skill_matches_singular_type() {
        assert!(matches("Deliveries", "Delivery"));
    }

    #[test]
    fn short_token_matches_either_direction() {
        // Documented quirk of the bidirectional rule.
        assert!(matches("del", "Delivery"));
        assert!(matches("se", "Setup"));
    }

    #[test]
    fn unrelated_skills_do_not_match() {
        assert!(!matches("Pickup", "Delivery"));
    }

    #[test]
    fn empty_tokens_never_match() {
        assert!(!matches("", "Delivery"));
        assert!(!matches("Delivery", "  "));
    }

    #[test]
    fn any_match_scans_all_skills() {
        let skills = vec!["Pickup".to_string(), "bounce house setup".to_string()];
        assert!(any_match(&skills, "Setup"));
        assert!(!any_match(&skills, "Maintenance"));
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  Bounce  House Setup "), "bounce-house-setup");
        assert_eq!(normalize("Delivery"), "delivery");
    }
}
