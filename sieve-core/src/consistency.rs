//! Post-warm invariant check.
//!
//! After a warm the stored set must equal the authoritative set. The check
//! returns a typed report; whether a violation is logged, alerted on or
//! turned into an error is up to the caller.

use std::collections::HashSet;
use std::fmt;

/// Details of a stored set that drifted from its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyViolation {
    /// Derived name of the filter that was checked.
    pub filter: String,
    /// Members the source has but the store lacks (sorted).
    pub missing: Vec<String>,
    /// Members the store has but the source lacks (sorted).
    pub unexpected: Vec<String>,
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "filter {} differs from its source: {} missing, {} unexpected",
            self.filter,
            self.missing.len(),
            self.unexpected.len()
        )
    }
}

impl std::error::Error for ConsistencyViolation {}

/// Outcome of [`check_consistency`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyReport {
    Consistent,
    Violation(ConsistencyViolation),
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Turn the report into a `Result`, for callers that treat drift as fatal.
    pub fn into_result(self) -> Result<(), ConsistencyViolation> {
        match self {
            Self::Consistent => Ok(()),
            Self::Violation(v) => Err(v),
        }
    }
}

/// Compare a stored set with its authoritative counterpart.
///
/// The report is `Consistent` iff the symmetric difference is empty.
pub fn check_consistency(
    filter: &str,
    stored: &HashSet<String>,
    authoritative: &HashSet<String>,
) -> ConsistencyReport {
    let mut missing: Vec<String> = authoritative.difference(stored).cloned().collect();
    let mut unexpected: Vec<String> = stored.difference(authoritative).cloned().collect();

    if missing.is_empty() && unexpected.is_empty() {
        return ConsistencyReport::Consistent;
    }

    missing.sort();
    unexpected.sort();
    ConsistencyReport::Violation(ConsistencyViolation {
        filter: filter.to_string(),
        missing,
        unexpected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_equal_sets_are_consistent() {
        let report = check_consistency("f", &set(&["1", "2"]), &set(&["2", "1"]));
        assert!(report.is_consistent());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_empty_sets_are_consistent() {
        assert!(check_consistency("f", &set(&[]), &set(&[])).is_consistent());
    }

    #[test]
    fn test_violation_lists_both_directions() {
        let report = check_consistency("region_filter_US", &set(&["1", "9"]), &set(&["1", "10", "2"]));
        let violation = report.into_result().unwrap_err();
        assert_eq!(violation.filter, "region_filter_US");
        assert_eq!(violation.missing, vec!["10".to_string(), "2".to_string()]);
        assert_eq!(violation.unexpected, vec!["9".to_string()]);
    }

    #[test]
    fn test_violation_display() {
        let violation = ConsistencyViolation {
            filter: "currency_filter_USD".to_string(),
            missing: vec!["4".to_string()],
            unexpected: vec![],
        };
        let msg = format!("{}", violation);
        assert!(msg.contains("currency_filter_USD"));
        assert!(msg.contains("1 missing"));
        assert!(msg.contains("0 unexpected"));
    }
}
