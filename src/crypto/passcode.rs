//! # Passcode Strength Validation
//!
//! Policy checks applied before a passcode is accepted for key wrapping.
//! Rule violations split into two severities:
//!
//! - **Errors** (blocking): length and character-class requirements.
//!   A passcode with any error is rejected.
//! - **Warnings** (non-blocking): weak substrings and repeated-character
//!   runs. These are surfaced to the caller but do not reject the passcode.

/// Minimum passcode length in characters
pub const MIN_PASSCODE_LENGTH: usize = 12;

/// Longest allowed run of a single repeated character before warning
const MAX_REPEAT_RUN: usize = 3;

/// Substrings that flag a passcode as guessable
const WEAK_SUBSTRINGS: &[&str] = &[
    "password", "passcode", "qwerty", "123456", "abcdef", "letmein", "iloveyou", "admin",
    "welcome",
];

/// Outcome of a passcode strength check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasscodeStrength {
    /// True when there are no blocking errors
    pub is_valid: bool,
    /// Blocking rule violations
    pub errors: Vec<String>,
    /// Non-blocking weaknesses
    pub warnings: Vec<String>,
}

/// Validate a passcode against the strength policy
///
/// ## Blocking rules
///
/// - At least [`MIN_PASSCODE_LENGTH`] characters
/// - At least one uppercase letter, one lowercase letter, one digit,
///   and one symbol
///
/// ## Warning rules
///
/// - Contains a common weak substring (case-insensitive)
/// - Contains a run of more than [`MAX_REPEAT_RUN`] identical characters
pub fn validate_passcode_strength(passcode: &str) -> PasscodeStrength {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if passcode.chars().count() < MIN_PASSCODE_LENGTH {
        errors.push(format!(
            "must be at least {} characters",
            MIN_PASSCODE_LENGTH
        ));
    }

    if !passcode.chars().any(|c| c.is_uppercase()) {
        errors.push("must contain an uppercase letter".to_string());
    }
    if !passcode.chars().any(|c| c.is_lowercase()) {
        errors.push("must contain a lowercase letter".to_string());
    }
    if !passcode.chars().any(|c| c.is_ascii_digit()) {
        errors.push("must contain a digit".to_string());
    }
    if !passcode.chars().any(|c| !c.is_alphanumeric()) {
        errors.push("must contain a symbol".to_string());
    }

    let lowered = passcode.to_lowercase();
    for weak in WEAK_SUBSTRINGS {
        if lowered.contains(weak) {
            warnings.push(format!("contains a common sequence: {:?}", weak));
        }
    }

    if has_repeat_run(passcode, MAX_REPEAT_RUN) {
        warnings.push(format!(
            "contains more than {} repeated characters in a row",
            MAX_REPEAT_RUN
        ));
    }

    PasscodeStrength {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Check for a run of identical characters longer than `max`
fn has_repeat_run(s: &str, max: usize) -> bool {
    let mut run = 0usize;
    let mut prev: Option<char> = None;

    for c in s.chars() {
        if Some(c) == prev {
            run += 1;
            if run > max {
                return true;
            }
        } else {
            run = 1;
            prev = Some(c);
        }
    }

    false
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_passcode_passes() {
        let result = validate_passcode_strength("Tr0ub4dor&3!XY");

        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_short_passcode_fails() {
        let result = validate_passcode_strength("Ab1!x");

        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("12 characters")));
    }

    #[test]
    fn test_missing_classes_each_reported() {
        // No uppercase, no digit, no symbol
        let result = validate_passcode_strength("alllowercaseletters");

        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_weak_substring_warns_but_passes() {
        let result = validate_passcode_strength("MyPassword99!!x");

        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("password")));
    }

    #[test]
    fn test_repeat_run_warns_but_passes() {
        let result = validate_passcode_strength("Gooood4You!!!!x");

        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("repeated")));
    }

    #[test]
    fn test_repeat_run_boundary() {
        // Exactly three repeats is allowed without warning
        assert!(!has_repeat_run("aaab", 3));
        assert!(has_repeat_run("aaaab", 3));
    }
}
