// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wildcard pattern matching over `/`-delimited addresses.
//!
//! - `+` matches exactly one non-empty segment
//! - `#` matches one or more trailing segments and must be last
//! - any other segment matches literally (case-sensitive)

use crate::error::TopicError;

/// Single-level wildcard.
pub const SINGLE_LEVEL: &str = "+";

/// Multi-level wildcard.
pub const MULTI_LEVEL: &str = "#";

/// Returns `true` if `address` is matched by `pattern`.
///
/// A pattern with a `#` anywhere but the last segment never matches.
///
/// ```
/// use tagway_core::matcher::matches;
///
/// assert!(matches("a/+/c", "a/b/c"));
/// assert!(!matches("a/+/c", "a/b/x/c"));
/// assert!(matches("a/#", "a/b/c"));
/// assert!(!matches("a/#", "a"));
/// ```
pub fn matches(pattern: &str, address: &str) -> bool {
    let mut pattern_segments = pattern.split('/').peekable();
    let mut address_segments = address.split('/');

    while let Some(p) = pattern_segments.next() {
        if p == MULTI_LEVEL {
            if pattern_segments.peek().is_some() {
                return false;
            }
            return address_segments.next().is_some_and(|s| !s.is_empty());
        }

        let Some(a) = address_segments.next() else {
            return false;
        };

        if p == SINGLE_LEVEL {
            if a.is_empty() {
                return false;
            }
        } else if p != a {
            return false;
        }
    }

    address_segments.next().is_none()
}

/// Checks that a subscription pattern can match something.
///
/// # Errors
///
/// Returns `TopicError::InvalidPattern` for an empty pattern or a `#` that is
/// not the final segment.
pub fn validate_pattern(pattern: &str) -> Result<(), TopicError> {
    if pattern.is_empty() {
        return Err(TopicError::invalid_pattern(pattern, "empty pattern"));
    }

    let segments: Vec<&str> = pattern.split('/').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if *segment == MULTI_LEVEL && i != last {
            return Err(TopicError::invalid_pattern(
                pattern,
                "'#' must be the final segment",
            ));
        }
        if segment.len() > 1 && (segment.contains('#') || segment.contains('+')) {
            return Err(TopicError::invalid_pattern(
                pattern,
                format!("wildcard must occupy a whole segment, got '{segment}'"),
            ));
        }
    }
    Ok(())
}

/// Returns `true` if the pattern contains wildcard segments.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.split('/').any(|s| s == SINGLE_LEVEL || s == MULTI_LEVEL)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b/C"));
        assert!(!matches("a/b/c", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_single_level() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(matches("+", "x"));
        assert!(!matches("a/+/c", "a/b/x/c"));
        assert!(!matches("a/+/c", "a//c"));
        assert!(!matches("a/+", "a"));
    }

    #[test]
    fn test_multi_level() {
        assert!(matches("a/#", "a/b"));
        assert!(matches("a/#", "a/b/c/d"));
        assert!(!matches("a/#", "a"));
        assert!(matches("#", "a/b"));
        assert!(!matches("a/#/c", "a/b/c"));
    }

    #[test]
    fn test_mixed() {
        assert!(matches("+/b/#", "a/b/c"));
        assert!(!matches("+/b/#", "a/x/c"));
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("a/+/c").is_ok());
        assert!(validate_pattern("a/#").is_ok());
        assert!(validate_pattern("ns=2;s=Motor").is_ok());
        assert!(validate_pattern("").is_err());
        assert!(validate_pattern("a/#/c").is_err());
        assert!(validate_pattern("a/b+/c").is_err());
    }

    #[test]
    fn test_is_wildcard() {
        assert!(is_wildcard("a/+"));
        assert!(is_wildcard("#"));
        assert!(!is_wildcard("a/b+c"));
    }
}
