//! Permission expressions and option coercion
//!
//! A held permission is stored as a plain string. Two leading markers may be
//! combined in either order:
//!
//! - `-site.delete` denies instead of grants
//! - `#site.manage` is only visible on the entity itself, never to inheritors

use sitegate_sdk::names::{NEGATION_PREFIX, NON_INHERITABLE_PREFIX};

/// A held permission entry after its markers have been parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionExpression {
    /// The expression as stored, markers included
    pub raw: String,
    /// Pattern with markers stripped (`a.b`, `a.*`, `*`, or a regex)
    pub pattern: String,
    pub negated: bool,
    pub inheritable: bool,
    /// Scope the entry applies to; `None` is the common scope
    pub site: Option<String>,
    /// Unix seconds after which the entry stops applying
    pub expires_at: Option<u64>,
}

impl PermissionExpression {
    /// Parse a stored expression into a common-scope, non-expiring entry
    pub fn parse(raw: &str) -> Self {
        let mut pattern = raw.trim();
        let mut negated = false;
        let mut inheritable = true;

        loop {
            if !negated {
                if let Some(rest) = pattern.strip_prefix(NEGATION_PREFIX) {
                    negated = true;
                    pattern = rest;
                    continue;
                }
            }
            if inheritable {
                if let Some(rest) = pattern.strip_prefix(NON_INHERITABLE_PREFIX) {
                    inheritable = false;
                    pattern = rest;
                    continue;
                }
            }
            break;
        }

        Self {
            raw: raw.to_string(),
            pattern: pattern.to_string(),
            negated,
            inheritable,
            site: None,
            expires_at: None,
        }
    }

    /// Scope the entry to a site
    pub fn with_site(mut self, site: Option<&str>) -> Self {
        self.site = site.map(str::to_string);
        self
    }

    pub fn with_expiry(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the entry no longer applies at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Check if the entry applies to a query for `site`
    pub fn applies_to(&self, site: Option<&str>) -> bool {
        match &self.site {
            None => true,
            Some(own) => site == Some(own.as_str()),
        }
    }
}

impl std::fmt::Display for PermissionExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Outcome of matching a permission against held expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Grant,
    Deny,
    NoOpinion,
}

impl Decision {
    pub fn is_decided(self) -> bool {
        self != Decision::NoOpinion
    }
}

// ============================================================================
// Option coercion
// ============================================================================

/// Read an option as a boolean, falling back on anything unrecognised
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "yes" | "on" | "1") => true,
        Some("false" | "no" | "off" | "0") => false,
        _ => default,
    }
}

/// Read an option as an integer, falling back on parse failure
pub fn parse_integer(value: Option<&str>, default: i64) -> i64 {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read an option as a float, falling back on parse failure
pub fn parse_double(value: Option<&str>, default: f64) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let expr = PermissionExpression::parse("site.view");
        assert_eq!(expr.pattern, "site.view");
        assert!(!expr.negated);
        assert!(expr.inheritable);
    }

    #[test]
    fn test_parse_markers_in_either_order() {
        for raw in ["-#site.delete", "#-site.delete"] {
            let expr = PermissionExpression::parse(raw);
            assert_eq!(expr.pattern, "site.delete");
            assert!(expr.negated);
            assert!(!expr.inheritable);
            assert_eq!(expr.raw, raw);
        }

        let expr = PermissionExpression::parse("--x");
        assert!(expr.negated);
        assert_eq!(expr.pattern, "-x");
    }

    #[test]
    fn test_expiry_and_site() {
        let expr = PermissionExpression::parse("p")
            .with_site(Some("example.com"))
            .with_expiry(10);
        assert!(!expr.is_expired(9));
        assert!(expr.is_expired(10));
        assert!(expr.applies_to(Some("example.com")));
        assert!(!expr.applies_to(Some("other.com")));
        assert!(!expr.applies_to(None));
        assert!(PermissionExpression::parse("p").applies_to(Some("any")));
    }

    #[test]
    fn test_option_coercion_falls_back() {
        assert!(parse_bool(Some("YES"), false));
        assert!(!parse_bool(Some("off"), true));
        assert!(parse_bool(Some("maybe"), true));
        assert!(!parse_bool(None, false));

        assert_eq!(parse_integer(Some(" 42 "), 0), 42);
        assert_eq!(parse_integer(Some("4x2"), 7), 7);
        assert_eq!(parse_integer(None, -1), -1);

        assert_eq!(parse_double(Some("1.5"), 0.0), 1.5);
        assert_eq!(parse_double(Some("NaN"), 2.0), 2.0);
        assert_eq!(parse_double(Some("abc"), 3.0), 3.0);
    }
}
