//! Matching requested permissions against held expressions
//!
//! Held expressions are scanned in order and the first one that matches
//! decides. The resolver orders them so that an entity's own entries come
//! before anything inherited, and newer entries before older ones.
//!
//! A pattern matches a requested permission when it is:
//! - `*`
//! - equal to it (ASCII case-insensitive)
//! - `prefix.*` where `prefix.` is a strict prefix of it
//! - a regex (see [`RegexMatcher`]) matching the whole of it
//!
//! [`resolve`] adds hierarchical implication on top: `a.b.c` is checked,
//! then `a.b`, then `a`, so a grant for `a.b` covers `a.b.c` unless a more
//! specific entry says otherwise.

use dashmap::DashMap;
use regex::Regex;
use sitegate_sdk::names::{NODE_SEPARATOR, WILDCARD, WILDCARD_SUFFIX};

use super::types::{Decision, PermissionExpression};

/// Characters that turn a pattern into a regular expression
const REGEX_MARKERS: &[char] = &['(', ')', '[', ']', '{', '}', '|', '?', '+', '^', '$'];

/// Compiled patterns kept before the memo starts over
const DEFAULT_COMPILED_LIMIT: usize = 4096;

/// Strategy deciding whether one held expression covers a permission
pub trait PermissionMatcher: Send + Sync {
    fn is_match(&self, expression: &PermissionExpression, permission: &str) -> bool;

    /// Forget anything memoised from previously loaded data
    ///
    /// Called by the manager whenever it swaps in a freshly loaded snapshot.
    fn clear_cache(&self) {}
}

/// Default matcher: wildcards, prefixes and memoised regexes
#[derive(Debug)]
pub struct RegexMatcher {
    compiled: DashMap<String, Option<Regex>>,
    limit: usize,
}

impl Default for RegexMatcher {
    fn default() -> Self {
        Self::with_limit(DEFAULT_COMPILED_LIMIT)
    }
}

impl RegexMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matcher that memoises at most `limit` compiled patterns
    pub fn with_limit(limit: usize) -> Self {
        Self {
            compiled: DashMap::new(),
            limit: limit.max(1),
        }
    }

    /// Number of memoised patterns
    pub fn compiled_len(&self) -> usize {
        self.compiled.len()
    }

    fn regex_match(&self, pattern: &str, permission: &str) -> bool {
        if let Some(cached) = self.compiled.get(pattern) {
            return cached.as_ref().is_some_and(|re| re.is_match(permission));
        }

        let compiled = match Regex::new(&translate(pattern)) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Invalid permission expression '{}': {}", pattern, e);
                None
            }
        };
        let matched = compiled.as_ref().is_some_and(|re| re.is_match(permission));
        if self.compiled.len() >= self.limit {
            tracing::debug!("Regex memo reached {} patterns, starting over", self.limit);
            self.compiled.clear();
        }
        self.compiled.insert(pattern.to_string(), compiled);
        matched
    }
}

impl PermissionMatcher for RegexMatcher {
    fn is_match(&self, expression: &PermissionExpression, permission: &str) -> bool {
        let pattern = expression.pattern.as_str();

        if pattern == WILDCARD {
            return true;
        }

        if is_regex(pattern) {
            return self.regex_match(pattern, permission);
        }

        if pattern.eq_ignore_ascii_case(permission) {
            return true;
        }

        if let Some(base) = pattern.strip_suffix('*') {
            // `base` keeps its trailing separator
            return pattern.ends_with(WILDCARD_SUFFIX)
                && permission.len() > base.len()
                && permission
                    .get(..base.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(base));
        }

        false
    }

    fn clear_cache(&self) {
        self.compiled.clear();
    }
}

fn is_regex(pattern: &str) -> bool {
    if pattern.contains(REGEX_MARKERS) {
        return true;
    }
    let stars = pattern.matches('*').count();
    stars > 1 || (stars == 1 && !pattern.ends_with(WILDCARD_SUFFIX))
}

/// Turn a permission pattern into an anchored, case-insensitive regex
fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '.' => out.push_str("\\."),
            '*' => out.push_str(".*"),
            other => out.push(other),
        }
    }
    out.push('$');
    out
}

/// First-match decision over `held` for exactly `permission`
///
/// Entries scoped to a different site than `site` are skipped.
pub fn decide(
    matcher: &dyn PermissionMatcher,
    permission: &str,
    held: &[PermissionExpression],
    site: Option<&str>,
) -> Decision {
    held.iter()
        .filter(|expression| expression.applies_to(site))
        .find(|expression| matcher.is_match(expression, permission))
        .map(|expression| {
            if expression.negated {
                Decision::Deny
            } else {
                Decision::Grant
            }
        })
        .unwrap_or(Decision::NoOpinion)
}

/// Decision for `permission`, falling back to each of its dotted ancestors
pub fn resolve(
    matcher: &dyn PermissionMatcher,
    permission: &str,
    held: &[PermissionExpression],
    site: Option<&str>,
) -> Decision {
    let mut candidate = permission;
    loop {
        let decision = decide(matcher, candidate, held, site);
        if decision.is_decided() {
            return decision;
        }
        match candidate.rfind(NODE_SEPARATOR) {
            Some(index) => candidate = &candidate[..index],
            None => return Decision::NoOpinion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(raw: &[&str]) -> Vec<PermissionExpression> {
        raw.iter().map(|r| PermissionExpression::parse(r)).collect()
    }

    fn matches(pattern: &str, permission: &str) -> bool {
        RegexMatcher::new().is_match(&PermissionExpression::parse(pattern), permission)
    }

    #[test]
    fn test_basic_patterns() {
        assert!(matches("*", "anything.at.all"));
        assert!(matches("site.view", "SITE.View"));
        assert!(matches("site.*", "site.view"));
        assert!(matches("site.*", "site.view.raw"));
        assert!(!matches("site.*", "site"));
        assert!(!matches("site.*", "sitemap.view"));
        assert!(!matches("site.view", "site.view.raw"));
    }

    #[test]
    fn test_regex_patterns() {
        assert!(matches("site.(view|edit)", "site.edit"));
        assert!(!matches("site.(view|edit)", "site.delete"));
        assert!(matches("site.*.read", "site.pages.read"));
        assert!(!matches("site.*.read", "site.pages.write"));
        assert!(matches("user.[0-9]+", "user.42"));
        assert!(!matches("user.(", "user.("));
    }

    #[test]
    fn test_first_match_wins() {
        let matcher = RegexMatcher::new();
        let list = held(&["-site.delete", "site.*"]);
        assert_eq!(decide(&matcher, "site.delete", &list, None), Decision::Deny);
        assert_eq!(decide(&matcher, "site.view", &list, None), Decision::Grant);
        assert_eq!(decide(&matcher, "other", &list, None), Decision::NoOpinion);

        let list = held(&["site.*", "-site.delete"]);
        assert_eq!(decide(&matcher, "site.delete", &list, None), Decision::Grant);
    }

    #[test]
    fn test_site_scoped_entries_are_filtered() {
        let matcher = RegexMatcher::new();
        let list = vec![
            PermissionExpression::parse("-shop.buy").with_site(Some("other.com")),
            PermissionExpression::parse("shop.buy"),
        ];
        assert_eq!(
            decide(&matcher, "shop.buy", &list, Some("example.com")),
            Decision::Grant
        );
        assert_eq!(
            decide(&matcher, "shop.buy", &list, Some("other.com")),
            Decision::Deny
        );
    }

    #[test]
    fn test_hierarchical_implication() {
        let matcher = RegexMatcher::new();
        let list = held(&["-a.b.c", "a.b"]);
        assert_eq!(resolve(&matcher, "a.b.d", &list, None), Decision::Grant);
        assert_eq!(resolve(&matcher, "a.b.c", &list, None), Decision::Deny);
        assert_eq!(resolve(&matcher, "a.b.c.d", &list, None), Decision::Deny);
        assert_eq!(resolve(&matcher, "a", &list, None), Decision::NoOpinion);
    }

    #[test]
    fn test_regex_memo_is_bounded_and_clearable() {
        let matcher = RegexMatcher::with_limit(2);
        for (pattern, permission) in [("a.(x|y)", "a.x"), ("b.(x|y)", "b.x"), ("c.(x|y)", "c.y")] {
            assert!(matcher.is_match(&PermissionExpression::parse(pattern), permission));
            assert!(matcher.compiled_len() <= 2);
        }
        // The third pattern started the memo over
        assert_eq!(matcher.compiled_len(), 1);

        matcher.clear_cache();
        assert_eq!(matcher.compiled_len(), 0);
        assert!(matcher.is_match(&PermissionExpression::parse("a.(x|y)"), "a.y"));
        assert_eq!(matcher.compiled_len(), 1);
    }
}
