//! Reserved expression markers and well-known option names
//!
//! These strings are part of the persisted data format and must stay stable.

/// Leading marker that turns a permission expression into a denial
pub const NEGATION_PREFIX: char = '-';

/// Leading marker for grants that are not passed on to inheriting entities
pub const NON_INHERITABLE_PREFIX: char = '#';

/// Expression that matches every permission
pub const WILDCARD: &str = "*";

/// Terminal wildcard segment (`a.b.*`)
pub const WILDCARD_SUFFIX: &str = ".*";

/// Separator between permission node segments
pub const NODE_SEPARATOR: char = '.';

/// Group ordering weight
pub const WEIGHT_OPTION: &str = "weight";

/// Position of a group on its rank ladder (smaller is higher, 0 = unranked)
pub const RANK_OPTION: &str = "rank";

/// Name of the rank ladder a group participates in
pub const RANK_LADDER_OPTION: &str = "rank-ladder";

/// Ladder used when a group does not name one
pub const DEFAULT_RANK_LADDER: &str = "default";

/// Marks an entity as an operator for `op` / `notop` node defaults
pub const OP_OPTION: &str = "op";

/// Collected option names for iteration
pub const WELL_KNOWN_OPTIONS: &[&str] = &[WEIGHT_OPTION, RANK_OPTION, RANK_LADDER_OPTION, OP_OPTION];

/// Case-folded identity of a user, group or ladder name
///
/// Folding is full Unicode lowercase, so `Émile` and `émile` are one entity.
pub fn fold_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Check if two names denote the same entity
pub fn same_name(a: &str, b: &str) -> bool {
    fold_name(a) == fold_name(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_fold_unicode() {
        assert_eq!(fold_name("  Ärger "), "ärger");
        assert!(same_name("Émile", "ÉMILE"));
        assert!(same_name("admin", " Admin"));
        assert!(!same_name("Émile", "emile"));
    }
}
