//! Per-principal permission data
//!
//! [`PermissibleEntity`] owns everything one user or group holds directly:
//! permissions, options, prefix/suffix and parent edges per scope, plus timed
//! permissions. It knows nothing about inheritance; resolution across groups
//! and sites happens in the resolver, which reads entities through the
//! manager's registry.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use sitegate_engine::{EntityRecord, ScopeRecord, TimedPermissionRecord};
use sitegate_sdk::names::{
    fold_name, same_name, DEFAULT_RANK_LADDER, RANK_LADDER_OPTION, RANK_OPTION, WEIGHT_OPTION,
};
use sitegate_sdk::EntityKind;

use super::types::{parse_integer, PermissionExpression};

#[derive(Debug, Clone)]
pub struct PermissibleEntity {
    id: String,
    name: String,
    kind: EntityKind,
    common: ScopeRecord,
    sites: BTreeMap<String, ScopeRecord>,
    /// Newest first
    timed: Vec<TimedPermissionRecord>,
    weight: OnceLock<i32>,
    dirty: bool,
}

impl PermissibleEntity {
    /// Create an empty entity
    pub fn new(kind: EntityKind, name: &str) -> Self {
        Self::from_record(kind, EntityRecord::new(name))
    }

    pub fn from_record(kind: EntityKind, record: EntityRecord) -> Self {
        Self {
            id: normalize(&record.name),
            name: record.name,
            kind,
            common: record.common,
            sites: record.sites,
            timed: record.timed,
            weight: OnceLock::new(),
            dirty: false,
        }
    }

    pub fn to_record(&self) -> EntityRecord {
        EntityRecord {
            name: self.name.clone(),
            common: self.common.clone(),
            sites: self
                .sites
                .iter()
                .filter(|(_, scope)| !scope.is_empty())
                .map(|(site, scope)| (site.clone(), scope.clone()))
                .collect(),
            timed: self.timed.clone(),
        }
    }

    /// Lowercased identity
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name as first written
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Sites this entity holds data for
    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }

    fn scope(&self, site: Option<&str>) -> Option<&ScopeRecord> {
        match site {
            None => Some(&self.common),
            Some(site) => self.sites.get(site),
        }
    }

    fn scope_mut(&mut self, site: Option<&str>) -> &mut ScopeRecord {
        match site {
            None => &mut self.common,
            Some(site) => self.sites.entry(site.to_string()).or_default(),
        }
    }

    fn scopes_mut(&mut self) -> impl Iterator<Item = &mut ScopeRecord> {
        std::iter::once(&mut self.common).chain(self.sites.values_mut())
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    /// Live timed permissions, then permanent ones, for exactly one scope
    pub fn own_permissions(&self, site: Option<&str>, now: u64) -> Vec<PermissionExpression> {
        let timed = self
            .timed
            .iter()
            .filter(|timed| timed.site.as_deref() == site && timed.expires_at > now)
            .map(|timed| {
                PermissionExpression::parse(&timed.permission)
                    .with_site(site)
                    .with_expiry(timed.expires_at)
            });

        let permanent = self
            .permanent_permissions(site)
            .iter()
            .map(|raw| PermissionExpression::parse(raw).with_site(site));

        timed.chain(permanent).collect()
    }

    /// Stored permanent expressions for one scope, newest first
    pub fn permanent_permissions(&self, site: Option<&str>) -> &[String] {
        self.scope(site)
            .map(|scope| scope.permissions.as_slice())
            .unwrap_or_default()
    }

    /// Add a permission, moving it to the front if already present
    pub fn add_permission(&mut self, permission: &str, site: Option<&str>) {
        let permissions = &mut self.scope_mut(site).permissions;
        permissions.retain(|existing| existing != permission);
        permissions.insert(0, permission.to_string());
    }

    /// Returns `true` if the permission was present
    pub fn remove_permission(&mut self, permission: &str, site: Option<&str>) -> bool {
        let permissions = &mut self.scope_mut(site).permissions;
        let before = permissions.len();
        permissions.retain(|existing| existing != permission);
        permissions.len() != before
    }

    pub fn set_permissions(&mut self, permissions: &[String], site: Option<&str>) {
        let mut unique: Vec<String> = Vec::with_capacity(permissions.len());
        for permission in permissions {
            if !unique.contains(permission) {
                unique.push(permission.clone());
            }
        }
        self.scope_mut(site).permissions = unique;
    }

    // ========================================================================
    // Timed permissions
    // ========================================================================

    /// Grant `permission` until `now + lifetime`
    pub fn add_timed_permission(
        &mut self,
        permission: &str,
        site: Option<&str>,
        lifetime: u64,
        now: u64,
    ) {
        self.timed
            .retain(|timed| !(timed.permission == permission && timed.site.as_deref() == site));
        self.timed.insert(
            0,
            TimedPermissionRecord {
                permission: permission.to_string(),
                site: site.map(str::to_string),
                expires_at: now.saturating_add(lifetime),
            },
        );
    }

    pub fn remove_timed_permission(&mut self, permission: &str, site: Option<&str>) -> bool {
        let before = self.timed.len();
        self.timed
            .retain(|timed| !(timed.permission == permission && timed.site.as_deref() == site));
        self.timed.len() != before
    }

    /// Live timed permissions for one scope
    pub fn timed_permissions(&self, site: Option<&str>, now: u64) -> Vec<&TimedPermissionRecord> {
        self.timed
            .iter()
            .filter(|timed| timed.site.as_deref() == site && timed.expires_at > now)
            .collect()
    }

    /// Number of stored timed permissions that have expired by `now`
    pub fn expired_count(&self, now: u64) -> usize {
        self.timed.iter().filter(|timed| timed.expires_at <= now).count()
    }

    /// Drop expired timed permissions. Returns how many were removed.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let before = self.timed.len();
        self.timed.retain(|timed| timed.expires_at > now);
        before - self.timed.len()
    }

    // ========================================================================
    // Options and info
    // ========================================================================

    pub fn own_option(&self, name: &str, site: Option<&str>) -> Option<&str> {
        self.scope(site)
            .and_then(|scope| scope.options.get(name))
            .map(String::as_str)
    }

    /// Set or clear (`None`) an option
    pub fn set_option(&mut self, name: &str, value: Option<&str>, site: Option<&str>) {
        let options = &mut self.scope_mut(site).options;
        match value {
            Some(value) => {
                options.insert(name.to_string(), value.to_string());
            }
            None => {
                options.remove(name);
            }
        }
        self.weight.take();
    }

    /// All options of one scope
    pub fn own_options(&self, site: Option<&str>) -> BTreeMap<String, String> {
        self.scope(site)
            .map(|scope| scope.options.clone())
            .unwrap_or_default()
    }

    pub fn own_prefix(&self, site: Option<&str>) -> Option<&str> {
        self.scope(site)
            .and_then(|scope| scope.prefix.as_deref())
            .filter(|prefix| !prefix.is_empty())
    }

    pub fn own_suffix(&self, site: Option<&str>) -> Option<&str> {
        self.scope(site)
            .and_then(|scope| scope.suffix.as_deref())
            .filter(|suffix| !suffix.is_empty())
    }

    pub fn set_prefix(&mut self, prefix: Option<&str>, site: Option<&str>) {
        self.scope_mut(site).prefix = prefix.map(str::to_string);
    }

    pub fn set_suffix(&mut self, suffix: Option<&str>, site: Option<&str>) {
        self.scope_mut(site).suffix = suffix.map(str::to_string);
    }

    // ========================================================================
    // Parent edges
    // ========================================================================

    /// Parent group names declared for exactly one scope
    pub fn parent_names(&self, site: Option<&str>) -> &[String] {
        self.scope(site)
            .map(|scope| scope.parents.as_slice())
            .unwrap_or_default()
    }

    /// Parent names declared in any scope
    pub fn all_parent_names(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.common)
            .chain(self.sites.values())
            .flat_map(|scope| scope.parents.iter())
    }

    pub fn set_parent_names(&mut self, parents: Vec<String>, site: Option<&str>) {
        self.scope_mut(site).parents = parents;
    }

    /// Strip a parent from every scope. Returns `true` if anything changed.
    pub fn remove_parent_everywhere(&mut self, parent: &str) -> bool {
        let mut changed = false;
        for scope in self.scopes_mut() {
            let before = scope.parents.len();
            scope.parents.retain(|name| !same_name(name, parent));
            changed |= scope.parents.len() != before;
        }
        changed
    }

    // ========================================================================
    // Group attributes
    // ========================================================================

    /// Ordering weight from the common `weight` option, memoised
    pub fn weight(&self) -> i32 {
        *self.weight.get_or_init(|| {
            parse_integer(self.own_option(WEIGHT_OPTION, None), 0)
                .clamp(i32::MIN.into(), i32::MAX.into()) as i32
        })
    }

    /// Position on the rank ladder; 0 when unranked
    pub fn rank(&self) -> i32 {
        parse_integer(self.own_option(RANK_OPTION, None), 0)
            .clamp(0, i32::MAX.into()) as i32
    }

    pub fn rank_ladder(&self) -> &str {
        self.own_option(RANK_LADDER_OPTION, None)
            .filter(|ladder| !ladder.is_empty())
            .unwrap_or(DEFAULT_RANK_LADDER)
    }

    pub fn is_ranked(&self) -> bool {
        self.rank() > 0
    }

    /// Check if this group is flagged default for exactly one scope
    pub fn is_default(&self, site: Option<&str>) -> bool {
        self.scope(site).is_some_and(|scope| scope.default)
    }

    pub(crate) fn set_default_flag(&mut self, default: bool, site: Option<&str>) {
        match site {
            None => self.common.default = default,
            Some(site) if default => self.scope_mut(Some(site)).default = true,
            Some(site) => {
                if let Some(scope) = self.sites.get_mut(site) {
                    scope.default = false;
                }
            }
        }
    }

    // ========================================================================
    // Persistence state
    // ========================================================================

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Normalize a name into an entity id
pub fn normalize(name: &str) -> String {
    fold_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_permission_prepends_and_dedupes() {
        let mut entity = PermissibleEntity::new(EntityKind::User, "Alice");
        entity.add_permission("a", None);
        entity.add_permission("b", None);
        entity.add_permission("a", None);

        assert_eq!(entity.permanent_permissions(None), ["a", "b"]);
        assert!(entity.remove_permission("b", None));
        assert!(!entity.remove_permission("b", None));
        assert_eq!(entity.id(), "alice");
        assert_eq!(entity.name(), "Alice");
    }

    #[test]
    fn test_permissions_are_per_scope() {
        let mut entity = PermissibleEntity::new(EntityKind::Group, "staff");
        entity.add_permission("shop.manage", Some("shop.example.com"));
        entity.add_permission("site.view", None);

        let shop = entity.own_permissions(Some("shop.example.com"), 0);
        assert_eq!(shop.len(), 1);
        assert_eq!(shop[0].site.as_deref(), Some("shop.example.com"));
        assert_eq!(entity.own_permissions(None, 0)[0].pattern, "site.view");
        assert!(entity.own_permissions(Some("other"), 0).is_empty());
    }

    #[test]
    fn test_timed_permissions_expire() {
        let mut entity = PermissibleEntity::new(EntityKind::User, "bob");
        entity.add_permission("site.view", None);
        entity.add_timed_permission("p", None, 1, 100);

        let live = entity.own_permissions(None, 100);
        assert_eq!(live[0].pattern, "p");
        assert_eq!(live[0].expires_at, Some(101));
        assert_eq!(live.len(), 2);

        let later = entity.own_permissions(None, 101);
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].pattern, "site.view");

        assert_eq!(entity.purge_expired(101), 1);
        assert!(entity.to_record().timed.is_empty());
    }

    #[test]
    fn test_weight_memo_cleared_by_option_change() {
        let mut entity = PermissibleEntity::new(EntityKind::Group, "vip");
        assert_eq!(entity.weight(), 0);
        entity.set_option(WEIGHT_OPTION, Some("15"), None);
        assert_eq!(entity.weight(), 15);
        entity.set_option(WEIGHT_OPTION, Some("junk"), None);
        assert_eq!(entity.weight(), 0);
    }

    #[test]
    fn test_rank_and_ladder() {
        let mut entity = PermissibleEntity::new(EntityKind::Group, "mod");
        assert!(!entity.is_ranked());
        assert_eq!(entity.rank_ladder(), DEFAULT_RANK_LADDER);

        entity.set_option(RANK_OPTION, Some("20"), None);
        entity.set_option(RANK_LADDER_OPTION, Some("staff"), None);
        assert_eq!(entity.rank(), 20);
        assert_eq!(entity.rank_ladder(), "staff");
    }

    #[test]
    fn test_remove_parent_everywhere() {
        let mut entity = PermissibleEntity::new(EntityKind::Group, "child");
        entity.set_parent_names(vec!["Parent".to_string(), "other".to_string()], None);
        entity.set_parent_names(vec!["parent".to_string()], Some("example.com"));

        assert!(entity.remove_parent_everywhere("PARENT"));
        assert_eq!(entity.parent_names(None), ["other"]);
        assert!(entity.parent_names(Some("example.com")).is_empty());
        assert!(!entity.remove_parent_everywhere("parent"));
    }

    #[test]
    fn test_record_round_trip_drops_empty_sites() {
        let mut entity = PermissibleEntity::new(EntityKind::Group, "g");
        entity.set_prefix(Some("[G]"), Some("example.com"));
        entity.set_prefix(None, Some("example.com"));

        let record = entity.to_record();
        assert!(record.sites.is_empty());
        assert_eq!(record.name, "g");
        assert_eq!(entity.own_prefix(Some("example.com")), None);
    }
}
