//! Two-axis inheritance resolution
//!
//! Every lookup walks scopes in one fixed order and stops at the first hit:
//!
//! ```text
//!   own(site) → own(inherited sites, nearest first) → own(common)
//!        └─ then each parent group, lightest weight first, same order, recursively
//! ```
//!
//! Permissions are gathered in that order instead of stopping, so the
//! matcher's first-match rule sees an entity's own entries before inherited
//! ones. Group cycles are cut by a visited set passed down the recursion, and
//! site cycles by a separate visited set in [`Resolver::site_ancestors`].

use std::collections::{HashSet, VecDeque};

use sitegate_sdk::EntityKind;

use super::entity::{normalize, PermissibleEntity};
use super::registry::{EntityHandle, Registry};
use super::types::PermissionExpression;
use crate::error::PermissionResult;

/// Ordered scopes consulted for one query: the site, its ancestors, then common
pub(crate) type Scopes = Vec<Option<String>>;

/// Stateless resolution pass over one registry snapshot
pub(crate) struct Resolver<'r> {
    registry: &'r Registry,
    now: u64,
}

impl<'r> Resolver<'r> {
    pub(crate) fn new(registry: &'r Registry, now: u64) -> Self {
        Self { registry, now }
    }

    // ========================================================================
    // Sites
    // ========================================================================

    /// Every site `site` inherits from, depth first, without repeats
    pub(crate) fn site_ancestors(&self, site: &str) -> PermissionResult<Vec<String>> {
        let mut visited = HashSet::from([site.to_string()]);
        let mut out = Vec::new();
        self.walk_sites(site, &mut visited, &mut out)?;
        Ok(out)
    }

    fn walk_sites(
        &self,
        site: &str,
        visited: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) -> PermissionResult<()> {
        for parent in self.registry.site_parents(site)? {
            if visited.insert(parent.clone()) {
                out.push(parent.clone());
                self.walk_sites(&parent, visited, out)?;
            }
        }
        Ok(())
    }

    pub(crate) fn scopes(&self, site: Option<&str>) -> PermissionResult<Scopes> {
        let mut scopes = Vec::new();
        if let Some(site) = site {
            scopes.push(Some(site.to_string()));
            scopes.extend(self.site_ancestors(site)?.into_iter().map(Some));
        }
        scopes.push(None);
        Ok(scopes)
    }

    // ========================================================================
    // Parents
    // ========================================================================

    /// Parent names across `scopes`, deduplicated, self-references dropped
    ///
    /// A user without any membership falls back to the site's default group.
    pub(crate) fn parent_names(
        &self,
        entity: &PermissibleEntity,
        scopes: &[Option<String>],
        site: Option<&str>,
    ) -> PermissionResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for scope in scopes {
            for name in entity.parent_names(scope.as_deref()) {
                let id = normalize(name);
                if id.is_empty() || (entity.kind() == EntityKind::Group && id == entity.id()) {
                    continue;
                }
                if seen.insert(id) {
                    names.push(name.trim().to_string());
                }
            }
        }

        if names.is_empty() && entity.kind() == EntityKind::User {
            match self.registry.default_group_name(site)? {
                Some(default) => names.push(default),
                None => tracing::warn!(
                    "No default group defined, '{}' has no groups",
                    entity.name()
                ),
            }
        }
        Ok(names)
    }

    /// Resolved parent groups of an entity for `site`, sorted by weight
    pub(crate) fn parent_groups(
        &self,
        handle: &EntityHandle,
        site: Option<&str>,
    ) -> PermissionResult<Vec<EntityHandle>> {
        let scopes = self.scopes(site)?;
        self.parents_in(handle, &scopes, site)
    }

    fn parents_in(
        &self,
        handle: &EntityHandle,
        scopes: &[Option<String>],
        site: Option<&str>,
    ) -> PermissionResult<Vec<EntityHandle>> {
        let (kind, id, names) = {
            let entity = handle.read();
            let names = self.parent_names(&entity, scopes, site)?;
            (entity.kind(), entity.id().to_string(), names)
        };

        let mut parents = Vec::with_capacity(names.len());
        for name in names {
            let parent = self.registry.group(&name)?;
            if kind == EntityKind::Group && self.is_child_of(&parent, &id, scopes, site, true)? {
                tracing::debug!("Skipping parent '{}' of '{}': it inherits from it", name, id);
                continue;
            }
            parents.push(parent);
        }

        parents.sort_by_key(|parent| parent.read().weight());
        Ok(parents)
    }

    /// Check if `child` inherits from the group `ancestor` within `scopes`
    pub(crate) fn is_child_of(
        &self,
        child: &EntityHandle,
        ancestor: &str,
        scopes: &[Option<String>],
        site: Option<&str>,
        recursive: bool,
    ) -> PermissionResult<bool> {
        self.reaches(child, ancestor, recursive, &|entity| {
            self.parent_names(entity, scopes, site)
        })
    }

    /// Like [`Self::is_child_of`], following edges of every scope
    pub(crate) fn is_child_of_anywhere(
        &self,
        child: &EntityHandle,
        ancestor: &str,
    ) -> PermissionResult<bool> {
        self.reaches(child, ancestor, true, &|entity| {
            Ok(entity.all_parent_names().cloned().collect())
        })
    }

    /// Breadth-first search along parent edges
    fn reaches(
        &self,
        start: &EntityHandle,
        target: &str,
        recursive: bool,
        edges: &dyn Fn(&PermissibleEntity) -> PermissionResult<Vec<String>>,
    ) -> PermissionResult<bool> {
        let target = normalize(target);
        let mut visited = HashSet::new();
        let mut queue: VecDeque<String> = {
            let entity = start.read();
            if entity.kind() == EntityKind::Group {
                visited.insert(entity.id().to_string());
            }
            edges(&entity)?.into_iter().collect()
        };

        while let Some(name) = queue.pop_front() {
            let id = normalize(&name);
            if id == target {
                return Ok(true);
            }
            if !recursive || !visited.insert(id.clone()) {
                continue;
            }
            if let Some(parent) = self.registry.lookup(EntityKind::Group, &id)? {
                let entity = parent.read();
                queue.extend(edges(&entity)?);
            }
        }
        Ok(false)
    }

    /// Entities of `kind` with `group` as a direct parent for `site`
    pub(crate) fn direct_members(
        &self,
        kind: EntityKind,
        group: &str,
        site: Option<&str>,
    ) -> PermissionResult<Vec<EntityHandle>> {
        let scopes = self.scopes(site)?;
        let group = normalize(group);
        let mut members = Vec::new();
        for handle in self.registry.all(kind)? {
            let names = {
                let entity = handle.read();
                self.parent_names(&entity, &scopes, site)?
            };
            if names.iter().any(|name| normalize(name) == group) {
                members.push(handle);
            }
        }
        Ok(members)
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    /// Every expression that applies to an entity for `site`, in match order
    pub(crate) fn permissions(
        &self,
        handle: &EntityHandle,
        site: Option<&str>,
    ) -> PermissionResult<Vec<PermissionExpression>> {
        let scopes = self.scopes(site)?;
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        self.collect(handle, site, &scopes, false, &mut visited, &mut out)?;
        Ok(out)
    }

    fn collect(
        &self,
        handle: &EntityHandle,
        site: Option<&str>,
        scopes: &[Option<String>],
        inherited: bool,
        visited: &mut HashSet<String>,
        out: &mut Vec<PermissionExpression>,
    ) -> PermissionResult<()> {
        let is_group = {
            let entity = handle.read();
            let is_group = entity.kind() == EntityKind::Group;
            if is_group && !visited.insert(entity.id().to_string()) {
                return Ok(());
            }

            for scope in scopes {
                // Site-inherited entries answer for the queried site
                let tag = if scope.is_some() { site } else { None };
                for expression in entity.own_permissions(scope.as_deref(), self.now) {
                    if inherited && !expression.inheritable {
                        continue;
                    }
                    out.push(expression.with_site(tag));
                }
            }
            is_group
        };

        // A user's own groups answer for it directly; `#` entries stop one
        // group-to-group step further up
        for parent in self.parents_in(handle, scopes, site)? {
            self.collect(&parent, site, scopes, is_group, visited, out)?;
        }
        Ok(())
    }

    // ========================================================================
    // Options and info
    // ========================================================================

    /// First value `read` yields along the precedence chain
    pub(crate) fn lookup<F>(
        &self,
        handle: &EntityHandle,
        site: Option<&str>,
        read: &F,
    ) -> PermissionResult<Option<String>>
    where
        F: Fn(&PermissibleEntity, Option<&str>) -> Option<String>,
    {
        let scopes = self.scopes(site)?;
        let mut visited = HashSet::new();
        self.lookup_in(handle, site, &scopes, &mut visited, read)
    }

    fn lookup_in<F>(
        &self,
        handle: &EntityHandle,
        site: Option<&str>,
        scopes: &[Option<String>],
        visited: &mut HashSet<String>,
        read: &F,
    ) -> PermissionResult<Option<String>>
    where
        F: Fn(&PermissibleEntity, Option<&str>) -> Option<String>,
    {
        {
            let entity = handle.read();
            if entity.kind() == EntityKind::Group && !visited.insert(entity.id().to_string()) {
                return Ok(None);
            }
            for scope in scopes {
                if let Some(value) = read(&entity, scope.as_deref()) {
                    return Ok(Some(value));
                }
            }
        }

        for parent in self.parents_in(handle, scopes, site)? {
            if let Some(value) = self.lookup_in(&parent, site, scopes, visited, read)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sitegate_engine::{MemoryBackend, PermissionBackend, PermissionsDocument};

    fn registry() -> Registry {
        let backend = MemoryBackend::with_document(PermissionsDocument::seeded(&[
            "site.view".to_string(),
        ]));
        Registry::load(Arc::new(backend)).unwrap()
    }

    fn group(registry: &Registry, name: &str, parents: &[&str]) -> EntityHandle {
        let handle = registry.create(EntityKind::Group, name).unwrap();
        handle
            .write()
            .set_parent_names(parents.iter().map(|p| p.to_string()).collect(), None);
        handle
    }

    #[test]
    fn test_cycle_terminates() {
        let registry = registry();
        let a = group(&registry, "a", &["b"]);
        let b = group(&registry, "b", &["a"]);
        a.write().add_permission("from.a", None);
        b.write().add_permission("from.b", None);

        // Each side already inherits from the other, so neither edge is followed
        let resolver = Resolver::new(&registry, 0);
        let perms = resolver.permissions(&a, None).unwrap();
        let patterns: Vec<_> = perms.iter().map(|p| p.pattern.as_str()).collect();
        assert_eq!(patterns, ["from.a"]);
        assert_eq!(resolver.permissions(&b, None).unwrap().len(), 1);

        let value = resolver
            .lookup(&b, None, &|e: &PermissibleEntity, s: Option<&str>| {
                e.own_option("missing", s).map(str::to_string)
            })
            .unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_non_inheritable_hidden_from_children() {
        let registry = registry();
        let parent = group(&registry, "parent", &[]);
        let child = group(&registry, "child", &["parent"]);
        parent.write().add_permission("#x.y", None);
        parent.write().add_permission("x.z", None);

        let resolver = Resolver::new(&registry, 0);
        let own: Vec<_> = resolver
            .permissions(&parent, None)
            .unwrap()
            .into_iter()
            .map(|p| p.pattern)
            .collect();
        assert_eq!(own, ["x.z", "x.y"]);

        let inherited: Vec<_> = resolver
            .permissions(&child, None)
            .unwrap()
            .into_iter()
            .map(|p| p.pattern)
            .collect();
        assert_eq!(inherited, ["x.z"]);

        let member = registry.create(EntityKind::User, "member").unwrap();
        member.write().set_parent_names(vec!["parent".to_string()], None);
        let direct: Vec<_> = resolver
            .permissions(&member, None)
            .unwrap()
            .into_iter()
            .map(|p| p.pattern)
            .collect();
        assert_eq!(direct, ["x.z", "x.y"]);

        let indirect = registry.create(EntityKind::User, "indirect").unwrap();
        indirect.write().set_parent_names(vec!["child".to_string()], None);
        let patterns: Vec<_> = resolver
            .permissions(&indirect, None)
            .unwrap()
            .into_iter()
            .map(|p| p.pattern)
            .collect();
        assert_eq!(patterns, ["x.z"]);
    }

    #[test]
    fn test_site_chain_order_and_cycle() {
        let registry = registry();
        registry
            .backend
            .set_site_inheritance("shop.example.com", &["example.com".to_string()])
            .unwrap();
        registry
            .backend
            .set_site_inheritance("example.com", &["shop.example.com".to_string()])
            .unwrap();

        let resolver = Resolver::new(&registry, 0);
        assert_eq!(
            resolver.scopes(Some("shop.example.com")).unwrap(),
            vec![
                Some("shop.example.com".to_string()),
                Some("example.com".to_string()),
                None
            ]
        );
    }

    #[test]
    fn test_option_precedence() {
        let registry = registry();
        registry
            .backend
            .set_site_inheritance("shop.example.com", &["example.com".to_string()])
            .unwrap();
        let parent = group(&registry, "parent", &[]);
        let child = group(&registry, "child", &["parent"]);

        parent.write().set_option("color", Some("parent"), Some("shop.example.com"));
        child.write().set_option("color", Some("common"), None);
        let read = |e: &PermissibleEntity, s: Option<&str>| e.own_option("color", s).map(str::to_string);

        let resolver = Resolver::new(&registry, 0);
        let value = resolver.lookup(&child, Some("shop.example.com"), &read).unwrap();
        assert_eq!(value.as_deref(), Some("common"));

        child.write().set_option("color", Some("inherited-site"), Some("example.com"));
        let value = resolver.lookup(&child, Some("shop.example.com"), &read).unwrap();
        assert_eq!(value.as_deref(), Some("inherited-site"));

        child.write().set_option("color", None, Some("example.com"));
        child.write().set_option("color", None, None);
        let value = resolver.lookup(&child, Some("shop.example.com"), &read).unwrap();
        assert_eq!(value.as_deref(), Some("parent"));
    }

    #[test]
    fn test_user_without_groups_gets_default() {
        let registry = registry();
        let user = registry.create(EntityKind::User, "alice").unwrap();

        let resolver = Resolver::new(&registry, 0);
        let parents = resolver.parent_groups(&user, Some("example.com")).unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].read().id(), "default");
    }

    #[test]
    fn test_parents_sorted_by_weight_and_cycles_skipped() {
        let registry = registry();
        let heavy = group(&registry, "heavy", &[]);
        let light = group(&registry, "light", &[]);
        heavy.write().set_option("weight", Some("10"), None);
        light.write().set_option("weight", Some("-5"), None);
        let child = group(&registry, "child", &["heavy", "light", "grandchild"]);
        group(&registry, "grandchild", &["child"]);

        let resolver = Resolver::new(&registry, 0);
        let parents: Vec<String> = resolver
            .parent_groups(&child, None)
            .unwrap()
            .iter()
            .map(|p| p.read().id().to_string())
            .collect();
        assert_eq!(parents, ["light", "heavy"]);
    }

    #[test]
    fn test_unknown_parent_is_an_error() {
        let registry = registry();
        let child = group(&registry, "child", &["ghost"]);
        let resolver = Resolver::new(&registry, 0);
        assert!(resolver.permissions(&child, None).is_err());
    }
}
