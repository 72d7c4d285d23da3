//! Group handle: inheritance edges, ordering and removal

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

use sitegate_sdk::names::{RANK_LADDER_OPTION, RANK_OPTION, WEIGHT_OPTION};
use sitegate_sdk::EntityKind;

use super::entity::normalize;
use super::permissible::EntityRef;
use super::user::PermissibleUser;
use crate::error::{PermissionError, PermissionResult};
use crate::events::{EntityAction, PermissionEvent};

/// A group looked up through a [`PermissionManager`](super::PermissionManager)
#[derive(Clone, Debug)]
pub struct PermissibleGroup<'m>(EntityRef<'m>);

impl<'m> Deref for PermissibleGroup<'m> {
    type Target = EntityRef<'m>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'m> PermissibleGroup<'m> {
    pub(crate) fn new(inner: EntityRef<'m>) -> Self {
        Self(inner)
    }

    // ========================================================================
    // Inheritance
    // ========================================================================

    /// Replace the parent groups of one scope
    ///
    /// Empty names and self-references are dropped. A parent that already
    /// inherits from this group is skipped with a warning, or rejected with
    /// [`PermissionError::CyclicInheritance`] under `strict_inheritance`.
    #[tracing::instrument(skip(self), fields(group = %self.name()))]
    pub fn set_parent_groups(&self, names: &[&str], site: Option<&str>) -> PermissionResult<()> {
        let id = self.id();
        let strict = self.manager.config().strict_inheritance;
        let resolver = self.resolver();

        let mut seen = HashSet::new();
        let mut accepted = Vec::with_capacity(names.len());
        for name in names {
            let name = name.trim();
            if name.is_empty() || normalize(name) == id {
                tracing::debug!("Ignoring parent '{}'", name);
                continue;
            }

            let parent = self.registry.group(name)?;
            let parent_name = parent.read().name().to_string();
            if resolver.is_child_of_anywhere(&parent, &id)? {
                if strict {
                    return Err(PermissionError::CyclicInheritance {
                        group: self.name(),
                        parent: parent_name,
                    });
                }
                tracing::warn!(
                    "Group '{}' already inherits from '{}', not adding it as a parent",
                    parent_name,
                    self.name()
                );
                continue;
            }

            if seen.insert(normalize(name)) {
                accepted.push(parent_name);
            }
        }

        self.mutate(EntityAction::Inheritance, |e| e.set_parent_names(accepted, site))
    }

    /// Groups that name this group as a direct parent for `site`
    pub fn child_groups(&self, site: Option<&str>) -> PermissionResult<Vec<PermissibleGroup<'m>>> {
        Ok(self
            .resolver()
            .direct_members(EntityKind::Group, &self.id(), site)?
            .into_iter()
            .map(|handle| self.group_ref(handle))
            .collect())
    }

    /// Every group inheriting from this one for `site`, breadth first
    pub fn descendant_groups(&self, site: Option<&str>) -> PermissionResult<Vec<PermissibleGroup<'m>>> {
        let mut visited = HashSet::from([self.id()]);
        let mut out = Vec::new();
        let mut frontier = vec![self.clone()];

        while let Some(group) = frontier.pop() {
            for child in group.child_groups(site)? {
                if visited.insert(child.id()) {
                    frontier.insert(0, child.clone());
                    out.push(child);
                }
            }
        }
        Ok(out)
    }

    /// Users that are direct members for `site`, implicit default members included
    pub fn users(&self, site: Option<&str>) -> PermissionResult<Vec<PermissibleUser<'m>>> {
        Ok(self
            .resolver()
            .direct_members(EntityKind::User, &self.id(), site)?
            .into_iter()
            .map(|handle| {
                PermissibleUser::new(EntityRef::new(self.manager, self.registry.clone(), handle))
            })
            .collect())
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    pub fn weight(&self) -> i32 {
        self.handle.read().weight()
    }

    pub fn set_weight(&self, weight: i32) -> PermissionResult<()> {
        self.set_option(WEIGHT_OPTION, Some(&weight.to_string()), None)
    }

    /// Position on the rank ladder (smaller is higher); 0 when unranked
    pub fn rank(&self) -> i32 {
        self.handle.read().rank()
    }

    /// Set the rank; 0 removes the group from its ladder
    pub fn set_rank(&self, rank: i32) -> PermissionResult<()> {
        let value = (rank > 0).then(|| rank.to_string());
        self.set_option(RANK_OPTION, value.as_deref(), None)
    }

    pub fn rank_ladder(&self) -> String {
        self.handle.read().rank_ladder().to_string()
    }

    pub fn set_rank_ladder(&self, ladder: &str) -> PermissionResult<()> {
        let ladder = ladder.trim();
        let value = (!ladder.is_empty()).then_some(ladder);
        self.set_option(RANK_LADDER_OPTION, value, None)
    }

    pub fn is_ranked(&self) -> bool {
        self.handle.read().is_ranked()
    }

    /// Check if this group is flagged default for exactly one scope
    pub fn is_default(&self, site: Option<&str>) -> bool {
        self.handle.read().is_default(site)
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Delete the group
    ///
    /// The group is first pruned from the parent edges of every other group
    /// and every user, in every scope, so no dangling reference survives.
    #[tracing::instrument(skip(self), fields(group = %self.name()))]
    pub fn remove(self) -> PermissionResult<()> {
        let id = self.id();
        let name = self.name();

        {
            let _admin = self.manager.admin.lock();

            for kind in [EntityKind::Group, EntityKind::User] {
                for handle in self.registry.all(kind)? {
                    if Arc::ptr_eq(&handle, &self.handle) {
                        continue;
                    }
                    let mut entity = handle.write();
                    if entity.remove_parent_everywhere(&id) {
                        entity.mark_dirty();
                        self.registry
                            .backend
                            .save_entity(entity.kind(), &entity.to_record())?;
                        entity.mark_clean();
                        tracing::debug!("Removed '{}' from the parents of '{}'", name, entity.name());
                    }
                }
            }

            self.registry.backend.remove_entity(EntityKind::Group, &name)?;
            self.registry.evict(EntityKind::Group, &id);
            self.registry.clear_default_groups();
        }

        tracing::info!("Removed group '{}'", name);
        self.manager.events().fire(PermissionEvent::EntityChanged {
            id,
            kind: EntityKind::Group,
            action: EntityAction::Removed,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::PermissionError;
    use crate::events::EntityAction;
    use crate::permissions::testing::manager;

    #[test]
    fn test_set_parent_groups_skips_self_and_cycles() {
        let (manager, _) = manager();
        let a = manager.create_group("a").unwrap();
        let b = manager.create_group("b").unwrap();
        b.set_parent_groups(&["a"], None).unwrap();

        a.set_parent_groups(&["A", "b", "default", " "], None).unwrap();
        assert_eq!(a.parent_group_names(None), vec!["default".to_string()]);

        let err = manager.group("ghost");
        assert!(matches!(err, Err(PermissionError::UnknownGroup(_))));
        assert!(a.set_parent_groups(&["ghost"], None).is_err());
    }

    #[test]
    fn test_strict_inheritance_rejects_cycles() {
        let (manager, _) = manager();
        let mut config = manager.config();
        config.strict_inheritance = true;
        manager.set_config(config);

        let a = manager.create_group("a").unwrap();
        let b = manager.create_group("b").unwrap();
        b.set_parent_groups(&["a"], None).unwrap();

        let err = a.set_parent_groups(&["b"], None).unwrap_err();
        assert!(matches!(err, PermissionError::CyclicInheritance { .. }));
    }

    #[test]
    fn test_children_and_descendants() {
        let (manager, _) = manager();
        let root = manager.create_group("root").unwrap();
        let mid = manager.create_group("mid").unwrap();
        let leaf = manager.create_group("leaf").unwrap();
        mid.set_parent_groups(&["root"], None).unwrap();
        leaf.set_parent_groups(&["mid"], Some("example.com")).unwrap();

        let children: Vec<String> = root.child_groups(None).unwrap().iter().map(|g| g.id()).collect();
        assert_eq!(children, ["mid"]);

        let common: Vec<String> = root.descendant_groups(None).unwrap().iter().map(|g| g.id()).collect();
        assert_eq!(common, ["mid"]);

        let site: Vec<String> = root
            .descendant_groups(Some("example.com"))
            .unwrap()
            .iter()
            .map(|g| g.id())
            .collect();
        assert_eq!(site, ["mid", "leaf"]);
    }

    #[test]
    fn test_users_include_implicit_default_members() {
        let (manager, _) = manager();
        manager.create_entity("alice").unwrap();
        let bob = manager.create_entity("bob").unwrap();
        manager.create_group("staff").unwrap();
        bob.add_group("staff", None).unwrap();

        let default = manager.default_group(None).unwrap();
        let names: Vec<String> = default.users(None).unwrap().iter().map(|u| u.id()).collect();
        assert_eq!(names, ["alice"]);
    }

    #[test]
    fn test_weight_and_rank() {
        let (manager, _) = manager();
        let group = manager.create_group("vip").unwrap();
        group.set_weight(20).unwrap();
        group.set_rank(100).unwrap();
        group.set_rank_ladder("donors").unwrap();

        assert_eq!(group.weight(), 20);
        assert!(group.is_ranked());
        assert_eq!(group.rank(), 100);
        assert_eq!(group.rank_ladder(), "donors");

        group.set_rank(0).unwrap();
        group.set_rank_ladder("").unwrap();
        assert!(!group.is_ranked());
        assert_eq!(group.rank_ladder(), "default");
    }

    #[test]
    fn test_remove_leaves_no_dangling_edges() {
        let (manager, _) = manager();
        let a = manager.create_group("a").unwrap();
        let b = manager.create_group("b").unwrap();
        let c = manager.create_group("c").unwrap();
        let user = manager.create_entity("user").unwrap();

        // b inherits from a everywhere and a from b on one site; c inherits from b
        b.set_parent_groups(&["a"], None).unwrap();
        a.mutate(EntityAction::Inheritance, |e| {
            e.set_parent_names(vec!["b".to_string()], Some("example.com"))
        })
        .unwrap();
        c.set_parent_groups(&["b", "default"], None).unwrap();
        user.set_groups(&["b"], Some("example.com")).unwrap();

        b.remove().unwrap();

        assert!(matches!(manager.group("b"), Err(PermissionError::UnknownGroup(_))));
        for group in manager.groups().unwrap() {
            let snapshot = group.snapshot();
            assert!(snapshot.all_parent_names().all(|p| p != "b"), "{} still names b", group.id());
        }
        assert!(user.parent_group_names(Some("example.com")).is_empty());
        assert!(manager.has("user", "site.view", Some("example.com")));
    }
}
