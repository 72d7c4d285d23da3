//! User handle: group membership and rank ladders
//!
//! A user's parent edges are its group memberships. A user with no
//! membership for a scope implicitly belongs to that scope's default group.

use std::collections::HashSet;
use std::ops::Deref;

use sitegate_sdk::names::same_name;

use super::entity::normalize;
use super::group::PermissibleGroup;
use super::permissible::EntityRef;
use crate::error::{PermissionError, PermissionResult};
use crate::events::EntityAction;

/// A user looked up through a [`PermissionManager`](super::PermissionManager)
#[derive(Clone, Debug)]
pub struct PermissibleUser<'m>(EntityRef<'m>);

impl<'m> Deref for PermissibleUser<'m> {
    type Target = EntityRef<'m>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'m> PermissibleUser<'m> {
    pub(crate) fn new(inner: EntityRef<'m>) -> Self {
        Self(inner)
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Groups for `site`, the default group when there are none
    pub fn groups(&self, site: Option<&str>) -> PermissionResult<Vec<PermissibleGroup<'m>>> {
        self.parent_groups(site)
    }

    pub fn group_names(&self, site: Option<&str>) -> PermissionResult<Vec<String>> {
        Ok(self.groups(site)?.iter().map(|group| group.name()).collect())
    }

    /// Add a membership for one scope
    pub fn add_group(&self, group: &str, site: Option<&str>) -> PermissionResult<()> {
        let name = self.registry.group(group)?.read().name().to_string();
        self.mutate(EntityAction::Inheritance, |e| {
            let mut parents = e.parent_names(site).to_vec();
            if !parents.iter().any(|p| same_name(p, &name)) {
                parents.push(name);
            }
            e.set_parent_names(parents, site);
        })
    }

    /// Returns `true` if the user was a member
    pub fn remove_group(&self, group: &str, site: Option<&str>) -> PermissionResult<bool> {
        self.mutate(EntityAction::Inheritance, |e| {
            let mut parents = e.parent_names(site).to_vec();
            let before = parents.len();
            parents.retain(|p| !same_name(p, group));
            let removed = parents.len() != before;
            e.set_parent_names(parents, site);
            removed
        })
    }

    /// Replace the memberships of one scope
    pub fn set_groups(&self, groups: &[&str], site: Option<&str>) -> PermissionResult<()> {
        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(groups.len());
        for group in groups {
            let handle = self.registry.group(group)?;
            let entity = handle.read();
            if seen.insert(entity.id().to_string()) {
                names.push(entity.name().to_string());
            }
        }
        self.mutate(EntityAction::Inheritance, |e| e.set_parent_names(names, site))
    }

    /// Check membership, optionally through group inheritance
    pub fn in_group(
        &self,
        group: &str,
        site: Option<&str>,
        check_inheritance: bool,
    ) -> PermissionResult<bool> {
        self.is_child_of(group, site, check_inheritance)
    }

    // ========================================================================
    // Ranking
    // ========================================================================

    /// Highest-ranked common group of this user on `ladder`
    pub fn ladder_group(&self, ladder: &str) -> PermissionResult<Option<PermissibleGroup<'m>>> {
        Ok(self
            .groups(None)?
            .into_iter()
            .filter(|group| group.is_ranked() && same_name(&group.rank_ladder(), ladder))
            .min_by_key(|group| group.rank()))
    }

    /// Rank on `ladder`; 0 when the user is not on it
    pub fn rank(&self, ladder: &str) -> PermissionResult<i32> {
        Ok(self
            .ladder_group(ladder)?
            .map(|group| group.rank())
            .unwrap_or(0))
    }

    /// Move the user one step up `ladder`
    ///
    /// With a `promoter`, the promoter must be on the same ladder and rank
    /// strictly above both the user's current and new rank.
    #[tracing::instrument(skip(self, promoter), fields(user = %self.name()))]
    pub fn promote(
        &self,
        promoter: Option<&PermissibleUser<'_>>,
        ladder: &str,
    ) -> PermissionResult<PermissibleGroup<'m>> {
        let current = self
            .ladder_group(ladder)?
            .ok_or_else(|| self.ranking("User is not in the ladder", promoter))?;
        let rank = current.rank();

        let target = self
            .manager
            .rank_ladder(ladder)?
            .into_iter()
            .rev()
            .find(|(candidate, _)| *candidate < rank)
            .map(|(_, group)| group)
            .ok_or_else(|| self.ranking("User is already at the top of the ladder", promoter))?;

        self.check_promoter(promoter, ladder, rank, target.rank())?;
        self.swap_group(&current, &target)?;
        tracing::info!("Promoted from '{}' to '{}'", current.name(), target.name());
        Ok(target)
    }

    /// Move the user one step down `ladder`
    #[tracing::instrument(skip(self, promoter), fields(user = %self.name()))]
    pub fn demote(
        &self,
        promoter: Option<&PermissibleUser<'_>>,
        ladder: &str,
    ) -> PermissionResult<PermissibleGroup<'m>> {
        let current = self
            .ladder_group(ladder)?
            .ok_or_else(|| self.ranking("User is not in the ladder", promoter))?;
        let rank = current.rank();

        let target = self
            .manager
            .rank_ladder(ladder)?
            .into_iter()
            .find(|(candidate, _)| *candidate > rank)
            .map(|(_, group)| group)
            .ok_or_else(|| self.ranking("User is already at the bottom of the ladder", promoter))?;

        self.check_promoter(promoter, ladder, rank, target.rank())?;
        self.swap_group(&current, &target)?;
        tracing::info!("Demoted from '{}' to '{}'", current.name(), target.name());
        Ok(target)
    }

    fn check_promoter(
        &self,
        promoter: Option<&PermissibleUser<'_>>,
        ladder: &str,
        rank: i32,
        new_rank: i32,
    ) -> PermissionResult<()> {
        let Some(promoter) = promoter else {
            return Ok(());
        };

        let promoter_rank = promoter.rank(ladder)?;
        if promoter_rank == 0 {
            return Err(self.ranking("Promoter is not in the ladder", Some(promoter)));
        }
        if promoter_rank >= rank {
            return Err(self.ranking(
                "Promoter doesn't have a high enough rank to change this user's rank",
                Some(promoter),
            ));
        }
        if new_rank <= promoter_rank {
            return Err(self.ranking(
                "Promoter can't move a user to their own rank or above",
                Some(promoter),
            ));
        }
        Ok(())
    }

    /// Replace `from` with `to` in the common memberships, keeping its position
    fn swap_group(&self, from: &PermissibleGroup<'_>, to: &PermissibleGroup<'_>) -> PermissionResult<()> {
        let from = from.id();
        let to = to.name();
        self.mutate(EntityAction::Rank, |e| {
            let mut parents = e.parent_names(None).to_vec();
            parents.retain(|p| !same_name(p, &to));
            match parents.iter().position(|p| normalize(p) == from) {
                Some(index) => parents[index] = to,
                None => parents.insert(0, to),
            }
            e.set_parent_names(parents, None);
        })
    }

    fn ranking(&self, message: &str, promoter: Option<&PermissibleUser<'_>>) -> PermissionError {
        PermissionError::Ranking {
            message: message.to_string(),
            target: self.name(),
            promoter: promoter.map(|p| p.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::PermissionError;
    use crate::permissions::testing::manager;
    use crate::permissions::PermissionManager;

    fn ladder(manager: &PermissionManager) {
        for (name, rank) in [("owner", 1), ("admin", 10), ("mod", 20), ("member", 30)] {
            let group = manager.create_group(name).unwrap();
            group.set_rank(rank).unwrap();
        }
    }

    #[test]
    fn test_membership() {
        let (manager, _) = manager();
        manager.create_group("staff").unwrap();
        let user = manager.create_entity("alice").unwrap();

        assert_eq!(user.group_names(None).unwrap(), ["default"]);
        assert!(user.in_group("default", None, false).unwrap());

        user.add_group("STAFF", None).unwrap();
        user.add_group("staff", None).unwrap();
        assert_eq!(user.parent_group_names(None), ["staff"]);
        assert!(!user.in_group("default", None, false).unwrap());

        assert!(user.remove_group("Staff", None).unwrap());
        assert!(!user.remove_group("staff", None).unwrap());
        assert!(user.add_group("ghost", None).is_err());
    }

    #[test]
    fn test_in_group_through_inheritance() {
        let (manager, _) = manager();
        let staff = manager.create_group("staff").unwrap();
        staff.set_parent_groups(&["default"], None).unwrap();
        let user = manager.create_entity("alice").unwrap();
        user.set_groups(&["staff"], Some("example.com")).unwrap();

        assert!(user.in_group("staff", Some("example.com"), false).unwrap());
        assert!(!user.in_group("default", Some("example.com"), false).unwrap());
        assert!(user.in_group("default", Some("example.com"), true).unwrap());
        assert!(!user.in_group("staff", None, true).unwrap());
    }

    #[test]
    fn test_promote_and_demote() {
        let (manager, _) = manager();
        ladder(&manager);
        let user = manager.create_entity("alice").unwrap();
        user.set_groups(&["member"], None).unwrap();

        let group = user.promote(None, "default").unwrap();
        assert_eq!(group.id(), "mod");
        assert_eq!(user.parent_group_names(None), ["mod"]);
        assert_eq!(user.rank("default").unwrap(), 20);

        user.demote(None, "default").unwrap();
        let err = user.demote(None, "default").unwrap_err();
        assert!(matches!(err, PermissionError::Ranking { .. }));
        assert_eq!(user.rank("default").unwrap(), 30);
    }

    #[test]
    fn test_promoter_rules() {
        let (manager, _) = manager();
        ladder(&manager);
        let target = manager.create_entity("target").unwrap();
        target.set_groups(&["member"], None).unwrap();
        let moderator = manager.create_entity("moderator").unwrap();
        moderator.set_groups(&["mod"], None).unwrap();
        let admin = manager.create_entity("admin").unwrap();
        admin.set_groups(&["admin"], None).unwrap();
        let outsider = manager.create_entity("outsider").unwrap();

        // mod (20) cannot lift member (30) to its own rank
        let err = target.promote(Some(&moderator), "default").unwrap_err();
        match err {
            PermissionError::Ranking { promoter, target, .. } => {
                assert_eq!(promoter.as_deref(), Some("moderator"));
                assert_eq!(target, "target");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(target.promote(Some(&outsider), "default").is_err());
        assert_eq!(target.promote(Some(&admin), "default").unwrap().id(), "mod");
        assert!(target.promote(Some(&admin), "default").is_err());
        assert!(moderator.promote(None, "other-ladder").is_err());
    }
}
