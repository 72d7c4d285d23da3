//! Handles to users and groups
//!
//! An [`EntityRef`] pairs an entity with the manager and registry snapshot it
//! was looked up from. It is what callers hold; [`PermissibleGroup`] and
//! [`PermissibleUser`] add kind-specific operations on top and deref to it.
//!
//! Every mutation follows the same path:
//!
//! ```text
//! write lock → apply → save to backend → unlock → invalidate members → fire event
//! ```
//!
//! [`PermissibleGroup`]: super::PermissibleGroup
//! [`PermissibleUser`]: super::PermissibleUser

use std::collections::BTreeMap;
use std::sync::Arc;

use sitegate_engine::TimedPermissionRecord;
use sitegate_sdk::names::{RANK_LADDER_OPTION, RANK_OPTION, WEIGHT_OPTION};
use sitegate_sdk::EntityKind;

use super::entity::PermissibleEntity;
use super::group::PermissibleGroup;
use super::manager::PermissionManager;
use super::registry::{EntityHandle, Registry};
use super::resolve::Resolver;
use super::types::{parse_bool, parse_double, parse_integer, PermissionExpression};
use crate::error::PermissionResult;
use crate::events::{EntityAction, PermissionEvent};

#[derive(Clone)]
pub struct EntityRef<'m> {
    pub(crate) manager: &'m PermissionManager,
    pub(crate) registry: Arc<Registry>,
    pub(crate) handle: EntityHandle,
}

impl<'m> EntityRef<'m> {
    pub(crate) fn new(
        manager: &'m PermissionManager,
        registry: Arc<Registry>,
        handle: EntityHandle,
    ) -> Self {
        Self {
            manager,
            registry,
            handle,
        }
    }

    /// Lowercased identity
    pub fn id(&self) -> String {
        self.handle.read().id().to_string()
    }

    pub fn name(&self) -> String {
        self.handle.read().name().to_string()
    }

    pub fn kind(&self) -> EntityKind {
        self.handle.read().kind()
    }

    /// Copy of the entity's own data
    pub fn snapshot(&self) -> PermissibleEntity {
        self.handle.read().clone()
    }

    pub(crate) fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.registry, self.manager.now())
    }

    pub(crate) fn group_ref(&self, handle: EntityHandle) -> PermissibleGroup<'m> {
        PermissibleGroup::new(EntityRef::new(self.manager, self.registry.clone(), handle))
    }

    /// Apply a change, persist it and invalidate everything derived from it
    pub(crate) fn mutate<R>(
        &self,
        action: EntityAction,
        f: impl FnOnce(&mut PermissibleEntity) -> R,
    ) -> PermissionResult<R> {
        let (result, kind, id, saved) = {
            let mut entity = self.handle.write();
            let result = f(&mut *entity);
            entity.mark_dirty();
            let saved = self
                .registry
                .backend
                .save_entity(entity.kind(), &entity.to_record());
            if saved.is_ok() {
                entity.mark_clean();
            }
            (result, entity.kind(), entity.id().to_string(), saved)
        };

        self.registry.invalidate_members(kind, &id);
        self.manager
            .events()
            .fire(PermissionEvent::EntityChanged { id, kind, action });

        saved?;
        Ok(result)
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    /// Check a permission against this entity, inheritance included
    ///
    /// Like [`PermissionManager::has`], failures are logged and deny.
    pub fn has(&self, permission: &str, site: Option<&str>) -> bool {
        match self
            .manager
            .check(&self.registry, &self.handle, permission, site)
        {
            Ok(granted) => granted,
            Err(e) => {
                tracing::error!("Failed to check '{}' for '{}': {}", permission, self.name(), e);
                false
            }
        }
    }

    /// Every expression that applies for `site`, in match order
    pub fn permissions(&self, site: Option<&str>) -> PermissionResult<Vec<PermissionExpression>> {
        let resolved = self.manager.resolved(&self.registry, &self.handle, site)?;
        Ok(resolved.as_ref().clone())
    }

    /// Live own expressions for exactly one scope, timed ones first
    pub fn own_permissions(&self, site: Option<&str>) -> Vec<PermissionExpression> {
        self.handle.read().own_permissions(site, self.manager.now())
    }

    /// Add a permission ahead of every existing one
    pub fn add_permission(&self, permission: &str, site: Option<&str>) -> PermissionResult<()> {
        self.mutate(EntityAction::Permissions, |e| e.add_permission(permission, site))
    }

    /// Returns `true` if the permission was present
    pub fn remove_permission(&self, permission: &str, site: Option<&str>) -> PermissionResult<bool> {
        self.mutate(EntityAction::Permissions, |e| e.remove_permission(permission, site))
    }

    /// Replace the permissions of one scope; the first entry matches first
    pub fn set_permissions(&self, permissions: &[&str], site: Option<&str>) -> PermissionResult<()> {
        let permissions: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();
        self.mutate(EntityAction::Permissions, |e| e.set_permissions(&permissions, site))
    }

    /// Grant a permission for `lifetime` seconds from now
    pub fn add_timed_permission(
        &self,
        permission: &str,
        site: Option<&str>,
        lifetime: u64,
    ) -> PermissionResult<()> {
        let now = self.manager.now();
        self.mutate(EntityAction::TimedPermission, |e| {
            e.add_timed_permission(permission, site, lifetime, now)
        })
    }

    pub fn remove_timed_permission(
        &self,
        permission: &str,
        site: Option<&str>,
    ) -> PermissionResult<bool> {
        self.mutate(EntityAction::TimedPermission, |e| {
            e.remove_timed_permission(permission, site)
        })
    }

    /// Live timed permissions for exactly one scope
    pub fn timed_permissions(&self, site: Option<&str>) -> Vec<TimedPermissionRecord> {
        let now = self.manager.now();
        self.handle
            .read()
            .timed_permissions(site, now)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Drop expired timed permissions from storage
    pub fn purge_expired(&self) -> PermissionResult<usize> {
        let now = self.manager.now();
        if self.handle.read().expired_count(now) == 0 {
            return Ok(0);
        }
        self.mutate(EntityAction::TimedPermission, |e| e.purge_expired(now))
    }

    // ========================================================================
    // Options
    // ========================================================================

    /// Resolve an option along the precedence chain
    pub fn option(&self, name: &str, site: Option<&str>) -> PermissionResult<Option<String>> {
        self.resolver().lookup(
            &self.handle,
            site,
            &|entity: &PermissibleEntity, scope: Option<&str>| {
                entity.own_option(name, scope).map(str::to_string)
            },
        )
    }

    /// Resolved option, or `default` when absent or unresolvable
    pub fn option_or(&self, name: &str, site: Option<&str>, default: &str) -> String {
        self.option_lenient(name, site)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn option_bool(&self, name: &str, site: Option<&str>, default: bool) -> bool {
        parse_bool(self.option_lenient(name, site).as_deref(), default)
    }

    pub fn option_integer(&self, name: &str, site: Option<&str>, default: i64) -> i64 {
        parse_integer(self.option_lenient(name, site).as_deref(), default)
    }

    pub fn option_double(&self, name: &str, site: Option<&str>, default: f64) -> f64 {
        parse_double(self.option_lenient(name, site).as_deref(), default)
    }

    fn option_lenient(&self, name: &str, site: Option<&str>) -> Option<String> {
        self.option(name, site).unwrap_or_else(|e| {
            tracing::warn!("Failed to resolve option '{}' for '{}': {}", name, self.name(), e);
            None
        })
    }

    /// Option set on this entity for exactly one scope
    pub fn own_option(&self, name: &str, site: Option<&str>) -> Option<String> {
        self.handle.read().own_option(name, site).map(str::to_string)
    }

    /// All own options of one scope
    pub fn options(&self, site: Option<&str>) -> BTreeMap<String, String> {
        self.handle.read().own_options(site)
    }

    /// Set or clear (`None`) an option
    pub fn set_option(&self, name: &str, value: Option<&str>, site: Option<&str>) -> PermissionResult<()> {
        let action = match name {
            WEIGHT_OPTION => EntityAction::Weight,
            RANK_OPTION | RANK_LADDER_OPTION => EntityAction::Rank,
            _ => EntityAction::Options,
        };
        self.mutate(action, |e| e.set_option(name, value, site))
    }

    // ========================================================================
    // Prefix / suffix
    // ========================================================================

    pub fn prefix(&self, site: Option<&str>) -> PermissionResult<Option<String>> {
        self.resolver().lookup(
            &self.handle,
            site,
            &|entity: &PermissibleEntity, scope: Option<&str>| {
                entity.own_prefix(scope).map(str::to_string)
            },
        )
    }

    pub fn suffix(&self, site: Option<&str>) -> PermissionResult<Option<String>> {
        self.resolver().lookup(
            &self.handle,
            site,
            &|entity: &PermissibleEntity, scope: Option<&str>| {
                entity.own_suffix(scope).map(str::to_string)
            },
        )
    }

    pub fn own_prefix(&self, site: Option<&str>) -> Option<String> {
        self.handle.read().own_prefix(site).map(str::to_string)
    }

    pub fn own_suffix(&self, site: Option<&str>) -> Option<String> {
        self.handle.read().own_suffix(site).map(str::to_string)
    }

    pub fn set_prefix(&self, prefix: Option<&str>, site: Option<&str>) -> PermissionResult<()> {
        self.mutate(EntityAction::Info, |e| e.set_prefix(prefix, site))
    }

    pub fn set_suffix(&self, suffix: Option<&str>, site: Option<&str>) -> PermissionResult<()> {
        self.mutate(EntityAction::Info, |e| e.set_suffix(suffix, site))
    }

    // ========================================================================
    // Inheritance
    // ========================================================================

    /// Parent groups for `site`, lightest weight first
    ///
    /// For a user these are its groups, the default group if it has none.
    pub fn parent_groups(&self, site: Option<&str>) -> PermissionResult<Vec<PermissibleGroup<'m>>> {
        Ok(self
            .resolver()
            .parent_groups(&self.handle, site)?
            .into_iter()
            .map(|handle| self.group_ref(handle))
            .collect())
    }

    /// Parent names declared for exactly one scope
    pub fn parent_group_names(&self, site: Option<&str>) -> Vec<String> {
        self.handle.read().parent_names(site).to_vec()
    }

    /// Check if this entity inherits from `group`
    ///
    /// With `check_inheritance` unset only direct parents count.
    pub fn is_child_of(
        &self,
        group: &str,
        site: Option<&str>,
        check_inheritance: bool,
    ) -> PermissionResult<bool> {
        let resolver = self.resolver();
        let scopes = resolver.scopes(site)?;
        resolver.is_child_of(&self.handle, group, &scopes, site, check_inheritance)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Check if the entity has changes its backend has not accepted yet
    pub fn is_dirty(&self) -> bool {
        self.handle.read().is_dirty()
    }

    /// Write the entity to the backend
    pub fn save(&self) -> PermissionResult<()> {
        let (kind, id) = {
            let mut entity = self.handle.write();
            self.registry
                .backend
                .save_entity(entity.kind(), &entity.to_record())?;
            entity.mark_clean();
            (entity.kind(), entity.id().to_string())
        };
        self.manager.events().fire(PermissionEvent::EntityChanged {
            id,
            kind,
            action: EntityAction::Saved,
        });
        Ok(())
    }
}

impl std::fmt::Debug for EntityRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entity = self.handle.read();
        f.debug_struct("EntityRef")
            .field("kind", &entity.kind())
            .field("name", &entity.name())
            .finish()
    }
}
