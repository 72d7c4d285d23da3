//! Cache snapshot the manager resolves against
//!
//! A [`Registry`] binds one backend to the instance caches built from it:
//!
//! ```text
//! ┌───────────────────────── Registry ─────────────────────────┐
//! │  users / groups   DashMap<id, Arc<RwLock<Entity>>>          │
//! │  default_groups   DashMap<site?, group?>      (memo)        │
//! │  site_parents     DashMap<site, [site]>       (memo)        │
//! │  resolved         DashMap<(kind, id, site), [expression]>   │
//! │  tree             PermissionTree              (immutable)   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reloading never clears a registry in place: the manager builds a new one
//! and swaps it in, so a concurrent `has()` sees either the old or the new
//! snapshot in full. Lookups that miss fall through to the backend.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use sitegate_engine::{EntityRecord, PermissionBackend};
use sitegate_sdk::names::same_name;
use sitegate_sdk::EntityKind;

use super::entity::{normalize, PermissibleEntity};
use super::node::PermissionTree;
use super::types::PermissionExpression;
use crate::error::{PermissionError, PermissionResult};

/// Shared, lockable entity instance
pub(crate) type EntityHandle = Arc<RwLock<PermissibleEntity>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: EntityKind,
    id: String,
    site: Option<String>,
}

#[derive(Debug)]
struct CachedPermissions {
    permissions: Arc<Vec<PermissionExpression>>,
    /// Earliest expiry among the timed entries
    valid_until: Option<u64>,
}

pub(crate) struct Registry {
    pub(crate) backend: Arc<dyn PermissionBackend>,
    pub(crate) tree: PermissionTree,
    users: DashMap<String, EntityHandle>,
    groups: DashMap<String, EntityHandle>,
    default_groups: DashMap<Option<String>, Option<String>>,
    site_parents: DashMap<String, Vec<String>>,
    resolved: DashMap<CacheKey, CachedPermissions>,
    /// Bumped by every invalidation; guards against caching stale results
    epoch: RwLock<u64>,
}

impl Registry {
    /// Build a snapshot from the backend's current data
    ///
    /// Groups and the node tree are loaded eagerly; users on first lookup.
    pub(crate) fn load(backend: Arc<dyn PermissionBackend>) -> PermissionResult<Self> {
        let tree = PermissionTree::from_records(&backend.load_permission_tree()?);
        let registry = Self {
            backend,
            tree,
            users: DashMap::new(),
            groups: DashMap::new(),
            default_groups: DashMap::new(),
            site_parents: DashMap::new(),
            resolved: DashMap::new(),
            epoch: RwLock::new(0),
        };

        for record in registry.backend.groups()? {
            registry.insert(EntityKind::Group, record);
        }

        tracing::debug!(
            "Loaded {} groups and {} permission nodes from '{}' backend",
            registry.groups.len(),
            registry.tree.len(),
            registry.backend.name()
        );
        Ok(registry)
    }

    fn map(&self, kind: EntityKind) -> &DashMap<String, EntityHandle> {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Group => &self.groups,
        }
    }

    fn insert(&self, kind: EntityKind, record: EntityRecord) -> EntityHandle {
        let entity = PermissibleEntity::from_record(kind, record);
        self.map(kind)
            .entry(entity.id().to_string())
            .or_insert_with(|| Arc::new(RwLock::new(entity)))
            .value()
            .clone()
    }

    // ========================================================================
    // Instance cache
    // ========================================================================

    /// Cached instance, loading from the backend on a miss
    pub(crate) fn lookup(&self, kind: EntityKind, name: &str) -> PermissionResult<Option<EntityHandle>> {
        let id = normalize(name);
        if let Some(handle) = self.map(kind).get(&id) {
            return Ok(Some(handle.value().clone()));
        }

        let record = match kind {
            EntityKind::User => self.backend.entity(&id)?,
            EntityKind::Group => self.backend.group(&id)?,
        };
        Ok(record.map(|record| self.insert(kind, record)))
    }

    /// Group by name; an unknown name is an inconsistent dataset
    pub(crate) fn group(&self, name: &str) -> PermissionResult<EntityHandle> {
        self.lookup(EntityKind::Group, name)?
            .ok_or_else(|| PermissionError::UnknownGroup(name.trim().to_string()))
    }

    /// Create and persist a new entity
    pub(crate) fn create(&self, kind: EntityKind, name: &str) -> PermissionResult<EntityHandle> {
        let name = name.trim();
        if self.lookup(kind, name)?.is_some() {
            return Err(PermissionError::AlreadyExists(format!("{kind} '{name}'")));
        }

        let record = EntityRecord::new(name);
        self.backend.save_entity(kind, &record)?;
        tracing::debug!("Created {} '{}'", kind, name);
        Ok(self.insert(kind, record))
    }

    /// Every entity of a kind the backend or the cache knows about
    pub(crate) fn all(&self, kind: EntityKind) -> PermissionResult<Vec<EntityHandle>> {
        let records = match kind {
            EntityKind::User => self.backend.entities()?,
            EntityKind::Group => self.backend.groups()?,
        };

        let mut handles: Vec<EntityHandle> = records
            .into_iter()
            .map(|record| self.insert(kind, record))
            .collect();

        // Entities created in memory whose save failed are still live
        let known: HashSet<String> = handles.iter().map(|h| h.read().id().to_string()).collect();
        for entry in self.map(kind).iter() {
            if !known.contains(entry.key()) {
                handles.push(entry.value().clone());
            }
        }

        handles.sort_by(|a, b| a.read().id().cmp(b.read().id()));
        Ok(handles)
    }

    /// Cached instances only, without touching the backend
    pub(crate) fn cached(&self) -> Vec<EntityHandle> {
        self.users
            .iter()
            .chain(self.groups.iter())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drop one instance so the next lookup re-reads it
    pub(crate) fn evict(&self, kind: EntityKind, name: &str) -> bool {
        let removed = self.map(kind).remove(&normalize(name)).is_some();
        self.invalidate_all();
        removed
    }

    // ========================================================================
    // Scope memos
    // ========================================================================

    /// Default group name for a site, falling back to the common default
    pub(crate) fn default_group_name(&self, site: Option<&str>) -> PermissionResult<Option<String>> {
        let key = site.map(str::to_string);
        if let Some(memo) = self.default_groups.get(&key) {
            return Ok(memo.value().clone());
        }

        let mut name = self.backend.default_group(site)?;
        if name.is_none() && site.is_some() {
            name = self.default_group_name(None)?;
        }
        self.default_groups.insert(key, name.clone());
        Ok(name)
    }

    /// Check if `id` is the memoised default of any scope
    fn is_memoised_default(&self, id: &str) -> bool {
        self.default_groups
            .iter()
            .any(|entry| entry.value().as_deref().is_some_and(|name| same_name(name, id)))
    }

    pub(crate) fn clear_default_groups(&self) {
        self.default_groups.clear();
    }

    /// Sites `site` inherits from directly
    pub(crate) fn site_parents(&self, site: &str) -> PermissionResult<Vec<String>> {
        if let Some(memo) = self.site_parents.get(site) {
            return Ok(memo.value().clone());
        }
        let parents = self.backend.site_inheritance(site)?;
        self.site_parents.insert(site.to_string(), parents.clone());
        Ok(parents)
    }

    pub(crate) fn clear_site_parents(&self) {
        self.site_parents.clear();
    }

    // ========================================================================
    // Resolution cache
    // ========================================================================

    /// Current invalidation epoch, read before resolving
    pub(crate) fn epoch(&self) -> u64 {
        *self.epoch.read()
    }

    pub(crate) fn cached_permissions(
        &self,
        kind: EntityKind,
        id: &str,
        site: Option<&str>,
        now: u64,
    ) -> Option<Arc<Vec<PermissionExpression>>> {
        let key = CacheKey {
            kind,
            id: id.to_string(),
            site: site.map(str::to_string),
        };
        let entry = self.resolved.get(&key)?;
        if entry.valid_until.is_some_and(|until| until <= now) {
            drop(entry);
            self.resolved.remove(&key);
            return None;
        }
        Some(entry.permissions.clone())
    }

    /// Store a resolution unless something was invalidated since `epoch`
    pub(crate) fn store_permissions(
        &self,
        kind: EntityKind,
        id: &str,
        site: Option<&str>,
        epoch: u64,
        permissions: Arc<Vec<PermissionExpression>>,
    ) {
        let valid_until = permissions.iter().filter_map(|p| p.expires_at).min();
        let current = self.epoch.read();
        if *current != epoch {
            return;
        }
        self.resolved.insert(
            CacheKey {
                kind,
                id: id.to_string(),
                site: site.map(str::to_string),
            },
            CachedPermissions {
                permissions,
                valid_until,
            },
        );
    }

    pub(crate) fn invalidate_all(&self) {
        let mut epoch = self.epoch.write();
        *epoch += 1;
        self.resolved.clear();
    }

    /// Invalidate an entity and everything that inherits from it
    ///
    /// Membership is taken from parent edges in every scope. Changes to a
    /// default group reach users implicitly, so they clear everything.
    pub(crate) fn invalidate_members(&self, kind: EntityKind, id: &str) {
        if kind == EntityKind::Group && self.is_memoised_default(id) {
            self.invalidate_all();
            return;
        }

        let mut affected: HashSet<(EntityKind, String)> = HashSet::new();
        affected.insert((kind, id.to_string()));

        if kind == EntityKind::Group {
            let entities = self.cached();
            let mut frontier: HashSet<String> = HashSet::from([id.to_string()]);
            while !frontier.is_empty() {
                let mut next = HashSet::new();
                for handle in &entities {
                    let entity = handle.read();
                    let key = (entity.kind(), entity.id().to_string());
                    if affected.contains(&key) {
                        continue;
                    }
                    if entity
                        .all_parent_names()
                        .any(|parent| frontier.contains(&normalize(parent)))
                    {
                        if entity.kind() == EntityKind::Group {
                            next.insert(entity.id().to_string());
                        }
                        affected.insert(key);
                    }
                }
                frontier = next;
            }
        }

        let mut epoch = self.epoch.write();
        *epoch += 1;
        self.resolved
            .retain(|key, _| !affected.contains(&(key.kind, key.id.clone())));
        tracing::debug!("Invalidated resolution cache for {} entities", affected.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegate_engine::{MemoryBackend, PermissionsDocument};

    fn registry() -> Registry {
        let backend = MemoryBackend::with_document(PermissionsDocument::seeded(&[
            "site.view".to_string(),
        ]));
        Registry::load(Arc::new(backend)).unwrap()
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_lazy() {
        let registry = registry();
        assert!(registry.lookup(EntityKind::Group, "DEFAULT").unwrap().is_some());
        assert!(registry.lookup(EntityKind::User, "alice").unwrap().is_none());

        registry.create(EntityKind::User, "Alice").unwrap();
        let handle = registry.lookup(EntityKind::User, "alice").unwrap().unwrap();
        assert_eq!(handle.read().name(), "Alice");

        let err = registry.create(EntityKind::User, "ALICE").unwrap_err();
        assert!(matches!(err, PermissionError::AlreadyExists(_)));
    }

    #[test]
    fn test_unknown_group_is_an_error() {
        let registry = registry();
        assert!(matches!(
            registry.group("ghost"),
            Err(PermissionError::UnknownGroup(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_default_group_falls_back_to_common() {
        let registry = registry();
        assert_eq!(
            registry.default_group_name(Some("example.com")).unwrap(),
            Some("default".to_string())
        );
    }

    #[test]
    fn test_store_is_skipped_after_invalidation() {
        let registry = registry();
        let permissions = Arc::new(vec![PermissionExpression::parse("a")]);

        let epoch = registry.epoch();
        registry.invalidate_all();
        registry.store_permissions(EntityKind::User, "u", None, epoch, permissions.clone());
        assert!(registry.cached_permissions(EntityKind::User, "u", None, 0).is_none());

        let epoch = registry.epoch();
        registry.store_permissions(EntityKind::User, "u", None, epoch, permissions);
        assert!(registry.cached_permissions(EntityKind::User, "u", None, 0).is_some());
    }

    #[test]
    fn test_cached_entry_expires_with_timed_permission() {
        let registry = registry();
        let permissions = Arc::new(vec![PermissionExpression::parse("p").with_expiry(50)]);
        registry.store_permissions(EntityKind::User, "u", None, registry.epoch(), permissions);

        assert!(registry.cached_permissions(EntityKind::User, "u", None, 49).is_some());
        assert!(registry.cached_permissions(EntityKind::User, "u", None, 50).is_none());
    }

    #[test]
    fn test_invalidate_members_reaches_descendants() {
        let registry = registry();
        let parent = registry.create(EntityKind::Group, "parent").unwrap();
        let child = registry.create(EntityKind::Group, "child").unwrap();
        let user = registry.create(EntityKind::User, "user").unwrap();
        let other = registry.create(EntityKind::User, "other").unwrap();
        child.write().set_parent_names(vec!["Parent".to_string()], None);
        user.write().set_parent_names(vec!["child".to_string()], Some("example.com"));
        other.write().set_parent_names(vec!["default".to_string()], None);
        drop(parent);

        let list = Arc::new(Vec::new());
        for (kind, id) in [
            (EntityKind::Group, "child"),
            (EntityKind::User, "user"),
            (EntityKind::User, "other"),
        ] {
            registry.store_permissions(kind, id, None, registry.epoch(), list.clone());
        }

        registry.invalidate_members(EntityKind::Group, "parent");

        assert!(registry.cached_permissions(EntityKind::Group, "child", None, 0).is_none());
        assert!(registry.cached_permissions(EntityKind::User, "user", None, 0).is_none());
        assert!(registry.cached_permissions(EntityKind::User, "other", None, 0).is_some());
    }
}
