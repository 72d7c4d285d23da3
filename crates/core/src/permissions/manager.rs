//! Process-wide permission manager
//!
//! The manager owns the backend binding, the current registry snapshot and
//! the event bus. Callers pass it by reference; there is no global instance.
//!
//! # Example
//!
//! ```ignore
//! use sitegate_core::{PermissionManager, PermissionsConfig};
//!
//! let manager = PermissionManager::new(PermissionsConfig::load_default()?)?;
//!
//! let admin = manager.create_group("admin")?;
//! admin.add_permission("site.manage", None)?;
//! admin.set_parent_groups(&["default"], None)?;
//!
//! let alice = manager.entity_or_create("alice")?;
//! alice.add_group("admin", None)?;
//!
//! assert!(manager.has("alice", "site.manage", Some("example.com")));
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sitegate_engine::PermissionBackend;
use sitegate_sdk::names::{same_name, OP_OPTION};
use sitegate_sdk::EntityKind;

use super::group::PermissibleGroup;
use super::matcher::{self, PermissionMatcher, RegexMatcher};
use super::permissible::EntityRef;
use super::registry::{EntityHandle, Registry};
use super::resolve::Resolver;
use super::types::{parse_bool, Decision, PermissionExpression};
use super::user::PermissibleUser;
use crate::backends::BackendRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::PermissionsConfig;
use crate::error::{PermissionError, PermissionResult};
use crate::events::{EntityAction, EventBus, PermissionEvent};

pub struct PermissionManager {
    registry: RwLock<Arc<Registry>>,
    /// Serializes snapshot swaps and structural edits
    pub(crate) admin: Mutex<()>,
    backends: BackendRegistry,
    config: RwLock<PermissionsConfig>,
    matcher: RwLock<Arc<dyn PermissionMatcher>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    debug: AtomicBool,
}

impl PermissionManager {
    /// Create a manager using the backend named in `config`
    pub fn new(config: PermissionsConfig) -> PermissionResult<Self> {
        let backends = BackendRegistry::new();
        let backend = backends.create(&config.backend, &config)?;
        Self::build(backend, backends, config)
    }

    /// Create a manager bound to an already constructed backend
    pub fn with_backend(
        backend: Arc<dyn PermissionBackend>,
        config: PermissionsConfig,
    ) -> PermissionResult<Self> {
        Self::build(backend, BackendRegistry::new(), config)
    }

    /// Load the config file at `path` (creating it if missing) and build from it
    pub fn from_config_file(path: &Path) -> PermissionResult<Self> {
        Self::new(PermissionsConfig::load(path)?)
    }

    /// Replace the time source used for timed permissions
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.registry().invalidate_all();
        self
    }

    #[tracing::instrument(skip_all, fields(backend = backend.name()))]
    fn build(
        backend: Arc<dyn PermissionBackend>,
        backends: BackendRegistry,
        config: PermissionsConfig,
    ) -> PermissionResult<Self> {
        backend.initialize()?;
        let registry = Registry::load(backend)?;
        if config.debug {
            registry.tree.debug_dump();
        }

        tracing::info!("Permission manager ready");
        Ok(Self {
            registry: RwLock::new(Arc::new(registry)),
            admin: Mutex::new(()),
            backends,
            debug: AtomicBool::new(config.debug),
            config: RwLock::new(config),
            matcher: RwLock::new(Arc::new(RegexMatcher::new())),
            clock: Arc::new(SystemClock),
            events: EventBus::new(),
        })
    }

    /// Current registry snapshot
    pub(crate) fn registry(&self) -> Arc<Registry> {
        self.registry.read().clone()
    }

    fn swap(&self, registry: Registry) {
        if self.is_debug() {
            registry.tree.debug_dump();
        }
        *self.registry.write() = Arc::new(registry);
        self.matcher.read().clear_cache();
    }

    fn user_ref(&self, registry: &Arc<Registry>, handle: EntityHandle) -> PermissibleUser<'_> {
        PermissibleUser::new(EntityRef::new(self, registry.clone(), handle))
    }

    fn group_ref(&self, registry: &Arc<Registry>, handle: EntityHandle) -> PermissibleGroup<'_> {
        PermissibleGroup::new(EntityRef::new(self, registry.clone(), handle))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Check whether `principal` (a user, else a group) holds `permission`
    ///
    /// Never fails: an unknown principal or a resolution error denies, and
    /// errors are logged.
    pub fn has(&self, principal: &str, permission: &str, site: Option<&str>) -> bool {
        let registry = self.registry();
        let handle = match self.principal(&registry, principal) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                tracing::debug!("Unknown principal '{}' denied '{}'", principal, permission);
                return false;
            }
            Err(e) => {
                tracing::error!("Failed to load '{}': {}", principal, e);
                return false;
            }
        };

        match self.check(&registry, &handle, permission, site) {
            Ok(granted) => granted,
            Err(e) => {
                tracing::error!(
                    "Failed to resolve '{}' for '{}', denying: {}",
                    permission,
                    principal,
                    e
                );
                false
            }
        }
    }

    fn principal(
        &self,
        registry: &Registry,
        principal: &str,
    ) -> PermissionResult<Option<EntityHandle>> {
        match registry.lookup(EntityKind::User, principal)? {
            Some(handle) => Ok(Some(handle)),
            None => registry.lookup(EntityKind::Group, principal),
        }
    }

    pub(crate) fn check(
        &self,
        registry: &Registry,
        handle: &EntityHandle,
        permission: &str,
        site: Option<&str>,
    ) -> PermissionResult<bool> {
        let held = self.resolved(registry, handle, site)?;
        let matcher = self.matcher.read().clone();

        let decision = matcher::resolve(matcher.as_ref(), permission, &held, site);
        let granted = match decision {
            Decision::Grant => true,
            Decision::Deny => false,
            Decision::NoOpinion => {
                let is_op = self.allow_ops()
                    && parse_bool(handle.read().own_option(OP_OPTION, None), false);
                registry.tree.default_for(permission).allows(is_op)
            }
        };

        if self.is_debug() {
            tracing::info!(
                "'{}' {} '{}' on {} ({:?})",
                handle.read().name(),
                if granted { "has" } else { "lacks" },
                permission,
                site.unwrap_or("<common>"),
                decision
            );
        }
        Ok(granted)
    }

    /// Resolved expressions for an entity, from cache when still valid
    pub(crate) fn resolved(
        &self,
        registry: &Registry,
        handle: &EntityHandle,
        site: Option<&str>,
    ) -> PermissionResult<Arc<Vec<PermissionExpression>>> {
        let now = self.now();
        let (kind, id) = {
            let entity = handle.read();
            (entity.kind(), entity.id().to_string())
        };

        if let Some(cached) = registry.cached_permissions(kind, &id, site, now) {
            return Ok(cached);
        }

        let epoch = registry.epoch();
        let permissions = Arc::new(Resolver::new(registry, now).permissions(handle, site)?);
        registry.store_permissions(kind, &id, site, epoch, permissions.clone());
        Ok(permissions)
    }

    fn query<T>(
        &self,
        principal: &str,
        what: &str,
        f: impl FnOnce(&EntityRef<'_>) -> PermissionResult<Option<T>>,
    ) -> Option<T> {
        let registry = self.registry();
        let result = self
            .principal(&registry, principal)
            .and_then(|handle| match handle {
                Some(handle) => f(&EntityRef::new(self, registry.clone(), handle)),
                None => Ok(None),
            });
        result.unwrap_or_else(|e| {
            tracing::warn!("Failed to resolve {} for '{}': {}", what, principal, e);
            None
        })
    }

    /// Resolved option of a principal, `None` when unset or unknown
    pub fn option(&self, principal: &str, name: &str, site: Option<&str>) -> Option<String> {
        self.query(principal, name, |entity| entity.option(name, site))
    }

    pub fn option_bool(&self, principal: &str, name: &str, site: Option<&str>, default: bool) -> bool {
        parse_bool(self.option(principal, name, site).as_deref(), default)
    }

    pub fn option_integer(&self, principal: &str, name: &str, site: Option<&str>, default: i64) -> i64 {
        super::types::parse_integer(self.option(principal, name, site).as_deref(), default)
    }

    pub fn option_double(&self, principal: &str, name: &str, site: Option<&str>, default: f64) -> f64 {
        super::types::parse_double(self.option(principal, name, site).as_deref(), default)
    }

    pub fn prefix(&self, principal: &str, site: Option<&str>) -> Option<String> {
        self.query(principal, "prefix", |entity| entity.prefix(site))
    }

    pub fn suffix(&self, principal: &str, site: Option<&str>) -> Option<String> {
        self.query(principal, "suffix", |entity| entity.suffix(site))
    }

    // ========================================================================
    // Entities and groups
    // ========================================================================

    /// Look up a user, loading it from the backend on a cache miss
    pub fn entity(&self, name: &str) -> PermissionResult<Option<PermissibleUser<'_>>> {
        let registry = self.registry();
        Ok(registry
            .lookup(EntityKind::User, name)?
            .map(|handle| self.user_ref(&registry, handle)))
    }

    /// Create a user; fails if it already exists
    pub fn create_entity(&self, name: &str) -> PermissionResult<PermissibleUser<'_>> {
        let registry = self.registry();
        let handle = registry.create(EntityKind::User, name)?;
        self.fire_saved(EntityKind::User, &handle);
        Ok(self.user_ref(&registry, handle))
    }

    pub fn entity_or_create(&self, name: &str) -> PermissionResult<PermissibleUser<'_>> {
        match self.entity(name)? {
            Some(user) => Ok(user),
            None => self.create_entity(name),
        }
    }

    /// Look up a group; an unknown name is an inconsistent dataset
    pub fn group(&self, name: &str) -> PermissionResult<PermissibleGroup<'_>> {
        let registry = self.registry();
        let handle = registry.group(name)?;
        Ok(self.group_ref(&registry, handle))
    }

    /// Create a group; fails if it already exists
    pub fn create_group(&self, name: &str) -> PermissionResult<PermissibleGroup<'_>> {
        let registry = self.registry();
        let handle = registry.create(EntityKind::Group, name)?;
        self.fire_saved(EntityKind::Group, &handle);
        Ok(self.group_ref(&registry, handle))
    }

    fn fire_saved(&self, kind: EntityKind, handle: &EntityHandle) {
        let id = handle.read().id().to_string();
        self.events.fire(PermissionEvent::EntityChanged {
            id,
            kind,
            action: EntityAction::Saved,
        });
    }

    /// Every known user
    pub fn entities(&self) -> PermissionResult<Vec<PermissibleUser<'_>>> {
        let registry = self.registry();
        Ok(registry
            .all(EntityKind::User)?
            .into_iter()
            .map(|handle| self.user_ref(&registry, handle))
            .collect())
    }

    /// Every known group
    pub fn groups(&self) -> PermissionResult<Vec<PermissibleGroup<'_>>> {
        let registry = self.registry();
        Ok(registry
            .all(EntityKind::Group)?
            .into_iter()
            .map(|handle| self.group_ref(&registry, handle))
            .collect())
    }

    /// Ranked groups on `ladder`, keyed by rank (smallest = highest)
    pub fn rank_ladder(&self, ladder: &str) -> PermissionResult<BTreeMap<i32, PermissibleGroup<'_>>> {
        let mut ranks = BTreeMap::new();
        for group in self.groups()? {
            if !group.is_ranked() || !same_name(&group.rank_ladder(), ladder) {
                continue;
            }
            let rank = group.rank();
            let name = group.name();
            if let Some(previous) = ranks.insert(rank, group) {
                tracing::warn!(
                    "Groups '{}' and '{}' share rank {} on ladder '{}'",
                    previous.name(),
                    name,
                    rank,
                    ladder
                );
            }
        }
        Ok(ranks)
    }

    // ========================================================================
    // Default groups
    // ========================================================================

    /// Default group for `site`, falling back to the common default
    pub fn default_group(&self, site: Option<&str>) -> PermissionResult<PermissibleGroup<'_>> {
        let registry = self.registry();
        match registry.default_group_name(site)? {
            Some(name) => {
                let handle = registry.group(&name)?;
                Ok(self.group_ref(&registry, handle))
            }
            None => {
                tracing::warn!("No default group defined. Use set_default_group() to assign one.");
                Err(PermissionError::NoDefaultGroup)
            }
        }
    }

    /// Make `group` the default for a scope, clearing the previous default
    #[tracing::instrument(skip(self))]
    pub fn set_default_group(&self, group: &str, site: Option<&str>) -> PermissionResult<()> {
        let id = {
            let _admin = self.admin.lock();
            let registry = self.registry();
            let handle = registry.group(group)?;
            let (id, name) = {
                let entity = handle.read();
                (entity.id().to_string(), entity.name().to_string())
            };

            registry.backend.set_default_group(&name, site)?;
            for other in registry.all(EntityKind::Group)? {
                let mut entity = other.write();
                let is_target = entity.id() == id;
                entity.set_default_flag(is_target, site);
            }

            registry.clear_default_groups();
            registry.invalidate_all();
            id
        };

        tracing::info!("Default group is now '{}'", id);
        self.events.fire(PermissionEvent::DefaultGroupChanged {
            site: site.map(str::to_string),
        });
        self.events.fire(PermissionEvent::EntityChanged {
            id,
            kind: EntityKind::Group,
            action: EntityAction::DefaultGroup,
        });
        Ok(())
    }

    // ========================================================================
    // Site inheritance
    // ========================================================================

    /// Sites `site` inherits from directly
    pub fn site_inheritance(&self, site: &str) -> PermissionResult<Vec<String>> {
        self.registry().site_parents(site)
    }

    /// Replace the sites `site` inherits from
    ///
    /// A site naming itself is rejected. Longer cycles are accepted with a
    /// warning; resolution stops at the first repeated site.
    #[tracing::instrument(skip(self))]
    pub fn set_site_inheritance(&self, site: &str, parents: &[&str]) -> PermissionResult<()> {
        let mut unique: Vec<String> = Vec::with_capacity(parents.len());
        for parent in parents.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if parent == site {
                return Err(PermissionError::SelfInheritingSite(site.to_string()));
            }
            if !unique.iter().any(|existing| existing == parent) {
                unique.push(parent.to_string());
            }
        }

        {
            let _admin = self.admin.lock();
            let registry = self.registry();
            registry.backend.set_site_inheritance(site, &unique)?;
            registry.clear_site_parents();
            registry.invalidate_all();

            let resolver = Resolver::new(&registry, self.now());
            for parent in &unique {
                if resolver.site_ancestors(parent)?.iter().any(|s| s == site) {
                    tracing::warn!("Site inheritance cycle: '{}' inherits back from '{}'", parent, site);
                }
            }
        }

        self.events.fire(PermissionEvent::SiteInheritanceChanged {
            site: site.to_string(),
        });
        Ok(())
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Switch to the backend registered under `alias` and reload everything
    #[tracing::instrument(skip(self))]
    pub fn set_backend(&self, alias: &str) -> PermissionResult<()> {
        let config = self.config();
        let backend = self.backends.create(alias, &config)?;
        self.install_backend(backend)?;
        self.config.write().backend = alias.to_string();
        Ok(())
    }

    /// Bind an already constructed backend and reload everything from it
    pub fn install_backend(&self, backend: Arc<dyn PermissionBackend>) -> PermissionResult<()> {
        let name = backend.name().to_string();
        {
            let _admin = self.admin.lock();
            backend.initialize()?;
            self.swap(Registry::load(backend)?);
        }

        tracing::info!("Permission backend switched to '{}'", name);
        self.events.fire(PermissionEvent::BackendChanged(name));
        Ok(())
    }

    /// Drop every cache and rebuild from the backend's in-memory state
    pub fn load_data(&self) -> PermissionResult<()> {
        self.rebuild(false)
    }

    /// Re-read the backend's data source, then rebuild every cache
    pub fn reset(&self) -> PermissionResult<()> {
        self.rebuild(true)
    }

    #[tracing::instrument(skip(self))]
    fn rebuild(&self, reread: bool) -> PermissionResult<()> {
        {
            let _admin = self.admin.lock();
            let backend = self.registry().backend.clone();
            if reread {
                backend.reload()?;
            }
            self.swap(Registry::load(backend)?);
        }

        tracing::info!("Permissions reloaded");
        self.events.fire(PermissionEvent::Reloaded);
        Ok(())
    }

    /// Persist every cached entity with unsaved changes
    pub fn save_data(&self) -> PermissionResult<usize> {
        let registry = self.registry();
        let mut saved = 0;
        for handle in registry.cached() {
            let mut entity = handle.write();
            if entity.is_dirty() {
                registry
                    .backend
                    .save_entity(entity.kind(), &entity.to_record())?;
                entity.mark_clean();
                saved += 1;
            }
        }
        tracing::debug!("Saved {} dirty entities", saved);
        Ok(saved)
    }

    /// Forget the cached user so the next lookup re-reads it
    pub fn reset_entity(&self, name: &str) -> bool {
        self.registry().evict(EntityKind::User, name)
    }

    /// Forget the cached group so the next lookup re-reads it
    pub fn reset_group(&self, name: &str) -> bool {
        self.registry().evict(EntityKind::Group, name)
    }

    /// Remove expired timed permissions from cached entities and persist
    pub fn purge_expired(&self) -> PermissionResult<usize> {
        let registry = self.registry();
        let now = self.now();
        let mut total = 0;

        for handle in registry.cached() {
            if handle.read().expired_count(now) == 0 {
                continue;
            }
            total += EntityRef::new(self, registry.clone(), handle).purge_expired()?;
        }

        if total > 0 {
            tracing::debug!("Purged {} expired timed permissions", total);
        }
        Ok(total)
    }

    pub fn set_debug(&self, debug: bool) {
        if self.debug.swap(debug, Ordering::SeqCst) != debug {
            if debug {
                self.registry().tree.debug_dump();
            }
            self.events.fire(PermissionEvent::DebugModeToggled(debug));
        }
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }

    /// Whether `op` / `notop` node defaults are honoured
    pub fn allow_ops(&self) -> bool {
        self.config.read().allow_ops
    }

    /// Replace the matching strategy
    pub fn set_matcher(&self, matcher: Arc<dyn PermissionMatcher>) {
        *self.matcher.write() = matcher;
    }

    /// Copy of the active configuration
    pub fn config(&self) -> PermissionsConfig {
        self.config.read().clone()
    }

    /// Replace the active configuration
    ///
    /// Takes effect for `debug`, `allow_ops` and `strict_inheritance` at
    /// once; backend settings apply on the next [`Self::set_backend`].
    pub fn set_config(&self, config: PermissionsConfig) {
        let debug = config.debug;
        *self.config.write() = config;
        self.set_debug(debug);
    }

    /// Backend alias table, for registering custom backends
    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    pub fn backend_name(&self) -> String {
        self.registry().backend.name().to_string()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current Unix time according to the manager's clock
    pub fn now(&self) -> u64 {
        self.clock.now()
    }
}
