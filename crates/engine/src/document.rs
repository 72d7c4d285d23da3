//! In-memory permissions document shared by the bundled backends
//!
//! Layout (TOML shown, JSON is equivalent):
//!
//! ```toml
//! [groups.default.common]
//! permissions = ["site.view"]
//! default = true
//!
//! [groups.admin.common]
//! permissions = ["site.manage"]
//! parents = ["default"]
//!
//! [users.alice.common]
//! parents = ["admin"]
//!
//! [sites."shop.example.com"]
//! inheritance = ["example.com"]
//!
//! [[nodes]]
//! path = "site.modify"
//! default = "op"
//! ```
//!
//! Names are matched case-insensitively but stored as first written.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sitegate_sdk::names::same_name;
use sitegate_sdk::EntityKind;

use crate::error::{BackendError, BackendResult};
use crate::record::{EntityRecord, NodeRecord, SiteRecord};

/// Name of the group a fresh document starts with
pub const SEED_GROUP: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsDocument {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, EntityRecord>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BTreeMap<String, EntityRecord>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sites: BTreeMap<String, SiteRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeRecord>,
}

impl PermissionsDocument {
    /// Document with a single `default` group marked default for the common scope
    pub fn seeded(default_permissions: &[String]) -> Self {
        let mut group = EntityRecord::new(SEED_GROUP);
        group.common.default = true;
        group.common.permissions = default_permissions.to_vec();

        let mut document = Self::default();
        document.groups.insert(SEED_GROUP.to_string(), group);
        document
    }

    /// Copy map keys into `EntityRecord::name` after deserialization
    pub fn attach_names(&mut self) {
        for (name, record) in self.groups.iter_mut().chain(self.users.iter_mut()) {
            record.name.clone_from(name);
        }
    }

    fn map(&self, kind: EntityKind) -> &BTreeMap<String, EntityRecord> {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Group => &self.groups,
        }
    }

    fn map_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<String, EntityRecord> {
        match kind {
            EntityKind::User => &mut self.users,
            EntityKind::Group => &mut self.groups,
        }
    }

    /// Find the stored key for a case-insensitive name
    fn find_key(map: &BTreeMap<String, EntityRecord>, id: &str) -> Option<String> {
        map.keys().find(|key| same_name(key, id)).cloned()
    }

    /// Look up a record by case-insensitive name
    pub fn entity(&self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
        let map = self.map(kind);
        Self::find_key(map, id).and_then(|key| {
            map.get(&key).map(|record| {
                let mut record = record.clone();
                record.name = key;
                record
            })
        })
    }

    /// All records of a kind
    pub fn entities(&self, kind: EntityKind) -> Vec<EntityRecord> {
        self.map(kind)
            .iter()
            .map(|(name, record)| {
                let mut record = record.clone();
                record.name.clone_from(name);
                record
            })
            .collect()
    }

    /// Insert or replace a record, keeping the existing key spelling
    pub fn put_entity(&mut self, kind: EntityKind, record: &EntityRecord) {
        let map = self.map_mut(kind);
        let key = Self::find_key(map, &record.name).unwrap_or_else(|| record.name.clone());
        let mut stored = record.clone();
        stored.name.clone_from(&key);
        map.insert(key, stored);
    }

    /// Remove a record. Returns `true` if it existed.
    pub fn remove_entity(&mut self, kind: EntityKind, id: &str) -> bool {
        let map = self.map_mut(kind);
        match Self::find_key(map, id) {
            Some(key) => map.remove(&key).is_some(),
            None => false,
        }
    }

    /// Sites the given site inherits from, in declaration order
    pub fn site_inheritance(&self, site: &str) -> Vec<String> {
        self.sites
            .get(site)
            .map(|record| record.inheritance.clone())
            .unwrap_or_default()
    }

    pub fn set_site_inheritance(&mut self, site: &str, parents: &[String]) {
        if parents.is_empty() {
            self.sites.remove(site);
        } else {
            self.sites.entry(site.to_string()).or_default().inheritance = parents.to_vec();
        }
    }

    /// Name of the group flagged default for a scope
    pub fn default_group(&self, site: Option<&str>) -> Option<String> {
        self.groups
            .iter()
            .find(|(_, record)| record.scope(site).is_some_and(|scope| scope.default))
            .map(|(name, _)| name.clone())
    }

    /// Flag `group` as the default for a scope, clearing any previous default
    pub fn set_default_group(&mut self, group: &str, site: Option<&str>) -> BackendResult<()> {
        let key = Self::find_key(&self.groups, group).ok_or_else(|| BackendError::MissingRecord {
            kind: EntityKind::Group,
            id: group.to_string(),
        })?;

        for (name, record) in self.groups.iter_mut() {
            if *name == key {
                record.scope_mut(site).default = true;
            } else if let Some(scope) = match site {
                None => Some(&mut record.common),
                Some(site) => record.sites.get_mut(site),
            } {
                scope.default = false;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_document() {
        let doc = PermissionsDocument::seeded(&["site.view".to_string()]);
        assert_eq!(doc.default_group(None), Some(SEED_GROUP.to_string()));
        let group = doc.entity(EntityKind::Group, "DEFAULT").unwrap();
        assert_eq!(group.name, SEED_GROUP);
        assert_eq!(group.common.permissions, vec!["site.view".to_string()]);
    }

    #[test]
    fn test_put_keeps_key_spelling() {
        let mut doc = PermissionsDocument::default();
        doc.put_entity(EntityKind::User, &EntityRecord::new("Alice"));
        doc.put_entity(EntityKind::User, &EntityRecord::new("alice"));

        assert_eq!(doc.users.len(), 1);
        assert!(doc.users.contains_key("Alice"));
        assert!(doc.remove_entity(EntityKind::User, "ALICE"));
        assert!(doc.users.is_empty());
    }

    #[test]
    fn test_default_group_is_unique_per_scope() {
        let mut doc = PermissionsDocument::default();
        doc.put_entity(EntityKind::Group, &EntityRecord::new("a"));
        doc.put_entity(EntityKind::Group, &EntityRecord::new("b"));

        doc.set_default_group("a", Some("shop")).unwrap();
        doc.set_default_group("b", Some("shop")).unwrap();

        let flagged: Vec<_> = doc
            .groups
            .values()
            .filter(|g| g.scope(Some("shop")).is_some_and(|s| s.default))
            .collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(doc.default_group(Some("shop")), Some("b".to_string()));
        assert_eq!(doc.default_group(None), None);
    }

    #[test]
    fn test_default_group_requires_existing_group() {
        let mut doc = PermissionsDocument::default();
        let err = doc.set_default_group("ghost", None).unwrap_err();
        assert!(matches!(err, BackendError::MissingRecord { .. }));
    }

    #[test]
    fn test_site_inheritance() {
        let mut doc = PermissionsDocument::default();
        doc.set_site_inheritance("shop.example.com", &["example.com".to_string()]);
        assert_eq!(
            doc.site_inheritance("shop.example.com"),
            vec!["example.com".to_string()]
        );

        doc.set_site_inheritance("shop.example.com", &[]);
        assert!(doc.site_inheritance("shop.example.com").is_empty());
        assert!(doc.sites.is_empty());
    }
}
