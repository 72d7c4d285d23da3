//! Backend that keeps everything in process memory

use parking_lot::RwLock;
use sitegate_sdk::EntityKind;

use crate::backend::PermissionBackend;
use crate::document::PermissionsDocument;
use crate::error::BackendResult;
use crate::record::{EntityRecord, NodeRecord};

/// Alias the memory backend registers under
pub const MEMORY_BACKEND: &str = "memory";

/// Non-persistent backend, also the storage layer of [`crate::FileBackend`]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    document: RwLock<PermissionsDocument>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with a document
    pub fn with_document(mut document: PermissionsDocument) -> Self {
        document.attach_names();
        Self {
            document: RwLock::new(document),
        }
    }

    /// Clone of the current document
    pub fn document(&self) -> PermissionsDocument {
        self.document.read().clone()
    }

    /// Replace the whole document
    pub fn replace(&self, mut document: PermissionsDocument) {
        document.attach_names();
        *self.document.write() = document;
    }

    /// Mutate the document in place
    pub fn update<R>(&self, f: impl FnOnce(&mut PermissionsDocument) -> R) -> R {
        f(&mut *self.document.write())
    }

    /// Declare a permission node
    pub fn add_node(&self, node: NodeRecord) {
        let mut document = self.document.write();
        document.nodes.retain(|existing| existing.path != node.path);
        document.nodes.push(node);
    }
}

impl PermissionBackend for MemoryBackend {
    fn name(&self) -> &str {
        MEMORY_BACKEND
    }

    fn initialize(&self) -> BackendResult<()> {
        tracing::debug!("Memory backend initialized");
        Ok(())
    }

    fn reload(&self) -> BackendResult<()> {
        Ok(())
    }

    fn entity(&self, id: &str) -> BackendResult<Option<EntityRecord>> {
        Ok(self.document.read().entity(EntityKind::User, id))
    }

    fn group(&self, id: &str) -> BackendResult<Option<EntityRecord>> {
        Ok(self.document.read().entity(EntityKind::Group, id))
    }

    fn groups(&self) -> BackendResult<Vec<EntityRecord>> {
        Ok(self.document.read().entities(EntityKind::Group))
    }

    fn entities(&self) -> BackendResult<Vec<EntityRecord>> {
        Ok(self.document.read().entities(EntityKind::User))
    }

    fn save_entity(&self, kind: EntityKind, record: &EntityRecord) -> BackendResult<()> {
        self.document.write().put_entity(kind, record);
        Ok(())
    }

    fn remove_entity(&self, kind: EntityKind, id: &str) -> BackendResult<()> {
        self.document.write().remove_entity(kind, id);
        Ok(())
    }

    fn site_inheritance(&self, site: &str) -> BackendResult<Vec<String>> {
        Ok(self.document.read().site_inheritance(site))
    }

    fn set_site_inheritance(&self, site: &str, parents: &[String]) -> BackendResult<()> {
        self.document.write().set_site_inheritance(site, parents);
        Ok(())
    }

    fn default_group(&self, site: Option<&str>) -> BackendResult<Option<String>> {
        Ok(self.document.read().default_group(site))
    }

    fn set_default_group(&self, group: &str, site: Option<&str>) -> BackendResult<()> {
        self.document.write().set_default_group(group, site)
    }

    fn load_permission_tree(&self) -> BackendResult<Vec<NodeRecord>> {
        Ok(self.document.read().nodes.clone())
    }
}
