//! The storage contract the resolution engine is written against

use sitegate_sdk::EntityKind;

use crate::error::BackendResult;
use crate::record::{EntityRecord, NodeRecord};

/// Persistence strategy for an authorization dataset
///
/// The engine calls these synchronously and never retries; retry and timeout
/// policy belongs to the implementation. Lookups are case-insensitive.
pub trait PermissionBackend: Send + Sync {
    /// Short alias the backend was registered under (e.g. `"file"`)
    fn name(&self) -> &str;

    /// Prepare the backend for use. Called once before the first load.
    fn initialize(&self) -> BackendResult<()>;

    /// Re-read the underlying data source
    fn reload(&self) -> BackendResult<()>;

    /// Load a user record
    fn entity(&self, id: &str) -> BackendResult<Option<EntityRecord>>;

    /// Load a group record
    fn group(&self, id: &str) -> BackendResult<Option<EntityRecord>>;

    /// All group records
    fn groups(&self) -> BackendResult<Vec<EntityRecord>>;

    /// All user records
    fn entities(&self) -> BackendResult<Vec<EntityRecord>>;

    /// Insert or replace a record
    fn save_entity(&self, kind: EntityKind, record: &EntityRecord) -> BackendResult<()>;

    /// Delete a record. Deleting a missing record is not an error.
    fn remove_entity(&self, kind: EntityKind, id: &str) -> BackendResult<()>;

    /// Sites `site` inherits from
    fn site_inheritance(&self, site: &str) -> BackendResult<Vec<String>>;

    fn set_site_inheritance(&self, site: &str, parents: &[String]) -> BackendResult<()>;

    /// Default group for a scope (`None` = common)
    fn default_group(&self, site: Option<&str>) -> BackendResult<Option<String>>;

    /// Make `group` the default for a scope; any previous default is cleared
    fn set_default_group(&self, group: &str, site: Option<&str>) -> BackendResult<()>;

    /// Declared permission nodes with their default policies
    fn load_permission_tree(&self) -> BackendResult<Vec<NodeRecord>>;
}
