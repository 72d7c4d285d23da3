//! Backend that mirrors the permissions document to a TOML or JSON file

use std::path::{Path, PathBuf};

use sitegate_sdk::EntityKind;

use crate::backend::PermissionBackend;
use crate::document::PermissionsDocument;
use crate::error::{BackendError, BackendResult};
use crate::memory::MemoryBackend;
use crate::record::{EntityRecord, NodeRecord};

/// Alias the file backend registers under
pub const FILE_BACKEND: &str = "file";

/// On-disk encoding, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    /// Detect the format from a path's extension
    pub fn from_path(path: &Path) -> BackendResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(FileFormat::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(FileFormat::Json),
            other => Err(BackendError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    fn parse(&self, content: &str) -> BackendResult<PermissionsDocument> {
        Ok(match self {
            FileFormat::Toml => toml::from_str(content)?,
            FileFormat::Json => serde_json::from_str(content)?,
        })
    }

    fn render(&self, document: &PermissionsDocument) -> BackendResult<String> {
        Ok(match self {
            FileFormat::Toml => toml::to_string_pretty(document)?,
            FileFormat::Json => serde_json::to_string_pretty(document)?,
        })
    }
}

/// File-backed permissions storage
///
/// Every write goes to memory first and is then flushed to disk. A missing
/// file is not an error: a fresh document with a `default` group is created.
pub struct FileBackend {
    path: PathBuf,
    format: FileFormat,
    default_permissions: Vec<String>,
    inner: MemoryBackend,
}

impl FileBackend {
    /// Create a file backend. Nothing is read until [`PermissionBackend::initialize`].
    ///
    /// # Arguments
    /// * `path` - Permissions file (`.toml` or `.json`)
    /// * `default_permissions` - Permissions seeded into the `default` group of a fresh file
    pub fn new(path: impl Into<PathBuf>, default_permissions: Vec<String>) -> BackendResult<Self> {
        let path = path.into();
        let format = FileFormat::from_path(&path)?;
        Ok(Self {
            path,
            format,
            default_permissions,
            inner: MemoryBackend::new(),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clone of the in-memory document
    pub fn document(&self) -> PermissionsDocument {
        self.inner.document()
    }

    /// Write the current document to disk
    ///
    /// Creates parent directories if they don't exist.
    pub fn save(&self) -> BackendResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = self.format.render(&self.inner.document())?;
        std::fs::write(&self.path, content)?;
        tracing::debug!("Saved permissions to {:?}", self.path);
        Ok(())
    }

    fn read_document(&self) -> BackendResult<Option<PermissionsDocument>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(self.format.parse(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl PermissionBackend for FileBackend {
    fn name(&self) -> &str {
        FILE_BACKEND
    }

    fn initialize(&self) -> BackendResult<()> {
        self.reload()
    }

    #[tracing::instrument(skip(self), fields(path = ?self.path))]
    fn reload(&self) -> BackendResult<()> {
        match self.read_document()? {
            Some(document) => {
                self.inner.replace(document);
                tracing::info!("Permissions file successfully reloaded");
            }
            None => {
                self.inner
                    .replace(PermissionsDocument::seeded(&self.default_permissions));
                self.save()?;
                tracing::info!("Created default permissions file at {:?}", self.path);
            }
        }
        Ok(())
    }

    fn entity(&self, id: &str) -> BackendResult<Option<EntityRecord>> {
        self.inner.entity(id)
    }

    fn group(&self, id: &str) -> BackendResult<Option<EntityRecord>> {
        self.inner.group(id)
    }

    fn groups(&self) -> BackendResult<Vec<EntityRecord>> {
        self.inner.groups()
    }

    fn entities(&self) -> BackendResult<Vec<EntityRecord>> {
        self.inner.entities()
    }

    fn save_entity(&self, kind: EntityKind, record: &EntityRecord) -> BackendResult<()> {
        self.inner.save_entity(kind, record)?;
        self.save()
    }

    fn remove_entity(&self, kind: EntityKind, id: &str) -> BackendResult<()> {
        self.inner.remove_entity(kind, id)?;
        self.save()
    }

    fn site_inheritance(&self, site: &str) -> BackendResult<Vec<String>> {
        self.inner.site_inheritance(site)
    }

    fn set_site_inheritance(&self, site: &str, parents: &[String]) -> BackendResult<()> {
        self.inner.set_site_inheritance(site, parents)?;
        self.save()
    }

    fn default_group(&self, site: Option<&str>) -> BackendResult<Option<String>> {
        self.inner.default_group(site)
    }

    fn set_default_group(&self, group: &str, site: Option<&str>) -> BackendResult<()> {
        self.inner.set_default_group(group, site)?;
        self.save()
    }

    fn load_permission_tree(&self) -> BackendResult<Vec<NodeRecord>> {
        self.inner.load_permission_tree()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SEED_GROUP;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            FileFormat::from_path(Path::new("perms.toml")).unwrap(),
            FileFormat::Toml
        );
        assert_eq!(
            FileFormat::from_path(Path::new("perms.JSON")).unwrap(),
            FileFormat::Json
        );
        assert!(FileFormat::from_path(Path::new("perms.yml")).is_err());
        assert!(FileFormat::from_path(Path::new("perms")).is_err());
    }

    #[test]
    fn test_missing_file_is_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("permissions.toml");
        let backend = FileBackend::new(&path, vec!["site.view".to_string()]).unwrap();

        backend.initialize().unwrap();

        assert!(path.exists());
        assert_eq!(backend.default_group(None).unwrap(), Some(SEED_GROUP.to_string()));
        let group = backend.group(SEED_GROUP).unwrap().unwrap();
        assert_eq!(group.common.permissions, vec!["site.view".to_string()]);
    }

    #[test]
    fn test_writes_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["permissions.toml", "permissions.json"] {
            let path = dir.path().join(file);
            let backend = FileBackend::new(&path, Vec::new()).unwrap();
            backend.initialize().unwrap();

            let mut admin = EntityRecord::new("admin");
            admin.common.permissions.push("site.manage".to_string());
            admin.common.parents.push(SEED_GROUP.to_string());
            admin
                .scope_mut(Some("example.com"))
                .options
                .insert("weight".to_string(), "10".to_string());
            backend.save_entity(EntityKind::Group, &admin).unwrap();
            backend
                .set_site_inheritance("shop.example.com", &["example.com".to_string()])
                .unwrap();

            let reopened = FileBackend::new(&path, Vec::new()).unwrap();
            reopened.initialize().unwrap();

            let loaded = reopened.group("ADMIN").unwrap().unwrap();
            assert_eq!(loaded.name, "admin");
            assert_eq!(loaded.common.parents, vec![SEED_GROUP.to_string()]);
            assert_eq!(
                loaded.sites["example.com"].options.get("weight"),
                Some(&"10".to_string())
            );
            assert_eq!(
                reopened.site_inheritance("shop.example.com").unwrap(),
                vec!["example.com".to_string()]
            );
        }
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.toml");
        std::fs::write(&path, "groups = [not toml").unwrap();

        let backend = FileBackend::new(&path, Vec::new()).unwrap();
        let err = backend.initialize().unwrap_err();
        assert!(matches!(err, BackendError::TomlParse(_)));
    }
}
