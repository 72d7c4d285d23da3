//! Global permission node tree
//!
//! Declared nodes carry the default policy consulted when no held expression
//! has an opinion. The tree is shared by every entity and rebuilt whenever
//! the manager reloads its data.
//!
//! ```text
//! (root)
//!   └── site
//!         ├── view    default = true
//!         └── modify  default = op
//! ```

use std::collections::BTreeMap;

use sitegate_engine::NodeRecord;
use sitegate_sdk::names::NODE_SEPARATOR;
use sitegate_sdk::PermissionDefault;

/// One segment of a dotted permission path
#[derive(Debug, Clone, Default)]
pub struct PermissionNode {
    name: String,
    namespace: String,
    default: Option<PermissionDefault>,
    description: Option<String>,
    children: BTreeMap<String, PermissionNode>,
}

impl PermissionNode {
    fn child(namespace: &str, name: &str) -> Self {
        let namespace = if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}{NODE_SEPARATOR}{name}")
        };
        Self {
            name: name.to_string(),
            namespace,
            ..Self::default()
        }
    }

    /// Last segment of the path
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full dotted path
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Default policy, if this node was declared explicitly
    pub fn default_policy(&self) -> Option<PermissionDefault> {
        self.default
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &PermissionNode> {
        self.children.values()
    }

    fn count_defined(&self) -> usize {
        usize::from(self.default.is_some())
            + self.children.values().map(Self::count_defined).sum::<usize>()
    }

    fn dump(&self, depth: usize) {
        if !self.name.is_empty() {
            tracing::info!(
                "{}{} ({})",
                "  ".repeat(depth),
                self.name,
                self.default.map(|d| d.as_str()).unwrap_or("-")
            );
        }
        for child in self.children.values() {
            child.dump(depth + 1);
        }
    }
}

/// Tree of declared permission nodes
#[derive(Debug, Clone, Default)]
pub struct PermissionTree {
    root: PermissionNode,
}

impl PermissionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from the records a backend reports
    pub fn from_records(records: &[NodeRecord]) -> Self {
        let mut tree = Self::new();
        for record in records {
            tree.insert(record);
        }
        tree
    }

    /// Declare a node, creating intermediate segments as needed
    pub fn insert(&mut self, record: &NodeRecord) {
        let parts = segments(&record.path);
        if parts.is_empty() {
            tracing::warn!("Ignoring permission node with empty path");
            return;
        }

        let mut node = &mut self.root;
        for segment in parts {
            let namespace = node.namespace.clone();
            node = node
                .children
                .entry(segment.clone())
                .or_insert_with(|| PermissionNode::child(&namespace, &segment));
        }
        node.default = Some(record.default);
        node.description.clone_from(&record.description);
    }

    /// Look up a node by its dotted path
    pub fn get(&self, path: &str) -> Option<&PermissionNode> {
        let mut node = &self.root;
        for segment in segments(path) {
            node = node.children.get(&segment)?;
        }
        Some(node)
    }

    /// Default policy for a permission: the deepest declared node on its path
    pub fn default_for(&self, permission: &str) -> PermissionDefault {
        let mut node = &self.root;
        let mut found = PermissionDefault::False;
        for segment in segments(permission) {
            match node.children.get(&segment) {
                Some(child) => {
                    if let Some(default) = child.default {
                        found = default;
                    }
                    node = child;
                }
                None => break,
            }
        }
        found
    }

    /// Number of explicitly declared nodes
    pub fn len(&self) -> usize {
        self.root.count_defined()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Log the whole tree at info level
    pub fn debug_dump(&self) {
        tracing::info!("Permission tree ({} declared nodes):", self.len());
        self.root.dump(0);
    }
}

fn segments(path: &str) -> Vec<String> {
    path.split(NODE_SEPARATOR)
        .map(|segment| segment.trim().to_ascii_lowercase())
        .filter(|segment| !segment.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> PermissionTree {
        PermissionTree::from_records(&[
            NodeRecord::new("site", PermissionDefault::True),
            NodeRecord::new("site.modify", PermissionDefault::Op),
            NodeRecord::new("admin.panel.users", PermissionDefault::NotOp),
        ])
    }

    #[test]
    fn test_deepest_declared_node_wins() {
        let tree = tree();
        assert_eq!(tree.default_for("site.view"), PermissionDefault::True);
        assert_eq!(tree.default_for("SITE.Modify.pages"), PermissionDefault::Op);
        assert_eq!(tree.default_for("admin.panel"), PermissionDefault::False);
        assert_eq!(tree.default_for("admin.panel.users"), PermissionDefault::NotOp);
        assert_eq!(tree.default_for("unknown"), PermissionDefault::False);
    }

    #[test]
    fn test_intermediate_nodes_have_no_default() {
        let tree = tree();
        let panel = tree.get("admin.panel").unwrap();
        assert_eq!(panel.default_policy(), None);
        assert_eq!(
            tree.get("site.modify").unwrap().default_policy(),
            Some(PermissionDefault::Op)
        );
        assert_eq!(panel.namespace(), "admin.panel");
        assert_eq!(panel.children().count(), 1);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_redeclaring_replaces_default() {
        let mut tree = tree();
        tree.insert(&NodeRecord::new("site.modify", PermissionDefault::True));
        assert_eq!(tree.default_for("site.modify"), PermissionDefault::True);
        assert_eq!(tree.len(), 3);
    }
}
