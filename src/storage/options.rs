use serde::{Deserialize, Serialize};

/// Default number of rows held by one node group.
pub const DEFAULT_NODE_GROUP_CAPACITY: u64 = 1 << 17;

/// Configuration options applied to every table created by a
/// [`super::StorageManager`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Maximum number of rows per node group (committed or uncommitted).
    pub node_group_capacity: u64,
    /// Whether committing a transaction may append into the last partially
    /// filled committed node group (copy-on-write) instead of opening a new one.
    pub compact_on_commit: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            node_group_capacity: DEFAULT_NODE_GROUP_CAPACITY,
            compact_on_commit: true,
        }
    }
}

impl StorageOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the node group capacity.
    pub fn node_group_capacity(mut self, rows: u64) -> Self {
        self.node_group_capacity = rows.max(1);
        self
    }

    /// Enables or disables compaction into the last committed node group.
    pub fn compact_on_commit(mut self, enabled: bool) -> Self {
        self.compact_on_commit = enabled;
        self
    }
}
