//! Columnar table storage with transaction-local overlays.
//!
//! Node tables are sequences of fixed-capacity node groups; relationship
//! tables keep rows plus forward and backward adjacency. Committed data is
//! published behind `Arc` and replaced copy-on-write at commit, while a write
//! transaction's own rows live in its [`LocalStorage`] until then.

mod local;
mod manager;
mod node_group;
mod node_table;
mod options;
mod predicate;
mod rel_table;
mod scan;

pub use local::{LocalNodeTable, LocalRelTable, LocalStorage, LocalTable};
pub use manager::{StorageManager, Table};
pub use node_group::NodeGroup;
pub use node_table::NodeTable;
pub use options::{StorageOptions, DEFAULT_NODE_GROUP_CAPACITY};
pub use predicate::{ColumnPredicate, ColumnPredicateSet, CompareOp};
pub use rel_table::RelTable;
pub use scan::{NodeTableScanState, RelDirection, RelTableScanState, TableScanSource};
