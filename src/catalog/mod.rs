//! Name-level catalog of node tables and relationship groups.
//!
//! A relationship group is one label that may span several physical
//! relationship tables, one per (source, destination) node table pair.
//! Entries are shared as `Arc` so bound expressions can carry them into
//! logical plans.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::types::{LogicalType, PenumbraError, Result, TableId};

/// Property column of a table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDefinition {
    /// Property name.
    pub name: String,
    /// Property type.
    pub data_type: LogicalType,
}

impl PropertyDefinition {
    /// Creates a property definition.
    pub fn new(name: impl Into<String>, data_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Catalog entry of a node table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeTableEntry {
    /// Table id shared with storage.
    pub id: TableId,
    /// Table name.
    pub name: String,
    /// Property columns.
    pub properties: Vec<PropertyDefinition>,
}

/// Upper bound on neighbours per node in one direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelMultiplicity {
    /// At most one neighbour.
    One,
    /// Any number of neighbours.
    Many,
}

impl RelMultiplicity {
    /// Forward multiplicity of a `SRC_DST` multiplicity such as `MANY_ONE`.
    pub fn forward(multiplicity: &str) -> Result<Self> {
        match multiplicity.to_ascii_uppercase().as_str() {
            "ONE_ONE" | "ONE_MANY" => Ok(RelMultiplicity::One),
            "MANY_ONE" | "MANY_MANY" => Ok(RelMultiplicity::Many),
            _ => Err(invalid_multiplicity(multiplicity)),
        }
    }

    /// Backward multiplicity of a `SRC_DST` multiplicity.
    pub fn backward(multiplicity: &str) -> Result<Self> {
        match multiplicity.to_ascii_uppercase().as_str() {
            "ONE_ONE" | "MANY_ONE" => Ok(RelMultiplicity::One),
            "ONE_MANY" | "MANY_MANY" => Ok(RelMultiplicity::Many),
            _ => Err(invalid_multiplicity(multiplicity)),
        }
    }
}

fn invalid_multiplicity(multiplicity: &str) -> PenumbraError {
    PenumbraError::Query(format!("Cannot bind {multiplicity} as relationship multiplicity."))
}

impl fmt::Display for RelMultiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelMultiplicity::One => f.write_str("ONE"),
            RelMultiplicity::Many => f.write_str("MANY"),
        }
    }
}

/// Path semantic of a recursive relationship pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PathSemantic {
    /// Nodes and relationships may repeat.
    #[default]
    Walk,
    /// Relationships may not repeat.
    Trail,
    /// Nodes may not repeat.
    Acyclic,
}

impl FromStr for PathSemantic {
    type Err = PenumbraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WALK" => Ok(PathSemantic::Walk),
            "TRAIL" => Ok(PathSemantic::Trail),
            "ACYCLIC" => Ok(PathSemantic::Acyclic),
            _ => Err(PenumbraError::Query(format!(
                "Cannot parse {s} as a path semantic. Supported inputs are [WALK, TRAIL, ACYCLIC]"
            ))),
        }
    }
}

impl fmt::Display for PathSemantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSemantic::Walk => f.write_str("WALK"),
            PathSemantic::Trail => f.write_str("TRAIL"),
            PathSemantic::Acyclic => f.write_str("ACYCLIC"),
        }
    }
}

/// One physical relationship table of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelEntryInfo {
    /// Physical rel table id.
    pub oid: TableId,
    /// Source node table.
    pub src: TableId,
    /// Destination node table.
    pub dst: TableId,
}

/// Catalog entry of a relationship group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelGroupEntry {
    /// Group name (the relationship label).
    pub name: String,
    /// Physical tables of the group.
    pub rel_entry_infos: Vec<RelEntryInfo>,
    /// Property columns shared by every table of the group.
    pub properties: Vec<PropertyDefinition>,
    /// Forward multiplicity.
    pub fwd_multiplicity: RelMultiplicity,
    /// Backward multiplicity.
    pub bwd_multiplicity: RelMultiplicity,
}

impl RelGroupEntry {
    /// Physical table ids of the group.
    pub fn rel_table_ids(&self) -> Vec<TableId> {
        self.rel_entry_infos.iter().map(|info| info.oid).collect()
    }
}

/// Error message for a node that exceeds a `ONE` multiplicity.
pub fn rel_multiplicity_violation(table: &str, offset: u64, direction: &str) -> String {
    format!(
        "Node(nodeOffset: {offset}) has more than one neighbour in table {table} in the \
         {direction} direction, which violates the rel multiplicity constraint."
    )
}

/// In-memory catalog handing out table ids.
#[derive(Debug, Default)]
pub struct Catalog {
    next_id: u64,
    node_tables: FxHashMap<String, Arc<NodeTableEntry>>,
    rel_groups: FxHashMap<String, Arc<RelGroupEntry>>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> TableId {
        let id = TableId(self.next_id);
        self.next_id += 1;
        id
    }

    fn ensure_unused(&self, name: &str) -> Result<()> {
        if self.node_tables.contains_key(name) || self.rel_groups.contains_key(name) {
            return Err(PenumbraError::Query(format!("table {name} already exists")));
        }
        Ok(())
    }

    /// Registers a node table.
    pub fn create_node_table(
        &mut self,
        name: &str,
        properties: Vec<PropertyDefinition>,
    ) -> Result<Arc<NodeTableEntry>> {
        self.ensure_unused(name)?;
        let entry = Arc::new(NodeTableEntry {
            id: self.allocate(),
            name: name.to_owned(),
            properties,
        });
        self.node_tables.insert(name.to_owned(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Registers a relationship group with one physical table per
    /// `(src, dst)` node table pair.
    pub fn create_rel_group(
        &mut self,
        name: &str,
        connections: &[(&str, &str)],
        properties: Vec<PropertyDefinition>,
        multiplicity: &str,
    ) -> Result<Arc<RelGroupEntry>> {
        self.ensure_unused(name)?;
        if connections.is_empty() {
            return Err(PenumbraError::Query(format!(
                "relationship group {name} needs at least one connection"
            )));
        }
        let fwd_multiplicity = RelMultiplicity::forward(multiplicity)?;
        let bwd_multiplicity = RelMultiplicity::backward(multiplicity)?;
        let mut rel_entry_infos = Vec::with_capacity(connections.len());
        for (src, dst) in connections {
            let src = self.node_table(src)?.id;
            let dst = self.node_table(dst)?.id;
            rel_entry_infos.push(RelEntryInfo {
                oid: self.allocate(),
                src,
                dst,
            });
        }
        let entry = Arc::new(RelGroupEntry {
            name: name.to_owned(),
            rel_entry_infos,
            properties,
            fwd_multiplicity,
            bwd_multiplicity,
        });
        self.rel_groups.insert(name.to_owned(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Looks up a node table by name.
    pub fn node_table(&self, name: &str) -> Result<Arc<NodeTableEntry>> {
        self.node_tables
            .get(name)
            .cloned()
            .ok_or(PenumbraError::NotFound("node table"))
    }

    /// Looks up a relationship group by name.
    pub fn rel_group(&self, name: &str) -> Result<Arc<RelGroupEntry>> {
        self.rel_groups
            .get(name)
            .cloned()
            .ok_or(PenumbraError::NotFound("relationship group"))
    }

    /// Looks up a node table by id.
    pub fn node_table_by_id(&self, id: TableId) -> Option<Arc<NodeTableEntry>> {
        self.node_tables.values().find(|entry| entry.id == id).cloned()
    }
}
