//! Table schema: ordered columns with stable ids and key roles.
//!
//! The concatenation (hash columns, range columns) uniquely identifies
//! a row. Schema carries a monotonically increasing version; a client
//! presenting an older version than the tablet's gets a
//! schema-version-mismatch response rather than an error.

use crate::core::error::{Result, Status};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable column identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ColumnId(pub i32);

impl std::fmt::Display for ColumnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    Bool,
    Int32,
    Int64,
    Double,
    String,
    Binary,
    Timestamp,
}

/// Role a column plays in the row key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    /// Participates in the partition hash.
    Hash,
    /// Ordered within a hash bucket.
    Range,
    /// Not part of the key.
    Regular,
}

/// Sort order of a range column or serialized sub-document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// One column of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
    pub role: KeyRole,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl Column {
    pub fn new(id: i32, name: impl Into<String>, logical_type: LogicalType, role: KeyRole) -> Self {
        Self {
            id: ColumnId(id),
            name: name.into(),
            logical_type,
            nullable: role == KeyRole::Regular,
            role,
            sort_order: SortOrder::Ascending,
        }
    }

    pub fn is_key(&self) -> bool {
        self.role != KeyRole::Regular
    }
}

/// An ordered list of columns plus a schema version.
#[derive(Debug, Clone)]
pub struct TableSchema {
    columns: Vec<Column>,
    version: u32,
    by_id: HashMap<ColumnId, usize>,
}

impl TableSchema {
    /// Build a schema, validating id and name uniqueness and that hash
    /// columns precede range columns which precede regular columns.
    pub fn new(columns: Vec<Column>, version: u32) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(columns.len());
        let mut names = HashMap::with_capacity(columns.len());
        let mut last_role_rank = 0;
        for (index, column) in columns.iter().enumerate() {
            if by_id.insert(column.id, index).is_some() {
                return Err(Status::AlreadyPresent(format!(
                    "duplicate column id {}",
                    column.id
                )));
            }
            if names.insert(column.name.clone(), index).is_some() {
                return Err(Status::AlreadyPresent(format!(
                    "duplicate column name {:?}",
                    column.name
                )));
            }
            let rank = match column.role {
                KeyRole::Hash => 0,
                KeyRole::Range => 1,
                KeyRole::Regular => 2,
            };
            if rank < last_role_rank {
                return Err(Status::invalid_argument(
                    "columns must be ordered hash, range, regular",
                ));
            }
            last_role_rank = rank;
        }
        Ok(Self {
            columns,
            version,
            by_id,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_by_id(&self, id: ColumnId) -> Result<&Column> {
        self.by_id
            .get(&id)
            .map(|&index| &self.columns[index])
            .ok_or_else(|| Status::not_found(format!("column {} not found", id)))
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_key_column(&self, id: ColumnId) -> bool {
        self.by_id
            .get(&id)
            .map(|&index| self.columns[index].is_key())
            .unwrap_or(false)
    }

    pub fn hash_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.role == KeyRole::Hash)
    }

    pub fn range_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.role == KeyRole::Range)
    }

    pub fn num_hash_columns(&self) -> usize {
        self.hash_columns().count()
    }

    pub fn num_range_columns(&self) -> usize {
        self.range_columns().count()
    }

    /// Projection of the non-key columns among `column_refs`, sorted by
    /// column id. Unknown ids are ignored, matching the behavior of a
    /// client running with a slightly older schema.
    pub fn projection(&self, column_refs: &[ColumnId]) -> Projection {
        let mut ids: Vec<ColumnId> = column_refs
            .iter()
            .copied()
            .filter(|&id| self.by_id.contains_key(&id) && !self.is_key_column(id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Projection { column_ids: ids }
    }
}

/// A sorted set of non-key column ids to materialize during a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    column_ids: Vec<ColumnId>,
}

impl Projection {
    pub fn column_ids(&self) -> &[ColumnId] {
        &self.column_ids
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.column_ids.binary_search(&id).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.column_ids.is_empty()
    }
}
