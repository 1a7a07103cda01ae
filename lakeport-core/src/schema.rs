//! Discovered schemas and projection onto the requested selection.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::connection::SqlDialect;
use crate::error::SchemaError;
use crate::request::DatasetSelection;
use crate::typemap;
use crate::types::LogicalType;

/// Column as reported by live introspection of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredColumn {
    pub name: String,
    pub native_type: String,
    /// Full parameterized spelling, e.g. `decimal(10,2)`, when known.
    pub type_text: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub comment: Option<String>,
    /// Engine that reported `native_type`, for engine-specific spellings.
    #[serde(skip)]
    pub dialect: Option<SqlDialect>,
}

impl DiscoveredColumn {
    pub fn new(name: impl Into<String>, native_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
            type_text: None,
            nullable: true,
            primary_key: false,
            precision: None,
            scale: None,
            comment: None,
            dialect: None,
        }
    }

    pub fn logical_type(&self) -> LogicalType {
        typemap::resolve_type(
            self.dialect,
            &self.native_type,
            self.type_text.as_deref(),
            self.precision,
            self.scale,
        )
    }
}

/// All columns of one discovered table, in source ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<DiscoveredColumn>,
    pub comment: Option<String>,
}

impl DiscoveredTable {
    pub fn column(&self, name: &str) -> Option<&DiscoveredColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Column definition used for extraction and destination DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub native_type: String,
    pub logical: LogicalType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl From<&DiscoveredColumn> for ColumnDef {
    fn from(column: &DiscoveredColumn) -> Self {
        Self {
            name: column.name.clone(),
            native_type: column.native_type.clone(),
            logical: column.logical_type(),
            nullable: column.nullable,
            primary_key: column.primary_key,
        }
    }
}

/// Execution-ready table: only the requested columns, in requested order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Per-table execution schemas for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSchema {
    pub tables: Vec<TableSchema>,
}

impl ExecutionSchema {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Table names requested by a selection, first occurrence wins.
pub fn requested_tables(selection: &DatasetSelection) -> Vec<&str> {
    let mut seen = HashSet::new();
    selection
        .tables
        .iter()
        .map(|t| t.name.as_str())
        .filter(|name| seen.insert(*name))
        .collect()
}

/// Intersect the requested selection with discovery.
///
/// Fails on the first requested column (or table) that discovery does not
/// know; nothing is extracted in that case.
pub fn project(
    selection: &DatasetSelection,
    discovered: &[DiscoveredTable],
) -> Result<ExecutionSchema, SchemaError> {
    let mut seen = HashSet::new();
    let mut tables = Vec::new();

    for request in &selection.tables {
        if !seen.insert(request.name.as_str()) {
            continue;
        }
        let table = discovered
            .iter()
            .find(|t| t.name == request.name && !t.columns.is_empty())
            .ok_or_else(|| SchemaError::MissingTable {
                schema: selection.schema_name.clone(),
                table: request.name.clone(),
            })?;

        let columns = if request.columns.is_empty() {
            table.columns.iter().map(ColumnDef::from).collect()
        } else {
            let mut picked = Vec::with_capacity(request.columns.len());
            let mut picked_names = HashSet::new();
            for wanted in &request.columns {
                let column =
                    table
                        .column(&wanted.name)
                        .ok_or_else(|| SchemaError::MissingColumn {
                            table: table.name.clone(),
                            column: wanted.name.clone(),
                            available: table.column_names(),
                        })?;
                if picked_names.insert(column.name.as_str()) {
                    picked.push(ColumnDef::from(column));
                }
            }
            picked
        };

        tables.push(TableSchema {
            schema: selection.schema_name.clone(),
            name: table.name.clone(),
            columns,
        });
    }

    if tables.is_empty() {
        return Err(SchemaError::EmptySelection);
    }
    Ok(ExecutionSchema { tables })
}
