//! Read-only schema view consumed by the sqlshape compiler.
//!
//! Holds table and column metadata, the server dialect/version tags, and the
//! relationship descriptors that link a child table to its parent. The
//! compiler never mutates this; the only post-construction write is
//! [`DbSchema::set_rel`], used by the resolver layer to register synthetic
//! relationships before any compile begins.

use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

mod inflect;
mod rel;

pub use inflect::{pluralize, singularize};
pub use rel::{Rel, RelCols, RecursiveRel, RemoteRel, ThroughRel};

/// Target SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    Mysql,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
        }
    }

    /// Parse a dialect tag. Anything that is not "mysql" is PostgreSQL.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "mysql" => Dialect::Mysql,
            _ => Dialect::Postgres,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON column flavor, selects the `*_to_recordset` function for embedded
/// relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonType {
    Json,
    #[default]
    Jsonb,
}

impl JsonType {
    pub fn as_str(self) -> &'static str {
        match self {
            JsonType::Json => "json",
            JsonType::Jsonb => "jsonb",
        }
    }
}

/// A database column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbColumn {
    /// Owning table name.
    pub table: String,
    pub name: String,
    /// SQL type name as reported by the catalog (e.g. "bigint", "text").
    pub sql_type: String,
    pub array: bool,
    pub not_null: bool,
    pub primary_key: bool,
    /// True for tsvector columns.
    pub full_text: bool,
}

impl DbColumn {
    pub fn new(table: impl Into<String>, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            sql_type: sql_type.into(),
            ..Self::default()
        }
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn full_text(mut self) -> Self {
        self.full_text = true;
        self
    }
}

/// Metadata for one table.
#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    /// Database schema the table lives in ("" means the default).
    pub schema: String,
    pub name: String,
    /// JSON flavor for embedded recordsets derived from this table.
    pub json_type: JsonType,
    pub columns: Vec<DbColumn>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, columns: Vec<DbColumn>) -> Self {
        Self {
            schema: String::new(),
            name: name.into(),
            json_type: JsonType::default(),
            columns,
        }
    }

    pub fn get_column(&self, name: &str) -> Result<&DbColumn, SchemaError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| SchemaError::ColumnNotFound {
                table: self.name.clone(),
                column: name.to_string(),
            })
    }

    /// The primary key column, when the table has one.
    pub fn primary_col(&self) -> Option<&DbColumn> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// The tsvector column used for full-text matching, when present.
    pub fn tsv_col(&self) -> Option<&DbColumn> {
        self.columns.iter().find(|c| c.full_text)
    }
}

#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("table '{table}' not found")]
    TableNotFound { table: String },

    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("relationship '{name}' already registered on table '{table}'")]
    RelExists { name: String, table: String },
}

/// The schema catalog handed to the compiler.
///
/// Tables are registered up front; relationship descriptors between
/// selections arrive pre-resolved inside QCode, so the `rels` registry here
/// only carries synthetic entries added through [`DbSchema::set_rel`].
#[derive(Debug, Clone, Default)]
pub struct DbSchema {
    dialect: Dialect,
    /// Integer server version, e.g. 110000 for PostgreSQL 11.0.
    version: u32,
    tables: IndexMap<String, TableInfo>,
    rels: IndexMap<(String, String), Rel>,
}

impl DbSchema {
    pub fn new(dialect: Dialect, version: u32) -> Self {
        Self {
            dialect,
            version,
            ..Self::default()
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn add_table(&mut self, ti: TableInfo) {
        self.tables.insert(ti.name.clone(), ti);
    }

    /// Look up a table by name. Accepts the singular or plural spelling so
    /// role and resolver configs can use either form.
    pub fn table_info(&self, name: &str, _schema: &str) -> Result<&TableInfo, SchemaError> {
        if let Some(ti) = self.tables.get(name) {
            return Ok(ti);
        }
        let singular = singularize(name);
        if let Some(ti) = self.tables.get(singular.as_str()) {
            return Ok(ti);
        }
        let plural = pluralize(name);
        self.tables
            .get(plural.as_str())
            .ok_or_else(|| SchemaError::TableNotFound {
                table: name.to_string(),
            })
    }

    /// Register a synthetic relationship under `(name, table)`.
    ///
    /// Used by the remote-resolver layer to attach placeholder fields to a
    /// table. Fails on duplicates unless `overwrite` is set.
    pub fn set_rel(
        &mut self,
        name: &str,
        table: &str,
        rel: Rel,
        overwrite: bool,
    ) -> Result<(), SchemaError> {
        let key = (name.to_string(), table.to_string());
        if !overwrite && self.rels.contains_key(&key) {
            return Err(SchemaError::RelExists {
                name: name.to_string(),
                table: table.to_string(),
            });
        }
        self.rels.insert(key, rel);
        Ok(())
    }

    pub fn rel(&self, name: &str, table: &str) -> Option<&Rel> {
        self.rels
            .get(&(name.to_string(), table.to_string()))
    }
}
