//! SQL generation.
//!
//! Compiles a [`QCode`] selection tree into one SQL statement whose single
//! result column is a JSON document shaped exactly like the query, plus the
//! [`Metadata`] needed to bind parameters at execution time.
//!
//! The compiler is a pure function of its inputs: configuration is read-only
//! after construction, every call owns its output buffer and metadata, and
//! no I/O happens here. Statements are emitted append-only, front to back,
//! by walking the selection tree with an explicit stack.

use std::collections::HashMap;

use sqlshape_qcode::{QCode, QType};
use sqlshape_schema::SchemaError;
use thiserror::Error;

mod dialect;
mod exp;
mod params;
mod query;

pub use params::{Metadata, Param};

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("{0} compilation is not supported")]
    Unsupported(QType),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("full-text search requires a tsvector column on table '{table}'")]
    MissingTsv { table: String },

    #[error("table '{table}' has no primary key column")]
    MissingPrimary { table: String },

    #[error("selection '{field}' requires a parent selection")]
    MissingParent { field: String },

    #[error("selection '{field}' requires a relationship")]
    MissingRel { field: String },

    #[error("malformed predicate: {0}")]
    MalformedExp(&'static str),
}

/// Compiler configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Variables resolved at compile time. Values prefixed with `sql:` are
    /// trusted fragments inlined verbatim; anything else is inlined as a
    /// quoted literal. Unlisted variables become bind parameters.
    pub vars: HashMap<String, String>,
}

/// The SQL compiler. Cheap to construct, safe to share across threads.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    vars: HashMap<String, String>,
}

impl Compiler {
    pub fn new(config: Config) -> Self {
        Self { vars: config.vars }
    }

    /// Compile a query bundle into SQL text and its metadata.
    pub fn compile(&self, qc: &QCode) -> Result<(Metadata, String), CompileError> {
        let mut buf = String::new();
        let md = self.compile_into(&mut buf, qc)?;
        Ok((md, buf))
    }

    /// Compile into a caller-supplied buffer.
    ///
    /// The buffer contents are unspecified when an error is returned.
    pub fn compile_into(&self, buf: &mut String, qc: &QCode) -> Result<Metadata, CompileError> {
        let mut md = Metadata::new(qc.schema.dialect());

        match qc.qtype {
            QType::Query | QType::Subscription => {
                tracing::debug!(qtype = %qc.qtype, roots = qc.roots.len(), "compiling query");
                let mut ctx = query::Ctx {
                    buf,
                    md: &mut md,
                    qc,
                    vars: &self.vars,
                    sql: dialect::dialect_for(qc.schema.dialect()),
                };
                ctx.compile_query()?;
            }
            QType::Mutation => return Err(CompileError::Unsupported(qc.qtype)),
        }

        Ok(md)
    }
}

/// Quote a SQL identifier, doubling embedded double quotes.
///
/// Identifiers are always quoted to sidestep reserved words (`user`,
/// `order`, `group`, ...).
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    push_ident(&mut out, name);
    out
}

/// Quote a SQL string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    push_literal(&mut out, value);
    out
}

pub(crate) fn push_ident(buf: &mut String, name: &str) {
    buf.push('"');
    for c in name.chars() {
        if c == '"' {
            buf.push('"');
        }
        buf.push(c);
    }
    buf.push('"');
}

pub(crate) fn push_literal(buf: &mut String, value: &str) {
    buf.push('\'');
    for c in value.chars() {
        if c == '\'' {
            buf.push('\'');
        }
        buf.push(c);
    }
    buf.push('\'');
}

#[cfg(test)]
mod tests;
