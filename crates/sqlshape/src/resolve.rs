//! Remote-resolver registration.
//!
//! A remote resolver splices external data into the query result after
//! execution. The SQL layer only writes a placeholder id field
//! (`__<name>_<column>`) into the JSON; the executor collaborator finds
//! registered resolvers here, runs their requests and splices the output
//! over the placeholder. The core performs no I/O itself, so a resolver
//! describes its outbound request rather than executing it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sqlshape_schema::{DbSchema, Rel, RemoteRel, SchemaError};
use thiserror::Error;

/// Free-form resolver properties from configuration.
pub type ResolverProps = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("unknown resolver type: {0}")]
    UnknownType(String),

    #[error("resolver type already registered: {0}")]
    DuplicateType(String),

    #[error("invalid strip path: {0}")]
    InvalidStripPath(String),

    #[error("table '{table}' needs an id column for remote lookups")]
    NoIdColumn { table: String },

    #[error("resolver '{name}' requires the '{prop}' property")]
    MissingProp { name: String, prop: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Configuration for one remote resolver instance.
#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    /// Output field name the resolver fills in.
    pub name: String,
    /// Registered resolver type; `remote_api` is built in.
    pub kind: String,
    /// Table carrying the id column.
    pub table: String,
    /// Id column; the table's primary key when empty.
    pub column: String,
    /// Dotted path stripped from the resolver output before splicing.
    pub strip_path: String,
    pub props: ResolverProps,
}

/// Describes one outbound request for a placeholder id value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// A registered remote resolver. Execution belongs to the caller.
pub trait Resolver: fmt::Debug + Send + Sync {
    fn request(&self, id: &str) -> RemoteRequest;
}

/// The built-in HTTP-shaped resolver: appends the id to a base URL and
/// forwards the configured headers.
#[derive(Debug, Clone)]
pub struct RemoteApi {
    url: String,
    set_headers: Vec<(String, String)>,
    pass_headers: Vec<String>,
}

impl RemoteApi {
    pub(crate) fn from_props(name: &str, props: &ResolverProps) -> Result<Self, ResolverError> {
        let url = props
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ResolverError::MissingProp {
                name: name.to_string(),
                prop: "url".to_string(),
            })?
            .trim_end_matches('/')
            .to_string();

        let mut set_headers = Vec::new();
        if let Some(headers) = props.get("set_headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    set_headers.push((k.clone(), v.to_string()));
                }
            }
        }

        let mut pass_headers = Vec::new();
        if let Some(headers) = props.get("pass_headers").and_then(|v| v.as_array()) {
            for h in headers {
                if let Some(h) = h.as_str() {
                    pass_headers.push(h.to_string());
                }
            }
        }

        Ok(Self {
            url,
            set_headers,
            pass_headers,
        })
    }

    /// Incoming request headers to forward along.
    pub fn pass_headers(&self) -> &[String] {
        &self.pass_headers
    }
}

impl Resolver for RemoteApi {
    fn request(&self, id: &str) -> RemoteRequest {
        RemoteRequest {
            url: format!("{}/{}", self.url, id),
            headers: self.set_headers.clone(),
        }
    }
}

type ResolverFn =
    Box<dyn Fn(&str, &ResolverProps) -> Result<Arc<dyn Resolver>, ResolverError> + Send + Sync>;

/// One registered resolver with its splice bookkeeping.
#[derive(Debug, Clone)]
pub struct ResolverItem {
    /// Placeholder JSON field the executor replaces.
    pub id_field: String,
    /// Path stripped from the resolver output before splicing.
    pub strip_path: Vec<String>,
    pub resolver: Arc<dyn Resolver>,
}

/// Resolver registry: factories by type, instances by `name + table` and
/// by placeholder id field.
pub struct Resolvers {
    factories: HashMap<String, ResolverFn>,
    items: HashMap<String, Arc<ResolverItem>>,
}

impl fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolvers")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .field("items", &self.items.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Resolvers {
    pub fn new() -> Self {
        let mut factories: HashMap<String, ResolverFn> = HashMap::new();
        factories.insert(
            "remote_api".to_string(),
            Box::new(|name, props| {
                let api = RemoteApi::from_props(name, props)?;
                Ok(Arc::new(api) as Arc<dyn Resolver>)
            }),
        );
        Self {
            factories,
            items: HashMap::new(),
        }
    }

    /// Register a resolver factory under a type tag.
    pub fn set_resolver<F>(&mut self, kind: &str, factory: F) -> Result<(), ResolverError>
    where
        F: Fn(&str, &ResolverProps) -> Result<Arc<dyn Resolver>, ResolverError>
            + Send
            + Sync
            + 'static,
    {
        if self.factories.contains_key(kind) {
            return Err(ResolverError::DuplicateType(kind.to_string()));
        }
        self.factories.insert(kind.to_string(), Box::new(factory));
        Ok(())
    }

    /// Register one configured resolver: compute its placeholder id field,
    /// attach the synthetic relationship to the schema and index the
    /// instance for the executor.
    pub fn register(
        &mut self,
        schema: &mut DbSchema,
        rc: &ResolverConfig,
    ) -> Result<(), ResolverError> {
        let ti = schema.table_info(&rc.table, "")?;

        let col = if rc.column.is_empty() {
            ti.primary_col()
                .ok_or_else(|| ResolverError::NoIdColumn {
                    table: rc.table.clone(),
                })?
                .clone()
        } else {
            ti.get_column(&rc.column)?.clone()
        };

        let id_field = format!("__{}_{}", rc.name, col.name);

        schema.set_rel(
            &rc.name,
            &rc.table,
            Rel::Remote(RemoteRel {
                col,
                id_field: id_field.clone(),
            }),
            false,
        )?;

        let factory = self
            .factories
            .get(&rc.kind)
            .ok_or_else(|| ResolverError::UnknownType(rc.kind.clone()))?;
        let resolver = factory(&rc.name, &rc.props)?;

        let item = Arc::new(ResolverItem {
            id_field: id_field.clone(),
            strip_path: parse_strip_path(&rc.strip_path)?,
            resolver,
        });

        tracing::debug!(name = %rc.name, table = %rc.table, field = %id_field, "resolver registered");

        self.items
            .insert(format!("{}{}", rc.name, rc.table), item.clone());
        self.items.insert(id_field, item);
        Ok(())
    }

    /// Look up by resolver name and table.
    pub fn get(&self, name: &str, table: &str) -> Option<&Arc<ResolverItem>> {
        self.items.get(&format!("{name}{table}"))
    }

    /// Look up by the placeholder field found in the result JSON.
    pub fn for_field(&self, id_field: &str) -> Option<&Arc<ResolverItem>> {
        self.items.get(id_field)
    }
}

impl Default for Resolvers {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_strip_path(path: &str) -> Result<Vec<String>, ResolverError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<String> = path.split('.').map(str::to_string).collect();
    if parts.iter().any(String::is_empty) {
        return Err(ResolverError::InvalidStripPath(path.to_string()));
    }
    Ok(parts)
}
