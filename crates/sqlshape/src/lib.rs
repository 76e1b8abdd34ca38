//! sqlshape compiles a role-resolved query tree ("QCode") into a single SQL
//! statement that returns the query result as a ready-shaped JSON document,
//! for PostgreSQL and MySQL.
//!
//! This crate is the front door: it freezes configuration, role rules and
//! remote resolvers into a [`Core`], which then compiles query bundles
//! reentrantly. The layers underneath are usable on their own:
//! `sqlshape-schema` (catalog view), `sqlshape-qcode` (the IR and access
//! rules) and `sqlshape-qgen` (the emitter).

use std::collections::HashMap;
use std::sync::Arc;

use sqlshape_qcode::{
    apply_rules, AccessConfig, AccessControl, QCode, RoleConfig, Select,
};
use sqlshape_schema::DbSchema;

mod error;
mod resolve;

pub use error::Error;
pub use resolve::{
    RemoteApi, RemoteRequest, Resolver, ResolverConfig, ResolverError, ResolverItem,
    ResolverProps, Resolvers,
};

pub use sqlshape_qcode as qcode;
pub use sqlshape_qgen::{Compiler, Metadata, Param};
pub use sqlshape_schema as schema;

/// Execution-time variable bindings, name to raw JSON value. Consumed by
/// the executor collaborator, not by the compiler.
pub type Variables = HashMap<String, Box<serde_json::value::RawValue>>;

/// One role's rules for one table.
#[derive(Debug, Clone)]
pub struct RoleTable {
    pub table: String,
    pub config: RoleConfig,
}

/// A role and the tables it has explicit rules for.
#[derive(Debug, Clone, Default)]
pub struct Role {
    pub name: String,
    pub tables: Vec<RoleTable>,
}

/// Top-level configuration, frozen into a [`Core`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Compile-time variables; see [`sqlshape_qgen::Config`].
    pub vars: HashMap<String, String>,
    /// Role assumed for unauthenticated requests.
    pub default_role: String,
    /// Block queries for roles without explicit rules.
    pub default_block: bool,
    /// Limit applied to selections that specify none.
    pub default_limit: u32,
    pub roles: Vec<Role>,
    pub resolvers: Vec<ResolverConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vars: HashMap::new(),
            default_role: "anon".to_string(),
            default_block: false,
            default_limit: 20,
            roles: Vec::new(),
            resolvers: Vec::new(),
        }
    }
}

/// The assembled compiler: schema view, access rules, resolvers and the
/// SQL emitter, all read-only after construction. Compiles may run
/// concurrently on one `Core`.
#[derive(Debug)]
pub struct Core {
    schema: Arc<DbSchema>,
    access: AccessControl,
    resolvers: Resolvers,
    compiler: Compiler,
}

impl Core {
    /// Build a core from configuration and a schema snapshot.
    ///
    /// Registers every role rule and remote resolver up front; the first
    /// invalid entry aborts construction.
    pub fn new(config: Config, mut schema: DbSchema) -> Result<Self, Error> {
        let mut access = AccessControl::new(AccessConfig {
            default_role: config.default_role.clone(),
            default_block: config.default_block,
            default_limit: config.default_limit,
        });
        for role in &config.roles {
            for rt in &role.tables {
                access.add_role(&schema, &role.name, &rt.table, rt.config.clone())?;
            }
        }

        let mut resolvers = Resolvers::new();
        for rc in &config.resolvers {
            resolvers.register(&mut schema, rc)?;
        }

        tracing::debug!(
            roles = config.roles.len(),
            resolvers = config.resolvers.len(),
            "core ready"
        );

        Ok(Self {
            schema: Arc::new(schema),
            access,
            resolvers,
            compiler: Compiler::new(sqlshape_qgen::Config { vars: config.vars }),
        })
    }

    pub fn schema(&self) -> &Arc<DbSchema> {
        &self.schema
    }

    pub fn resolvers(&self) -> &Resolvers {
        &self.resolvers
    }

    /// Fold the role's rules for this selection's field into the selection.
    pub fn authorize(
        &self,
        sel: &mut Select,
        role: &str,
        have_user: bool,
    ) -> Result<(), Error> {
        let rules = self.access.rules(role, &sel.field_name);
        apply_rules(sel, &rules, have_user, self.access.default_limit())?;
        Ok(())
    }

    /// Compile a query bundle into SQL text plus bind metadata.
    pub fn compile(&self, qc: &QCode) -> Result<(Metadata, String), Error> {
        Ok(self.compiler.compile(qc)?)
    }
}
