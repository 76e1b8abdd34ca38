use sqlshape_qcode::AccessError;
use sqlshape_qgen::CompileError;
use sqlshape_schema::SchemaError;
use thiserror::Error;

use crate::ResolverError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("resolvers: {0}")]
    Resolver(#[from] ResolverError),
}
