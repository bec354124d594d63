use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for every phase of the migration engine.
#[derive(Debug, Error)]
pub enum MigrError {
    #[error("preflight failed: {} supported, {} unsupported", supported.len(), unsupported.len())]
    PreflightFailed {
        supported: Vec<String>,
        unsupported: Vec<String>,
    },

    #[error("schema file not found: {path}")]
    SchemaNotFound { path: PathBuf },

    #[error("source database not found in {dir}; non-conforming files: {non_conforming:?}")]
    SourceDbNotFound {
        dir: PathBuf,
        non_conforming: Vec<String>,
    },

    #[error("introspection of {file} failed: {cause}")]
    IntrospectionFailed { file: PathBuf, cause: String },

    #[error("copy of table {table} failed: {cause}")]
    CopyFailed { table: String, cause: String },

    #[error("missing identity mapping for {table}:{src_pk}")]
    MissingIdentityMapping { table: String, src_pk: i64 },

    #[error("write rejected: migration is draining the source database")]
    WriteRejected,

    #[error("replay of transaction {txn_id} failed: {cause}")]
    ReplayFailed { txn_id: String, cause: String },

    #[error("update referencing unmapped source pk {src_pk} in table {table}")]
    UnmappedUpdate { table: String, src_pk: i64 },

    #[error("cutover blocked: drain_completed={drain_completed}")]
    CutoverBlocked { drain_completed: bool },

    #[error("cleanup refused: {reason}")]
    CleanupRefused { reason: String },

    #[error("reset refused: {reason}")]
    ResetRefused { reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MigrError>;
