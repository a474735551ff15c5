use chdecl_spec::Identity;
use thiserror::Error;

use crate::config::ConfigError;
use crate::declare::DeclError;
use crate::plan::Phase;
use crate::validate::Violations;

#[derive(Debug, Error)]
pub enum Error {
    /// The declaration broke one or more invariants. Nothing was executed.
    #[error("{identity}: invalid declaration: {violations}")]
    Validation {
        identity: Identity,
        violations: Violations,
    },

    /// Other resources depend on the one being dropped. Nothing was executed.
    #[error(
        "{identity}: in use by other resources and cannot be dropped; dependents: [{}]",
        .dependents.join(", ")
    )]
    Conflict {
        identity: Identity,
        dependents: Vec<String>,
    },

    /// The server rejected a statement. Later statements were not attempted.
    #[error("{identity}: {phase} failed: {message} (statement: {statement})")]
    Execution {
        identity: Identity,
        phase: Phase,
        statement: String,
        message: String,
    },

    #[error("{identity}: cancelled during {phase} (statement: {statement})")]
    Cancelled {
        identity: Identity,
        phase: Phase,
        statement: String,
    },

    #[error("{identity}: reading the catalog failed: {message}")]
    Catalog { identity: Identity, message: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("declaration error: {0}")]
    Declaration(#[from] DeclError),
}

impl Error {
    /// The resource the error is about, if any.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Error::Validation { identity, .. }
            | Error::Conflict { identity, .. }
            | Error::Execution { identity, .. }
            | Error::Cancelled { identity, .. }
            | Error::Catalog { identity, .. } => Some(identity),
            Error::Config(_) | Error::Declaration(_) => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
