//! Errors raised while building unit tables and the scanner.
//!
//! Scanning and resolution themselves never fail; everything here is a
//! configuration problem detected at startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("unit alias table is empty")]
    EmptyAliasTable,

    #[error("blank alias for canonical unit '{canonical}'")]
    BlankAlias { canonical: String },

    #[error("canonical unit '{canonical}' is not an alias of itself")]
    CanonicalNotSelfMapped { canonical: String },

    #[error("alias '{alias}' maps to both '{first}' and '{second}'")]
    ConflictingAlias {
        alias: String,
        first: String,
        second: String,
    },

    #[error("entity '{entity}' has no valid units")]
    EmptyEntity { entity: String },

    #[error("entity '{entity}' refers to unit '{unit}' missing from the alias table")]
    UnknownEntityUnit { entity: String, unit: String },

    #[error("failed to compile unit pattern: {0}")]
    Pattern(#[from] regex::Error),
}
