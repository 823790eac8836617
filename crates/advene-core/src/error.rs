//! Crate-level error type
//!
//! Every fallible operation of the library returns [`Result`]. The variants
//! separate model violations (always a caller bug), resolution failures
//! (which callers may opt out of with the `try_` variants), storage failures
//! (the enclosing transaction is already rolled back when they surface) and
//! discovery failures (nothing claimed a url).

use thiserror::Error;

use crate::backend::StorageError;

/// Errors raised by the package model
#[derive(Error, Debug)]
pub enum Error {
    /// Duplicate id, illegal content transition, use of a closed package...
    #[error("Model violation: {0}")]
    Model(String),

    /// An id-ref goes through an import that is missing or was not loaded
    #[error("Unreachable import '{import}' in package <{package}>")]
    UnreachableImport { package: String, import: String },

    /// The import chain is valid but the final id does not exist
    #[error("No such element '{id}' in package <{package}>")]
    NoSuchElement { package: String, id: String },

    /// Underlying storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Create/bind of a package that is already bound elsewhere
    #[error("Package already in use: {0}")]
    PackageInUse(String),

    /// No backend nor parser claims the url
    #[error("No backend or parser claims '{url}'")]
    NoClaim {
        url: String,
        #[source]
        reason: Option<Box<Error>>,
    },

    /// A content handler failed to parse or unparse data
    #[error("Content error: {0}")]
    Content(String),

    /// External content or remote package could not be fetched
    #[error("Failed to fetch '{url}': {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    pub(crate) fn model(msg: impl Into<String>) -> Self {
        Error::Model(msg.into())
    }

    /// True for the two resolution failures that `try_` lookups swallow
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::UnreachableImport { .. } | Error::NoSuchElement { .. }
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(StorageError::Database(err))
    }
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, Error>;
