//! Reconciler error abstractions.

use std::collections::BTreeMap;

use thiserror::Error;

/// A mapping of member host names to their reported replica set state.
pub type MemberStates = BTreeMap<String, String>;

/// Errors produced by a cluster driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// No seed host could be reached, or the seed host could not be classified.
    #[error("{0}")]
    Connection(String),
    /// The target node is not part of an initialized replica set.
    #[error("replica set has not been initialized")]
    NotInitialized,
    /// The given credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The cluster rejected a command.
    #[error("{message}")]
    Operation { code: Option<i32>, message: String },
    /// A document returned by the cluster did not have the expected shape.
    #[error("malformed document: {0}")]
    Malformed(String),
    /// The driver can not be used in the current process.
    #[error("{0}")]
    Unavailable(String),
}

/// Reconciliation error variants.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No seed host could be reached.
    #[error("unable to connect to database: {0}")]
    ConnectionFailure(String),
    /// The desired topology omits members which are currently part of the replica set.
    #[error("removing replica set members is not supported, absent hosts: {}", .absent_hosts.join(", "))]
    UnsupportedRemoval { absent_hosts: Vec<String>, members: MemberStates },
    /// The live replica set carries a different name than the desired one.
    #[error("replica set is named `{actual}`, expected `{expected}`")]
    NameMismatch { expected: String, actual: String },
    /// The cluster rejected an operation.
    #[error("{context}: {message}")]
    OperationFailure {
        context: &'static str,
        message: String,
        new_hosts: Vec<String>,
        members: MemberStates,
    },
    /// The given input was invalid.
    #[error("validation error: {0}")]
    InvalidInput(String),
    /// The cluster driver could not be constructed.
    #[error("cluster driver unavailable: {0}")]
    DriverUnavailable(String),
}

impl ReconcileError {
    /// Build an `OperationFailure` without host diagnostics.
    pub fn operation(context: &'static str, err: impl ToString) -> Self {
        Self::OperationFailure {
            context,
            message: err.to_string(),
            new_hosts: vec![],
            members: MemberStates::new(),
        }
    }
}

impl From<DriverError> for ReconcileError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Connection(msg) => Self::ConnectionFailure(msg),
            DriverError::Unavailable(msg) => Self::DriverUnavailable(msg),
            other => Self::operation("cluster operation failed", other),
        }
    }
}
