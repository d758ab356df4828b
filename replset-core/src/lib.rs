//! Replica set topology reconciliation.
//!
//! Given a desired replica set topology and a connection to a live cluster, the `Reconciler`
//! either initiates a new replica set, appends missing members to an existing one, or does
//! nothing when the two already match. Members are never removed.

pub mod driver;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod model;
pub mod reconciler;
pub mod report;
pub mod topology;

pub use driver::{ClusterDriver, ClusterSession, ConnectTarget, Credentials, Discovery};
pub use error::{DriverError, MemberStates, ReconcileError};
pub use model::{ClusterStatusSnapshot, DesiredTopology, MemberConfig, MemberSpec, MemberStatus, ReplicaSetConfig, DEFAULT_PORT};
pub use reconciler::{ReconcileConfig, ReconcileOptions, Reconciler};
pub use report::{Failure, FailureReport, Outcome, Phase};
