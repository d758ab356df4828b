//! Structured reconciliation results.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::error::{MemberStates, ReconcileError};

/// The states of the reconciler's control loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Connecting to the seed host(s) & classifying the cluster.
    Discovering,
    /// The seed host is not yet part of a replica set.
    Uninitiated,
    /// The seed host is part of an initialized replica set.
    Initiated,
    /// Computing & applying a change to the replica set.
    Converging,
    /// Reconciliation finished.
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Discovering => "discovering",
                Self::Uninitiated => "uninitiated",
                Self::Initiated => "initiated",
                Self::Converging => "converging",
                Self::Done => "done",
            }
        )
    }
}

/// The result of a successful reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Outcome {
    /// True if the replica set was changed, or would have been changed in dry run mode.
    pub changed: bool,
    /// True if this run initiated the replica set.
    pub initiated: bool,
    /// True if no changes were submitted to the cluster.
    pub dry_run: bool,
    /// Hosts added to an existing replica set by this run.
    pub added_hosts: Vec<String>,
    /// The live state of each member, read after convergence.
    pub members: MemberStates,
    /// The id of each member of the resulting config.
    pub member_ids: BTreeMap<String, i64>,
    /// The version of the resulting config.
    pub version: i64,
    /// Non-fatal conditions encountered along the way.
    pub warnings: Vec<String>,
}

/// A fatal reconciliation error along with the phase in which it occurred.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Failure {
    pub phase: Phase,
    #[source]
    pub error: ReconcileError,
}

impl Failure {
    /// Create a new instance.
    pub fn new(phase: Phase, error: ReconcileError) -> Self {
        Self { phase, error }
    }
}

/// The serializable report of a failed run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailureReport {
    pub failed: bool,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absent_hosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_hosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<MemberStates>,
}

impl FailureReport {
    /// Build a report from the given error, carrying over whatever diagnostics it holds.
    pub fn new(phase: Option<Phase>, error: &ReconcileError) -> Self {
        let mut report = Self {
            failed: true,
            msg: error.to_string(),
            phase,
            absent_hosts: None,
            new_hosts: None,
            members: None,
        };
        match error {
            ReconcileError::UnsupportedRemoval { absent_hosts, members } => {
                report.absent_hosts = Some(absent_hosts.clone());
                report.members = Some(members.clone());
            }
            ReconcileError::OperationFailure { new_hosts, members, .. } => {
                report.new_hosts = Some(new_hosts.clone()).filter(|hosts| !hosts.is_empty());
                report.members = Some(members.clone()).filter(|members| !members.is_empty());
            }
            _ => (),
        }
        report
    }
}

impl From<&Failure> for FailureReport {
    fn from(failure: &Failure) -> Self {
        Self::new(Some(failure.phase), &failure.error)
    }
}
