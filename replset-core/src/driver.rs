//! Cluster driver abstraction.
//!
//! A `ClusterDriver` establishes a `ClusterSession` with the seed host(s) of a replica set. The
//! session is the reconciler's only window into the cluster: it reads the config & status
//! documents and submits initiate & reconfigure commands.

use std::fmt;

use async_trait::async_trait;

use crate::error::DriverError;
use crate::model::{ClusterStatusSnapshot, MemberSpec, ReplicaSetConfig};

/// The hosts & replica set which a driver is to connect to.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectTarget {
    /// The host used to initiate a new replica set.
    pub seed: MemberSpec,
    /// The name of the replica set to join.
    pub replica_set: String,
    /// All desired members of the replica set.
    pub hosts: Vec<MemberSpec>,
}

/// Credentials used for the best-effort authentication step.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Create a new instance.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The outcome of connecting to a seed host.
#[derive(Debug)]
pub enum Discovery<S> {
    /// The seed host is a member of the target replica set.
    Joined(S),
    /// The seed host is reachable but is not a member of any replica set yet. The session is a
    /// direct connection to the seed host.
    NotYetInitiated(S),
}

/// A type capable of connecting to a replica set.
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// The session type produced by this driver.
    type Session: ClusterSession;

    /// Connect to the given target, classifying it as initiated or not.
    ///
    /// Any failure to reach the seed host is returned as `DriverError::Connection`.
    async fn connect(&self, target: &ConnectTarget) -> Result<Discovery<Self::Session>, DriverError>;
}

/// An established session with a replica set.
///
/// Dropping the session releases its connections.
#[async_trait]
pub trait ClusterSession: Send {
    /// Authenticate this session with the given credentials.
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DriverError>;

    /// Read the current replica set config.
    ///
    /// Returns `DriverError::NotInitialized` when no replica set has been initiated.
    async fn read_config(&mut self) -> Result<ReplicaSetConfig, DriverError>;

    /// Read the live replica set status.
    async fn read_status(&mut self) -> Result<ClusterStatusSnapshot, DriverError>;

    /// Submit the given config as the initial config of a new replica set.
    async fn initiate(&mut self, config: &ReplicaSetConfig) -> Result<(), DriverError>;

    /// Submit the given config as a replacement of the current config.
    async fn reconfigure(&mut self, config: &ReplicaSetConfig) -> Result<(), DriverError>;
}
