//! An in-memory cluster used to drive the reconciler in tests.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::driver::{ClusterDriver, ClusterSession, ConnectTarget, Credentials, Discovery};
use crate::error::DriverError;
use crate::model::{ClusterStatusSnapshot, MemberConfig, MemberStatus, ReplicaSetConfig};

/// The mutable state of a fake cluster.
#[derive(Debug, Default)]
pub struct ClusterState {
    /// The replica set config, `None` while uninitiated.
    pub config: Option<ReplicaSetConfig>,
    /// Fail all connection attempts.
    pub unreachable: bool,
    /// The only credentials which authenticate successfully.
    pub accepted_credentials: Option<Credentials>,
    /// Reject `replSetInitiate` with the given message.
    pub reject_initiate: Option<String>,
    /// Reject `replSetReconfig` with the given message.
    pub reject_reconfigure: Option<String>,
    /// Fail all status reads.
    pub status_unavailable: bool,
    /// Simulate an external writer bumping the config version on every config read after the
    /// given number of reads.
    pub external_bump_after_reads: Option<usize>,
    /// The number of config reads performed.
    pub config_reads: usize,
    /// Mutating commands which reached the cluster, in order.
    pub mutations: Vec<&'static str>,
    /// The number of sessions which have not been released.
    pub open_sessions: usize,
}

/// A fake cluster which implements `ClusterDriver`.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    /// A cluster whose seed host is not yet part of any replica set.
    pub fn uninitiated() -> Self {
        Self::default()
    }

    /// A cluster with an initiated replica set, members assigned ids in the given order.
    pub fn initiated(name: &str, hosts: &[&str]) -> Self {
        let members = hosts.iter().enumerate().map(|(id, host)| MemberConfig::new(id as i64, *host));
        Self::with_config(ReplicaSetConfig {
            name: name.into(),
            version: 1,
            members: members.collect(),
            extra: Default::default(),
        })
    }

    /// A cluster with the given replica set config.
    pub fn with_config(config: ReplicaSetConfig) -> Self {
        let cluster = Self::default();
        cluster.state().config = Some(config);
        cluster
    }

    /// Lock the cluster's state.
    pub fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().expect("fake cluster state lock poisoned")
    }

    /// A copy of the current config.
    pub fn config(&self) -> Option<ReplicaSetConfig> {
        self.state().config.clone()
    }

    fn open_session(&self, target: &ConnectTarget) -> Result<Discovery<FakeSession>, DriverError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(DriverError::Connection(format!("no servers reachable at {}", target.seed)));
        }
        state.open_sessions += 1;
        let session = FakeSession { cluster: self.clone() };
        Ok(match state.config {
            Some(_) => Discovery::Joined(session),
            None => Discovery::NotYetInitiated(session),
        })
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<(), DriverError> {
        match &self.state().accepted_credentials {
            Some(accepted) if accepted == credentials => Ok(()),
            _ => Err(DriverError::Authentication(format!("user `{}` could not be authenticated", credentials.username))),
        }
    }

    fn read_config(&self) -> Result<ReplicaSetConfig, DriverError> {
        let mut state = self.state();
        state.config_reads += 1;
        let bump = matches!(state.external_bump_after_reads, Some(reads) if state.config_reads > reads);
        let config = state.config.as_mut().ok_or(DriverError::NotInitialized)?;
        if bump {
            config.version += 1;
        }
        Ok(config.clone())
    }

    fn read_status(&self) -> Result<ClusterStatusSnapshot, DriverError> {
        let state = self.state();
        if state.status_unavailable {
            return Err(DriverError::Operation {
                code: Some(13),
                message: "not authorized on admin to execute command".into(),
            });
        }
        let config = state.config.as_ref().ok_or(DriverError::NotInitialized)?;
        let members = config
            .members
            .iter()
            .enumerate()
            .map(|(idx, member)| MemberStatus {
                name: member.host.clone(),
                state: if idx == 0 { "PRIMARY".into() } else { "SECONDARY".into() },
            })
            .collect();
        Ok(ClusterStatusSnapshot { members })
    }

    fn initiate(&self, config: &ReplicaSetConfig) -> Result<(), DriverError> {
        let mut state = self.state();
        state.mutations.push("initiate");
        if let Some(message) = state.reject_initiate.clone() {
            return Err(DriverError::Operation { code: Some(93), message });
        }
        if state.config.is_some() {
            return Err(DriverError::Operation {
                code: Some(23),
                message: "already initialized".into(),
            });
        }
        state.config = Some(config.clone());
        Ok(())
    }

    fn reconfigure(&self, config: &ReplicaSetConfig) -> Result<(), DriverError> {
        let mut state = self.state();
        state.mutations.push("reconfigure");
        if let Some(message) = state.reject_reconfigure.clone() {
            return Err(DriverError::Operation { code: Some(103), message });
        }
        let current = state.config.as_ref().ok_or(DriverError::NotInitialized)?;
        if config.version <= current.version {
            return Err(DriverError::Operation {
                code: Some(103),
                message: format!("version field value of {} is out of date; current config version is {}", config.version, current.version),
            });
        }
        state.config = Some(config.clone());
        Ok(())
    }
}

#[async_trait]
impl ClusterDriver for FakeCluster {
    type Session = FakeSession;

    async fn connect(&self, target: &ConnectTarget) -> Result<Discovery<FakeSession>, DriverError> {
        self.open_session(target)
    }
}

/// A session with a `FakeCluster`.
pub struct FakeSession {
    cluster: FakeCluster,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.cluster.state().open_sessions -= 1;
    }
}

#[async_trait]
impl ClusterSession for FakeSession {
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DriverError> {
        self.cluster.authenticate(credentials)
    }

    async fn read_config(&mut self) -> Result<ReplicaSetConfig, DriverError> {
        self.cluster.read_config()
    }

    async fn read_status(&mut self) -> Result<ClusterStatusSnapshot, DriverError> {
        self.cluster.read_status()
    }

    async fn initiate(&mut self, config: &ReplicaSetConfig) -> Result<(), DriverError> {
        self.cluster.initiate(config)
    }

    async fn reconfigure(&mut self, config: &ReplicaSetConfig) -> Result<(), DriverError> {
        self.cluster.reconfigure(config)
    }
}
