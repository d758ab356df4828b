//! The replica set reconciler.
//!
//! ## Overview
//! A reconciliation run drives a single session through the following states:
//!
//! - `Discovering`: the driver connects to the seed host & the desired hosts, and classifies the
//! cluster as initiated (the seed is a member of the replica set) or uninitiated (the seed is
//! reachable but not a member of any replica set). Any other connection failure is fatal.
//! - `Uninitiated`: a fresh config is built with ids `0..n` in declared order and submitted via
//! `replSetInitiate`.
//! - `Initiated`: the live config is read & diffed against the desired members. Live members
//! which are not desired are never removed; the run fails and reports them. Desired members
//! which are not live are appended with freshly allocated ids and the config is resubmitted
//! with its version bumped by exactly one. If nothing differs, the run is a no-op.
//! - `Done`: the live status is re-read so that the reported member states reflect the cluster
//! after convergence.
//!
//! Authentication is best-effort. A failed attempt is recorded as a warning on the outcome and
//! the run continues unauthenticated, as the admin account may not exist yet.
//!
//! ## Concurrency
//! Reconfiguration is a read-modify-write of the config document. Nothing guards against an
//! external writer reconfiguring the same replica set within that window, other than the
//! cluster's own rejection of a non-increasing version. `ReconcileOptions::guard_version`
//! narrows the window by re-reading the config right before submitting.

use crate::driver::{ClusterDriver, ClusterSession, ConnectTarget, Credentials, Discovery};
use crate::error::{DriverError, MemberStates, ReconcileError};
use crate::model::{DesiredTopology, MemberConfig, MemberSpec, ReplicaSetConfig};
use crate::report::{Failure, Outcome, Phase};
use crate::topology;

/// Options which alter how a reconciliation is applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Plan the change without submitting anything to the cluster.
    pub dry_run: bool,
    /// Re-read the config right before reconfiguring, and abort if its version moved.
    pub guard_version: bool,
}

/// Everything needed for a single reconciliation run.
#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    /// The topology to converge toward.
    pub topology: DesiredTopology,
    /// The host to connect to when initiating a new replica set.
    pub seed: MemberSpec,
    /// Credentials for the best-effort authentication step.
    pub credentials: Option<Credentials>,
    pub options: ReconcileOptions,
}

impl ReconcileConfig {
    /// Create a new instance without credentials & with default options.
    pub fn new(topology: DesiredTopology, seed: MemberSpec) -> Self {
        Self {
            topology,
            seed,
            credentials: None,
            options: ReconcileOptions::default(),
        }
    }

    /// Set the credentials to authenticate with.
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the reconciliation options.
    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// The connection target derived from this config.
    pub fn connect_target(&self) -> ConnectTarget {
        ConnectTarget {
            seed: self.seed.clone(),
            replica_set: self.topology.replica_set().to_string(),
            hosts: self.topology.members().to_vec(),
        }
    }
}

/// The state of the replica set after the converging phase.
struct Convergence {
    changed: bool,
    initiated: bool,
    added_hosts: Vec<String>,
    config: ReplicaSetConfig,
}

/// Replica set reconciler.
pub struct Reconciler<D> {
    driver: D,
}

impl<D: ClusterDriver> Reconciler<D> {
    /// Create a new instance.
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    /// Converge the replica set toward the given config's topology.
    ///
    /// The session opened for this run is released before returning, on every path.
    #[tracing::instrument(level = "debug", skip(self, config), fields(replica_set = %config.topology.replica_set()))]
    pub async fn reconcile(&self, config: &ReconcileConfig) -> Result<Outcome, Failure> {
        let target = config.connect_target();
        tracing::debug!(phase = %Phase::Discovering, seed = %target.seed, "connecting to replica set");
        let (mut session, initiated) = match self.driver.connect(&target).await {
            Ok(Discovery::Joined(session)) => (session, true),
            Ok(Discovery::NotYetInitiated(session)) => (session, false),
            Err(err) => return Err(Failure::new(Phase::Discovering, connection_failure(err))),
        };
        let phase = if initiated { Phase::Initiated } else { Phase::Uninitiated };
        tracing::info!(phase = %phase, seed = %target.seed, "replica set discovered");

        let mut warnings = vec![];
        if let Some(credentials) = &config.credentials {
            if let Err(err) = session.authenticate(credentials).await {
                tracing::warn!(error = %err, username = %credentials.username, "authentication failed, continuing unauthenticated");
                warnings.push(format!("authentication as `{}` failed, continued unauthenticated: {}", credentials.username, err));
            }
        }

        let convergence = if initiated {
            self.converge_initiated(&mut session, config).await?
        } else {
            self.converge_uninitiated(&mut session, config).await?
        };
        Ok(self.finish(&mut session, config, convergence, warnings).await)
    }

    #[tracing::instrument(level = "debug", skip(self, session, config))]
    async fn converge_uninitiated(&self, session: &mut D::Session, config: &ReconcileConfig) -> Result<Convergence, Failure> {
        let initial = ReplicaSetConfig::initial(&config.topology);
        tracing::info!(phase = %Phase::Converging, members = initial.members.len(), dry_run = config.options.dry_run, "initiating replica set");
        if !config.options.dry_run {
            session
                .initiate(&initial)
                .await
                .map_err(|err| Failure::new(Phase::Converging, ReconcileError::operation("unable to initiate replica set", err)))?;
        }
        Ok(Convergence {
            changed: true,
            initiated: true,
            added_hosts: vec![],
            config: initial,
        })
    }

    #[tracing::instrument(level = "debug", skip(self, session, config))]
    async fn converge_initiated(&self, session: &mut D::Session, config: &ReconcileConfig) -> Result<Convergence, Failure> {
        let current = session
            .read_config()
            .await
            .map_err(|err| Failure::new(Phase::Initiated, ReconcileError::operation("unable to read replica set config", err)))?;
        if current.name != config.topology.replica_set() {
            return Err(Failure::new(
                Phase::Initiated,
                ReconcileError::NameMismatch {
                    expected: config.topology.replica_set().to_string(),
                    actual: current.name,
                },
            ));
        }

        let delta = topology::diff(config.topology.members(), &current.hosts());
        if !delta.absent_from_desired.is_empty() {
            tracing::error!(absent_hosts = ?delta.absent_from_desired, "desired topology omits live members, refusing to remove them");
            let members = member_states(session).await;
            return Err(Failure::new(
                Phase::Converging,
                ReconcileError::UnsupportedRemoval {
                    absent_hosts: delta.absent_from_desired,
                    members,
                },
            ));
        }
        if delta.absent_from_current.is_empty() {
            tracing::info!(version = current.version, "replica set already converged");
            return Ok(Convergence {
                changed: false,
                initiated: false,
                added_hosts: vec![],
                config: current,
            });
        }

        let new_hosts: Vec<String> = delta.absent_from_current.iter().map(MemberSpec::to_string).collect();
        let ids = topology::allocate(&current.member_ids(), new_hosts.len())
            .map_err(|err| Failure::new(Phase::Converging, ReconcileError::operation("unable to allocate member ids", err)))?;
        let mut next = current.clone();
        next.members
            .extend(ids.into_iter().zip(new_hosts.iter()).map(|(id, host)| MemberConfig::new(id, host.clone())));
        next.version = current.version + 1;
        tracing::info!(
            phase = %Phase::Converging,
            new_hosts = ?new_hosts,
            version = next.version,
            dry_run = config.options.dry_run,
            "adding replica set members"
        );

        if !config.options.dry_run {
            if config.options.guard_version {
                guard_version(session, current.version, &new_hosts).await?;
            }
            if let Err(err) = session.reconfigure(&next).await {
                let members = member_states(session).await;
                return Err(Failure::new(
                    Phase::Converging,
                    ReconcileError::OperationFailure {
                        context: "unable to add new members",
                        message: err.to_string(),
                        new_hosts,
                        members,
                    },
                ));
            }
        }
        Ok(Convergence {
            changed: true,
            initiated: false,
            added_hosts: new_hosts,
            config: next,
        })
    }

    async fn finish(&self, session: &mut D::Session, config: &ReconcileConfig, convergence: Convergence, mut warnings: Vec<String>) -> Outcome {
        let members = match session.read_status().await {
            Ok(status) => status.states(),
            Err(err) => {
                tracing::warn!(error = %err, "unable to read replica set status after convergence");
                warnings.push(format!("unable to read replica set status: {}", err));
                MemberStates::new()
            }
        };
        tracing::info!(phase = %Phase::Done, changed = convergence.changed, version = convergence.config.version, "reconciliation finished");
        Outcome {
            changed: convergence.changed,
            initiated: convergence.initiated,
            dry_run: config.options.dry_run,
            added_hosts: convergence.added_hosts,
            members,
            member_ids: convergence.config.id_map(),
            version: convergence.config.version,
            warnings,
        }
    }
}

/// Abort if the live config version moved away from the version a change was planned from.
async fn guard_version<S: ClusterSession>(session: &mut S, planned_from: i64, new_hosts: &[String]) -> Result<(), Failure> {
    let latest = session
        .read_config()
        .await
        .map_err(|err| Failure::new(Phase::Converging, ReconcileError::operation("unable to re-read replica set config", err)))?;
    if latest.version == planned_from {
        return Ok(());
    }
    tracing::error!(planned_from, found = latest.version, "replica set config changed while planning");
    let members = member_states(session).await;
    Err(Failure::new(
        Phase::Converging,
        ReconcileError::OperationFailure {
            context: "replica set config changed concurrently",
            message: format!("config version moved from {} to {}", planned_from, latest.version),
            new_hosts: new_hosts.to_vec(),
            members,
        },
    ))
}

/// Read member states for diagnostics, yielding an empty table if the status is unavailable.
async fn member_states<S: ClusterSession>(session: &mut S) -> MemberStates {
    match session.read_status().await {
        Ok(status) => status.states(),
        Err(err) => {
            tracing::debug!(error = %err, "unable to read replica set status for diagnostics");
            MemberStates::new()
        }
    }
}

fn connection_failure(err: DriverError) -> ReconcileError {
    match err {
        DriverError::Unavailable(msg) => ReconcileError::DriverUnavailable(msg),
        other => ReconcileError::ConnectionFailure(other.to_string()),
    }
}
