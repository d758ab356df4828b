//! Runtime parameters.
//!
//! Parameters may be given as command line flags, or read from the environment with the
//! `REPLSET_` prefix, e.g. `REPLSET_HOSTS=mongo0,mongo1:27011`. Both sources accept the same
//! aliases, so `REPLSET_MEMBERS` and `--members` are equivalent to `REPLSET_HOSTS` and `--hosts`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use structopt::StructOpt;

use crate::credentials;
use crate::driver::DriverOptions;
use replset_core::{DesiredTopology, MemberSpec, ReconcileConfig, ReconcileError, ReconcileOptions};

/// The environment variable prefix used for parameters.
pub const ENV_PREFIX: &str = "REPLSET_";

/// Reconciliation parameters.
#[derive(Clone, Deserialize, StructOpt)]
pub struct Params {
    /// The username used to authenticate with.
    #[structopt(long, visible_alias = "user")]
    #[serde(default, alias = "user")]
    pub login_user: Option<String>,
    /// The password used to authenticate with.
    #[structopt(long, visible_alias = "password")]
    #[serde(default, alias = "password")]
    pub login_password: Option<String>,
    /// The first host to connect to when initiating the replica set.
    #[structopt(long, visible_alias = "host", default_value = "localhost")]
    #[serde(default = "Params::default_login_host", alias = "host")]
    pub login_host: String,
    /// Port of the first host to connect to when initiating the replica set.
    #[structopt(long, visible_alias = "port", default_value = "27017")]
    #[serde(default = "Params::default_login_port", alias = "port")]
    pub login_port: u16,
    /// A comma delimited list of replica set members, e.g. `mongo0,mongo1:27011,mongo2:27012`.
    #[structopt(long, visible_alias = "members")]
    #[serde(alias = "members")]
    pub hosts: String,
    /// Name of the replica set to create or connect to. It cannot be changed once initiated.
    #[structopt(long, visible_alias = "replset")]
    #[serde(alias = "replset")]
    pub replica_set: String,

    /// Seconds to wait for a connection to be established.
    #[structopt(long, default_value = "10")]
    #[serde(default = "Params::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds to wait for a suitable server to become available.
    #[structopt(long, default_value = "30")]
    #[serde(default = "Params::default_server_selection_timeout_secs")]
    pub server_selection_timeout_secs: u64,

    /// Plan the change without submitting anything to the cluster.
    #[structopt(long)]
    #[serde(default)]
    pub dry_run: bool,
    /// Re-read the replica set config right before reconfiguring, and abort if it has changed.
    #[structopt(long)]
    #[serde(default)]
    pub guard_version: bool,
    /// The credentials file consulted when neither a username nor a password is given.
    ///
    /// Defaults to `~/.mongodb.cnf`.
    #[structopt(long, parse(from_os_str))]
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
}

/// Validated runtime settings.
#[derive(Clone, Debug)]
pub struct Settings {
    /// The reconciliation to perform.
    pub reconcile: ReconcileConfig,
    /// The configuration of the cluster driver.
    pub driver: DriverOptions,
}

impl Params {
    /// Build params from the environment, using the `REPLSET_` prefix.
    pub fn from_env() -> Result<Self> {
        Self::from_env_prefixed(ENV_PREFIX)
    }

    /// Build params from the environment, using the given prefix.
    pub fn from_env_prefixed(prefix: &str) -> Result<Self> {
        envy::prefixed(prefix).from_env().context("error building params from env")
    }

    /// Validate these params, resolving credentials along the way.
    pub fn validate(self) -> Result<Settings, ReconcileError> {
        let topology = DesiredTopology::parse(self.replica_set.trim(), &self.hosts)?;

        let login_host = self.login_host.trim();
        let login_host = login_host
            .strip_prefix('[')
            .and_then(|host| host.strip_suffix(']'))
            .unwrap_or(login_host);
        if login_host.is_empty() {
            return Err(ReconcileError::InvalidInput("login_host must not be empty".into()));
        }
        if self.login_port == 0 {
            return Err(ReconcileError::InvalidInput("login_port must be between 1 and 65535".into()));
        }
        let seed = MemberSpec::new(login_host, self.login_port);

        if self.connect_timeout_secs == 0 {
            return Err(ReconcileError::InvalidInput("connect_timeout_secs must be greater than 0".into()));
        }
        if self.server_selection_timeout_secs == 0 {
            return Err(ReconcileError::InvalidInput("server_selection_timeout_secs must be greater than 0".into()));
        }
        let driver = DriverOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            server_selection_timeout: Duration::from_secs(self.server_selection_timeout_secs),
        };

        let credentials_file = self.credentials_file.or_else(credentials::default_path);
        let creds = credentials::resolve(self.login_user, self.login_password, credentials_file.as_deref());
        let options = ReconcileOptions {
            dry_run: self.dry_run,
            guard_version: self.guard_version,
        };
        let reconcile = ReconcileConfig::new(topology, seed).with_credentials(creds).with_options(options);
        Ok(Settings { reconcile, driver })
    }

    fn default_login_host() -> String {
        "localhost".into()
    }

    fn default_login_port() -> u16 {
        replset_core::DEFAULT_PORT
    }

    fn default_connect_timeout_secs() -> u64 {
        10
    }

    fn default_server_selection_timeout_secs() -> u64 {
        30
    }
}
