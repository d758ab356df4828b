//! MongoDB cluster driver.
//!
//! Discovery probes the seed & every desired host with an `isMaster` handshake. As soon as one
//! of them reports the target replica set, the cluster is reached through a replica set aware
//! client over all of those hosts, so that commands are routed to the primary. Only when none
//! does is the seed's own state used: a seed which does not belong to any replica set gets a
//! direct connection, which is the only way to submit `replSetInitiate`.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ClientOptions, Credential};
use mongodb::Client;

use replset_core::{
    ClusterDriver, ClusterSession, ClusterStatusSnapshot, ConnectTarget, Credentials, Discovery, DriverError, MemberSpec, ReplicaSetConfig,
};

const ADMIN_DB: &str = "admin";
const APP_NAME: &str = "replset";
/// The server error code returned by replica set commands before the set is initiated.
const CODE_NOT_YET_INITIALIZED: i32 = 94;

/// Driver configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverOptions {
    /// The amount of time to wait for a connection to be established.
    pub connect_timeout: Duration,
    /// The amount of time to wait for a suitable server to become available.
    pub server_selection_timeout: Duration,
}

/// How a host identified itself during the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostState {
    /// The host belongs to the named replica set.
    Member { set_name: String },
    /// The host does not belong to any replica set yet.
    Uninitiated,
}

/// The outcome of a handshake with a single host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub host: MemberSpec,
    /// The host's state, or the reason it could not be reached.
    pub state: Result<HostState, String>,
}

/// The way a cluster is to be reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// At least one probed host belongs to the target replica set.
    ReplicaSet,
    /// No probed host belongs to the target replica set & the seed belongs to none.
    UninitiatedSeed,
    /// No probed host belongs to the target replica set & the seed belongs to another one.
    ForeignSeed { set_name: String },
}

/// Classify a host by its `isMaster` reply.
pub fn classify_handshake(reply: &Document) -> HostState {
    match reply.get_str("setName") {
        Ok(name) if !name.is_empty() => HostState::Member { set_name: name.to_string() },
        _ => HostState::Uninitiated,
    }
}

/// Decide how to reach the cluster, given the handshakes of the seed (first) & desired hosts.
pub fn plan_route(expected: &str, handshakes: &[Handshake]) -> Result<Route, DriverError> {
    let joined = handshakes
        .iter()
        .any(|handshake| matches!(&handshake.state, Ok(HostState::Member { set_name }) if set_name == expected));
    if joined {
        return Ok(Route::ReplicaSet);
    }
    let seed = handshakes
        .first()
        .ok_or_else(|| DriverError::Connection("no hosts to connect to".into()))?;
    match &seed.state {
        Ok(HostState::Uninitiated) => Ok(Route::UninitiatedSeed),
        Ok(HostState::Member { set_name }) => Ok(Route::ForeignSeed { set_name: set_name.clone() }),
        Err(err) => Err(DriverError::Connection(format!(
            "seed host {} is unreachable and no desired host belongs to replica set `{}`: {}",
            seed.host, expected, err
        ))),
    }
}

/// Build a connection string for the given hosts.
pub fn connection_uri(hosts: &[MemberSpec]) -> String {
    let hosts: Vec<String> = hosts.iter().map(ToString::to_string).collect();
    format!("mongodb://{}/", hosts.join(","))
}

/// The hosts used for a replica set aware connection: the seed first, then all desired members.
pub fn replica_set_hosts(target: &ConnectTarget) -> Vec<MemberSpec> {
    let mut hosts = vec![target.seed.clone()];
    for host in target.hosts.iter() {
        if !hosts.contains(host) {
            hosts.push(host.clone());
        }
    }
    hosts
}

/// Map a command error onto a driver error.
pub fn command_error(err: MongoError) -> DriverError {
    match err.kind.as_ref() {
        ErrorKind::Command(command) if command.code == CODE_NOT_YET_INITIALIZED => DriverError::NotInitialized,
        ErrorKind::Command(command) => DriverError::Operation {
            code: Some(command.code),
            message: command.message.clone(),
        },
        ErrorKind::Authentication { message, .. } => DriverError::Authentication(message.clone()),
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => DriverError::Connection(err.to_string()),
        _ => DriverError::Operation {
            code: None,
            message: err.to_string(),
        },
    }
}

fn connection_error(err: MongoError) -> DriverError {
    DriverError::Connection(err.to_string())
}

//////////////////////////////////////////////////////////////////////////////
//////////////////////////////////////////////////////////////////////////////
// MongoDriver ///////////////////////////////////////////////////////////////

/// A `ClusterDriver` backed by the official MongoDB driver.
pub struct MongoDriver {
    options: DriverOptions,
}

impl MongoDriver {
    /// Create a new instance.
    ///
    /// The MongoDB driver runs on the tokio runtime, so this must be called from within one.
    pub fn new(options: DriverOptions) -> Result<Self, DriverError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(DriverError::Unavailable("the MongoDB driver must be used from within a tokio runtime".into()));
        }
        if options.connect_timeout.is_zero() || options.server_selection_timeout.is_zero() {
            return Err(DriverError::Unavailable("driver timeouts must be greater than zero".into()));
        }
        Ok(Self { options })
    }

    /// Build client options for the given hosts.
    ///
    /// Without a replica set name, the client connects directly to the first host & waits no
    /// longer than the connect timeout for it.
    async fn client_options(&self, hosts: &[MemberSpec], replica_set: Option<&str>) -> Result<ClientOptions, DriverError> {
        let uri = connection_uri(hosts);
        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|err| DriverError::Connection(format!("invalid connection string {}: {}", uri, err)))?;
        options.app_name = Some(APP_NAME.into());
        options.connect_timeout = Some(self.options.connect_timeout);
        options.server_selection_timeout = Some(self.options.server_selection_timeout);
        match replica_set {
            Some(name) => options.repl_set_name = Some(name.into()),
            None => {
                options.direct_connection = Some(true);
                options.server_selection_timeout = Some(self.options.connect_timeout.min(self.options.server_selection_timeout));
            }
        }
        Ok(options)
    }

    /// Open a direct session with the given host.
    async fn direct_session(&self, host: &MemberSpec) -> Result<MongoSession, DriverError> {
        let options = self.client_options(std::slice::from_ref(host), None).await?;
        let client = Client::with_options(options.clone()).map_err(connection_error)?;
        Ok(MongoSession::new(client, options))
    }

    /// Ask the given host which replica set it belongs to.
    async fn handshake(&self, host: &MemberSpec) -> Result<HostState, DriverError> {
        let session = self.direct_session(host).await?;
        let reply = session
            .client
            .database(ADMIN_DB)
            .run_command(doc! {"isMaster": 1}, None)
            .await
            .map_err(connection_error)?;
        Ok(classify_handshake(&reply))
    }
}

#[async_trait]
impl ClusterDriver for MongoDriver {
    type Session = MongoSession;

    #[tracing::instrument(level = "debug", skip(self, target), fields(seed = %target.seed))]
    async fn connect(&self, target: &ConnectTarget) -> Result<Discovery<MongoSession>, DriverError> {
        let hosts = replica_set_hosts(target);
        let mut handshakes = Vec::with_capacity(hosts.len());
        for host in hosts.iter() {
            let state = self.handshake(host).await.map_err(|err| err.to_string());
            tracing::debug!(host = %host, state = ?state, "host handshake");
            let joined = matches!(&state, Ok(HostState::Member { set_name }) if *set_name == target.replica_set);
            handshakes.push(Handshake { host: host.clone(), state });
            if joined {
                break;
            }
        }

        match plan_route(&target.replica_set, &handshakes)? {
            Route::ReplicaSet => {
                let options = self.client_options(&hosts, Some(&target.replica_set)).await?;
                let client = Client::with_options(options.clone()).map_err(connection_error)?;
                client
                    .database(ADMIN_DB)
                    .run_command(doc! {"ping": 1}, None)
                    .await
                    .map_err(connection_error)?;
                tracing::debug!(replica_set = %target.replica_set, "connected to replica set");
                Ok(Discovery::Joined(MongoSession::new(client, options)))
            }
            Route::UninitiatedSeed => {
                tracing::debug!("no desired host is a member of the replica set, seed host is uninitiated");
                Ok(Discovery::NotYetInitiated(self.direct_session(&target.seed).await?))
            }
            // Keep a direct connection, the set name is checked against the stored config.
            Route::ForeignSeed { set_name } => {
                tracing::warn!(replica_set = %set_name, expected = %target.replica_set, "seed host belongs to another replica set");
                Ok(Discovery::Joined(self.direct_session(&target.seed).await?))
            }
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
//////////////////////////////////////////////////////////////////////////////
// MongoSession //////////////////////////////////////////////////////////////

/// A session with a MongoDB deployment.
pub struct MongoSession {
    client: Client,
    options: ClientOptions,
}

impl MongoSession {
    fn new(client: Client, options: ClientOptions) -> Self {
        Self { client, options }
    }

    /// Run the given command against the admin database.
    async fn command(&self, command: Document) -> Result<Document, DriverError> {
        self.client.database(ADMIN_DB).run_command(command, None).await.map_err(command_error)
    }
}

impl Drop for MongoSession {
    fn drop(&mut self) {
        tracing::debug!(hosts = ?self.options.hosts, "releasing cluster session");
    }
}

#[async_trait]
impl ClusterSession for MongoSession {
    #[tracing::instrument(level = "debug", skip(self, credentials), fields(username = %credentials.username))]
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DriverError> {
        let mut options = self.options.clone();
        options.credential = Some(
            Credential::builder()
                .username(credentials.username.clone())
                .password(credentials.password.clone())
                .source(ADMIN_DB.to_string())
                .build(),
        );
        let client = Client::with_options(options.clone()).map_err(connection_error)?;
        client
            .database(ADMIN_DB)
            .run_command(doc! {"connectionStatus": 1}, None)
            .await
            .map_err(command_error)?;
        self.client = client;
        self.options = options;
        Ok(())
    }

    async fn read_config(&mut self) -> Result<ReplicaSetConfig, DriverError> {
        let mut reply = self.command(doc! {"replSetGetConfig": 1}).await?;
        match reply.remove("config") {
            Some(Bson::Document(config)) => ReplicaSetConfig::from_document(config),
            _ => Err(DriverError::Malformed("replSetGetConfig reply has no `config` document".into())),
        }
    }

    async fn read_status(&mut self) -> Result<ClusterStatusSnapshot, DriverError> {
        let reply = self.command(doc! {"replSetGetStatus": 1}).await?;
        ClusterStatusSnapshot::from_document(&reply)
    }

    #[tracing::instrument(level = "debug", skip(self, config), fields(version = config.version))]
    async fn initiate(&mut self, config: &ReplicaSetConfig) -> Result<(), DriverError> {
        self.command(doc! {"replSetInitiate": config.to_document()}).await.map(|_| ())
    }

    #[tracing::instrument(level = "debug", skip(self, config), fields(version = config.version))]
    async fn reconfigure(&mut self, config: &ReplicaSetConfig) -> Result<(), DriverError> {
        self.command(doc! {"replSetReconfig": config.to_document()}).await.map(|_| ())
    }
}
