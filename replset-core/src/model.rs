//! Replica set data model.
//!
//! The `ReplicaSetConfig` type mirrors the configuration document owned by the cluster. Only
//! the fields which the reconciler reasons about are lifted into typed fields; everything else
//! (settings, priorities, votes, tags, etc) is carried along verbatim in `extra` so that a
//! read-modify-write cycle never drops data the cluster put there.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use bson::{Bson, Document};
use serde::{Serialize, Serializer};

use crate::error::{DriverError, MemberStates, ReconcileError};

/// The conventional port of a replica set member.
pub const DEFAULT_PORT: u16 = 27017;
/// The config version of a freshly initiated replica set.
pub const INITIAL_CONFIG_VERSION: i64 = 1;

//////////////////////////////////////////////////////////////////////////////
// MemberSpec ////////////////////////////////////////////////////////////////

/// A replica set member's network location.
///
/// Members are compared on their joined `host:port` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberSpec {
    host: String,
    port: u16,
}

impl MemberSpec {
    /// Create a new instance.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// The member's host name or IP address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The member's port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Normalize the given `host[:port]` string to its joined `host:port` form.
    ///
    /// Values which do not parse are returned unchanged, so that they still compare unequal to
    /// everything which does.
    pub fn normalize(raw: &str) -> String {
        raw.parse::<MemberSpec>().map(|spec| spec.to_string()).unwrap_or_else(|_| raw.to_string())
    }
}

impl fmt::Display for MemberSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for MemberSpec {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = |reason: &str| ReconcileError::InvalidInput(format!("invalid member host `{}`: {}", raw, reason));

        // Bracketed IPv6 literal, with an optional port.
        let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("unterminated `[`"))?;
            match tail {
                "" => (host, None),
                _ => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(invalid("unexpected characters after `]`")),
                },
            }
        } else {
            match raw.split_once(':') {
                Some((_, tail)) if tail.contains(':') => return Err(invalid("IPv6 addresses must be enclosed in `[]`")),
                Some((host, port)) => (host, Some(port)),
                None => (raw, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("host must not be empty"));
        }
        let port = match port {
            None => DEFAULT_PORT,
            Some(port) => match port.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => return Err(invalid("port must be a number between 1 and 65535")),
            },
        };
        Ok(Self::new(host, port))
    }
}

impl Serialize for MemberSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

//////////////////////////////////////////////////////////////////////////////
// DesiredTopology ///////////////////////////////////////////////////////////

/// The declaratively specified topology which a replica set is to be converged toward.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredTopology {
    replica_set: String,
    members: Vec<MemberSpec>,
}

impl DesiredTopology {
    /// Create a new instance, validating the given inputs.
    ///
    /// Duplicate members are dropped, keeping the position of their first occurrence.
    pub fn new(replica_set: impl Into<String>, members: impl IntoIterator<Item = MemberSpec>) -> Result<Self, ReconcileError> {
        let replica_set = replica_set.into();
        if replica_set.trim().is_empty() {
            return Err(ReconcileError::InvalidInput("replica set name must not be empty".into()));
        }
        let mut seen = BTreeSet::new();
        let members: Vec<_> = members.into_iter().filter(|member| seen.insert(member.to_string())).collect();
        if members.is_empty() {
            return Err(ReconcileError::InvalidInput("at least one replica set member is required".into()));
        }
        Ok(Self { replica_set, members })
    }

    /// Parse a comma delimited list of `host[:port]` members.
    pub fn parse(replica_set: impl Into<String>, hosts: &str) -> Result<Self, ReconcileError> {
        let members = hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(MemberSpec::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(replica_set, members)
    }

    /// The name of the replica set.
    pub fn replica_set(&self) -> &str {
        &self.replica_set
    }

    /// The desired members, in declared order.
    pub fn members(&self) -> &[MemberSpec] {
        &self.members
    }
}

//////////////////////////////////////////////////////////////////////////////
// ReplicaSetConfig //////////////////////////////////////////////////////////

/// A member entry of a replica set config document.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberConfig {
    /// The member's identity, unique within its config.
    pub id: i64,
    /// The member's `host:port`.
    pub host: String,
    /// All other fields of the member entry.
    pub extra: Document,
}

impl MemberConfig {
    /// Create a new member entry carrying only an id and a host.
    pub fn new(id: i64, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            extra: Document::new(),
        }
    }
}

/// A replica set configuration document.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaSetConfig {
    /// The name of the replica set, stored as the document's `_id`.
    pub name: String,
    /// The config's revision counter.
    pub version: i64,
    /// The member entries of the config.
    pub members: Vec<MemberConfig>,
    /// All other fields of the config document.
    pub extra: Document,
}

impl ReplicaSetConfig {
    /// Build the config used to initiate a new replica set.
    ///
    /// Members are assigned ids `0..n` in their declared order.
    pub fn initial(topology: &DesiredTopology) -> Self {
        let members = topology
            .members()
            .iter()
            .enumerate()
            .map(|(id, member)| MemberConfig::new(id as i64, member.to_string()))
            .collect();
        Self {
            name: topology.replica_set().to_string(),
            version: INITIAL_CONFIG_VERSION,
            members,
            extra: Document::new(),
        }
    }

    /// The hosts of all members, as stored in the config.
    pub fn hosts(&self) -> Vec<String> {
        self.members.iter().map(|member| member.host.clone()).collect()
    }

    /// The ids of all members.
    pub fn member_ids(&self) -> BTreeSet<i64> {
        self.members.iter().map(|member| member.id).collect()
    }

    /// A mapping of member hosts to their ids.
    pub fn id_map(&self) -> BTreeMap<String, i64> {
        self.members.iter().map(|member| (member.host.clone(), member.id)).collect()
    }

    /// Parse a config from the document returned by the cluster.
    pub fn from_document(mut doc: Document) -> Result<Self, DriverError> {
        let name = match doc.remove("_id") {
            Some(Bson::String(name)) => name,
            other => return Err(malformed("_id", "a string", other.as_ref())),
        };
        let version = match doc.remove("version") {
            Some(val) => as_i64(&val).ok_or_else(|| malformed("version", "an integer", Some(&val)))?,
            None => return Err(malformed("version", "an integer", None)),
        };
        let members = match doc.remove("members") {
            Some(Bson::Array(members)) => members
                .into_iter()
                .map(|member| match member {
                    Bson::Document(member) => Self::member_from_document(member),
                    other => Err(malformed("members", "an array of documents", Some(&other))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(malformed("members", "an array", other.as_ref())),
        };
        Ok(Self {
            name,
            version,
            members,
            extra: doc,
        })
    }

    fn member_from_document(mut doc: Document) -> Result<MemberConfig, DriverError> {
        let id = match doc.remove("_id") {
            Some(val) => as_i64(&val).ok_or_else(|| malformed("members._id", "an integer", Some(&val)))?,
            None => return Err(malformed("members._id", "an integer", None)),
        };
        let host = match doc.remove("host") {
            Some(Bson::String(host)) => host,
            other => return Err(malformed("members.host", "a string", other.as_ref())),
        };
        Ok(MemberConfig { id, host, extra: doc })
    }

    /// Render this config as a document suitable for `replSetInitiate` or `replSetReconfig`.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("_id", self.name.clone());
        doc.insert("version", int_bson(self.version));
        for (key, val) in self.extra.iter() {
            doc.insert(key.clone(), val.clone());
        }
        let members: Vec<Bson> = self
            .members
            .iter()
            .map(|member| {
                let mut entry = Document::new();
                entry.insert("_id", int_bson(member.id));
                entry.insert("host", member.host.clone());
                for (key, val) in member.extra.iter() {
                    entry.insert(key.clone(), val.clone());
                }
                Bson::Document(entry)
            })
            .collect();
        doc.insert("members", members);
        doc
    }
}

//////////////////////////////////////////////////////////////////////////////
// ClusterStatusSnapshot /////////////////////////////////////////////////////

/// The live state of a single replica set member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberStatus {
    /// The member's `host:port`.
    pub name: String,
    /// The member's state, e.g. `PRIMARY` or `SECONDARY`.
    pub state: String,
}

/// A snapshot of the live replica set status, used only for reporting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterStatusSnapshot {
    pub members: Vec<MemberStatus>,
}

impl ClusterStatusSnapshot {
    /// A mapping of member names to their states.
    pub fn states(&self) -> MemberStates {
        self.members.iter().map(|member| (member.name.clone(), member.state.clone())).collect()
    }

    /// Parse a snapshot from a `replSetGetStatus` reply.
    pub fn from_document(doc: &Document) -> Result<Self, DriverError> {
        let members = doc
            .get_array("members")
            .map_err(|err| DriverError::Malformed(format!("status `members`: {}", err)))?
            .iter()
            .filter_map(Bson::as_document)
            .map(|member| {
                let name = member
                    .get_str("name")
                    .map_err(|err| DriverError::Malformed(format!("status `members.name`: {}", err)))?;
                let state = member.get_str("stateStr").unwrap_or("UNKNOWN");
                Ok(MemberStatus {
                    name: name.to_string(),
                    state: state.to_string(),
                })
            })
            .collect::<Result<Vec<_>, DriverError>>()?;
        Ok(Self { members })
    }
}

fn as_i64(val: &Bson) -> Option<i64> {
    match val {
        Bson::Int32(val) => Some(*val as i64),
        Bson::Int64(val) => Some(*val),
        Bson::Double(val) if val.fract() == 0.0 => Some(*val as i64),
        _ => None,
    }
}

/// Integers are written back as 32-bit values when they fit, matching how the cluster stores them.
fn int_bson(val: i64) -> Bson {
    match i32::try_from(val) {
        Ok(val) => Bson::Int32(val),
        Err(_) => Bson::Int64(val),
    }
}

fn malformed(field: &str, expected: &str, found: Option<&Bson>) -> DriverError {
    match found {
        Some(val) => DriverError::Malformed(format!("config field `{}` must be {}, found {}", field, expected, val)),
        None => DriverError::Malformed(format!("config field `{}` must be {}, found nothing", field, expected)),
    }
}
