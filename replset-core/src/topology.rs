//! Topology diffing & member id allocation.
//!
//! Both are pure functions. The reconciler computes a `TopologyDelta` from the desired member
//! list and the hosts of the live config document, and then asks `allocate` for exactly as many
//! ids as there are hosts to add, in one call.

use std::collections::BTreeSet;

use crate::error::DriverError;
use crate::model::MemberSpec;

/// The difference between a desired topology and a live replica set config.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologyDelta {
    /// Desired members which are not part of the live config, in declared order.
    pub absent_from_current: Vec<MemberSpec>,
    /// Live config hosts which are not desired, in config order and as stored in the config.
    pub absent_from_desired: Vec<String>,
}

impl TopologyDelta {
    /// True if the live config already matches the desired topology.
    pub fn is_converged(&self) -> bool {
        self.absent_from_current.is_empty() && self.absent_from_desired.is_empty()
    }
}

/// Compute the difference between the desired members and the hosts of a live config.
///
/// Hosts are compared on their normalized `host:port` form, so a config entry stored as `m0`
/// matches a desired `m0:27017`.
pub fn diff(desired: &[MemberSpec], current: &[String]) -> TopologyDelta {
    let desired_keys: BTreeSet<String> = desired.iter().map(MemberSpec::to_string).collect();
    let current_keys: BTreeSet<String> = current.iter().map(|host| MemberSpec::normalize(host)).collect();

    let mut seen = BTreeSet::new();
    let absent_from_current = desired
        .iter()
        .filter(|member| {
            let key = member.to_string();
            !current_keys.contains(&key) && seen.insert(key)
        })
        .cloned()
        .collect();
    let absent_from_desired = current
        .iter()
        .filter(|host| !desired_keys.contains(&MemberSpec::normalize(host)))
        .cloned()
        .collect();

    TopologyDelta {
        absent_from_current,
        absent_from_desired,
    }
}

/// Allocate `count` fresh member ids.
///
/// Ids start at `max(existing) + 1`, or `0` when there are no existing ids, and are strictly
/// increasing without gaps. Fails when the ids would not fit in an `i64`.
pub fn allocate(existing: &BTreeSet<i64>, count: usize) -> Result<Vec<i64>, DriverError> {
    if count == 0 {
        return Ok(vec![]);
    }
    let max = existing.iter().next_back().copied();
    let start = match max {
        Some(max) => max.checked_add(1),
        None => Some(0),
    };
    let last = start.and_then(|start| i64::try_from(count - 1).ok().and_then(|offset| start.checked_add(offset)));
    match (start, last) {
        (Some(start), Some(last)) => Ok((start..=last).collect()),
        _ => Err(DriverError::Malformed(format!(
            "cannot allocate {} member ids after the existing max id {:?}",
            count, max
        ))),
    }
}
