//! Translating PIDs between PID namespaces.
//!
//! A process has one PID per PID namespace on the branch between its own
//! namespace and the root. The kernel exposes the whole column in the
//! `NSpid:` line of `/proc/[pid]/status`; combining those columns with the
//! PID namespace hierarchy yields a map that can translate any (namespace,
//! PID) pair into any other namespace on the same branch.

use std::collections::HashMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::kind::NamespaceKind;
use crate::model::{DiscoveryResult, Pid};

/// One entry of a process's PID column: its PID in one PID namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacedPid {
    /// Inode of the PID namespace.
    pub nsid: u64,
    /// The process's PID in that namespace.
    pub pid: Pid,
}

/// A map translating PIDs between the PID namespaces of one discovery.
///
/// Serializes as the list of per-process PID columns, which is also the
/// shape the map is rebuilt from on deserialization.
#[derive(Clone, Debug, Default)]
pub struct PidMap {
    /// (PID namespace inode, PID in that namespace) to the canonical
    /// process, identified by its PID column.
    index: HashMap<(u64, Pid), usize>,
    /// One PID column per process, outermost namespace first.
    columns: Vec<Vec<NamespacedPid>>,
}

impl PidMap {
    /// Build the translation map for a discovery result.
    ///
    /// Processes whose PID namespace is unknown do not translate; processes
    /// whose namespace chain is partly invisible translate within the
    /// visible part.
    pub fn new(result: &DiscoveryResult) -> PidMap {
        let mut map = PidMap::default();
        for process in result.processes.values() {
            let own = match process.namespaces.get(&NamespaceKind::Pid) {
                Some(ino) => *ino,
                None => continue,
            };
            // The ancestor chain of the process's PID namespace, turned
            // outermost-first to align with the NSpid column.
            let mut chain = vec![own];
            let mut cursor = own;
            while let Some(parent) = result
                .namespace(NamespaceKind::Pid, cursor)
                .and_then(|ns| ns.parent)
            {
                chain.push(parent);
                cursor = parent;
            }
            chain.reverse();

            // Both sequences end at the process's own namespace, so a
            // truncated chain or column still aligns from the innermost
            // end.
            let depth = chain.len().min(process.nspids.len());
            let column: Vec<NamespacedPid> = chain[chain.len() - depth..]
                .iter()
                .zip(process.nspids[process.nspids.len() - depth..].iter())
                .map(|(nsid, pid)| NamespacedPid { nsid: *nsid, pid: *pid })
                .collect();
            map.insert_column(column);
        }
        map
    }

    /// Translate a PID valid in one PID namespace into the corresponding
    /// PID in another.
    ///
    /// `None` when the source pair is unknown, or when the target namespace
    /// is not on the process's branch of the PID namespace forest, which
    /// includes translating between disjoint forests.
    pub fn translate(&self, pid: Pid, from_nsid: u64, to_nsid: u64) -> Option<Pid> {
        let column = &self.columns[*self.index.get(&(from_nsid, pid))?];
        column.iter().find(|entry| entry.nsid == to_nsid).map(|entry| entry.pid)
    }

    /// The number of known processes.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the map knows no process at all.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn insert_column(&mut self, column: Vec<NamespacedPid>) {
        let slot = self.columns.len();
        for entry in &column {
            self.index.insert((entry.nsid, entry.pid), slot);
        }
        self.columns.push(column);
    }
}

impl Serialize for PidMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.columns.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PidMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let columns = Vec::<Vec<NamespacedPid>>::deserialize(deserializer)?;
        let mut map = PidMap::default();
        for column in columns {
            if column.is_empty() {
                return Err(D::Error::custom("empty PID column"));
            }
            map.insert_column(column);
        }
        Ok(map)
    }
}
