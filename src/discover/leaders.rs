//! Computing leader processes and hierarchy roots.
//!
//! The leaders of a namespace are its topmost inhabitants: processes whose
//! parent is either invisible or lives in a different namespace of the same
//! kind. They are where a renderer branches from a namespace into its
//! process subtrees.

use std::collections::BTreeMap;

use crate::kind::NamespaceKind;
use crate::model::{DiscoveryResult, Pid};

/// Resolve the leaders of every namespace and the roots of the user and
/// PID namespace forests.
pub(super) fn resolve(result: &mut DiscoveryResult) {
    let mut leaders: BTreeMap<(NamespaceKind, u64), Vec<Pid>> = BTreeMap::new();
    for process in result.processes.values() {
        for (kind, ino) in &process.namespaces {
            let in_charge = match result.processes.get(&process.ppid) {
                None => true,
                // A parent with an unknown link for this kind also makes
                // the child a leader; we cannot show it under a parent
                // whose namespace we cannot see.
                Some(parent) => parent.namespaces.get(kind) != Some(ino),
            };
            if in_charge {
                leaders.entry((*kind, *ino)).or_insert_with(Vec::new).push(process.pid);
            }
        }
    }

    let starttimes: BTreeMap<Pid, u64> = result
        .processes
        .values()
        .map(|process| (process.pid, process.starttime))
        .collect();

    for ((kind, ino), mut pids) in leaders {
        // Most senior first.
        pids.sort_by_key(|pid| (starttimes.get(pid).cloned().unwrap_or(0), *pid));
        if let Some(ns) = result.namespace_mut(kind, ino) {
            ns.leaders = pids;
        }
    }

    result.user_roots = roots(result, NamespaceKind::User);
    result.pid_roots = roots(result, NamespaceKind::Pid);
}

/// The namespaces of a kind without a visible parent.
fn roots(result: &DiscoveryResult, kind: NamespaceKind) -> Vec<u64> {
    result
        .namespaces(kind)
        .values()
        .filter(|ns| ns.parent.is_none())
        .map(|ns| ns.id.ino)
        .collect()
}
