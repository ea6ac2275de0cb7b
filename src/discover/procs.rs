//! Reading the process tree and the namespaces its processes inhabit.
//!
//! This stage is the workhorse: every namespace with at least one visible
//! process is guaranteed to be discovered here. Processes that vanish or
//! refuse access mid-scan are skipped without ceremony, as procfs scans are
//! inherently racy.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::*;
use crate::kind::{self, KindMask, NamespaceKind};
use crate::model::{DiscoveryResult, Pid, Process};

/// Scan the procfs root for processes, their parent/child edges and their
/// namespace links, attaching every process to the namespaces it inhabits.
pub(super) fn scan(result: &mut DiscoveryResult) {
    let proc_root = result.options.proc_root.clone();
    let kinds = result.options.kinds;
    let entries = match fs::read_dir(&proc_root) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("cannot read {}: {}", proc_root.display(), err);
            return;
        }
    };

    for entry in entries.flatten() {
        let pid = match entry.file_name().to_str().and_then(|name| name.parse::<Pid>().ok()) {
            Some(pid) if pid > 0 => pid,
            _ => continue,
        };
        let process = match read_process(&proc_root, pid, kinds) {
            Ok(process) => process,
            Err(err) => {
                debug!("skipping process {}: {}", pid, err);
                continue;
            }
        };
        for (kind, ino) in &process.namespaces {
            result.ensure(*kind, *ino).inhabitants.insert(pid);
        }
        result.processes.insert(pid, process);
    }

    // Parent/child edges from the scanned ppids; processes whose parent is
    // invisible (ppid 0, or outside our reach) become roots.
    let edges: Vec<(Pid, Pid)> = result
        .processes
        .values()
        .map(|process| (process.pid, process.ppid))
        .collect();
    for (pid, ppid) in edges {
        if ppid > 0 && ppid != pid {
            if let Some(parent) = result.processes.get_mut(&ppid) {
                parent.children.insert(pid);
            }
        }
    }
}

/// Read one process from procfs: comm, stat, status and namespace links.
fn read_process(proc_root: &Path, pid: Pid, kinds: KindMask) -> Result<Process> {
    let dir = proc_root.join(pid.to_string());

    let mut process = Process::new(pid);
    process.name = fs::read_to_string(dir.join("comm"))?.trim_end().to_string();

    let stat = fs::read_to_string(dir.join("stat"))?;
    let (ppid, starttime) = parse_stat(&stat)?;
    process.ppid = ppid;
    process.starttime = starttime;

    for kind in NamespaceKind::ALL.iter() {
        if !kinds.contains(*kind) {
            continue;
        }
        // A link can be unreadable on its own (privileges, or no time
        // namespace support); that only loses this one link.
        let target = match fs::read_link(dir.join("ns").join(kind.name())) {
            Ok(target) => target,
            Err(_) => continue,
        };
        match target.to_str().map(kind::parse) {
            Some(Ok((link_kind, ino))) if link_kind == *kind => {
                process.namespaces.insert(*kind, ino);
            }
            _ => debug!("process {} has unparseable {} namespace link", pid, kind),
        }
    }

    if let Ok(status) = fs::read_to_string(dir.join("status")) {
        if let Some(nspids) = parse_nspids(&status) {
            process.nspids = nspids;
        }
    }

    Ok(process)
}

/// Pull ppid and starttime out of a `/proc/[pid]/stat` line. The comm field
/// may contain spaces and parentheses, so fields are counted from behind
/// the last closing parenthesis.
fn parse_stat(stat: &str) -> Result<(Pid, u64)> {
    let after_comm = stat
        .rfind(')')
        .map(|pos| &stat[pos + 1..])
        .ok_or("stat line without comm field")?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // After state, ppid is the 2nd and starttime the 20th field.
    if fields.len() < 20 {
        return Err("short stat line".into());
    }
    let ppid = fields[1].parse::<Pid>().chain_err(|| "bad ppid field")?;
    let starttime = fields[19].parse::<u64>().chain_err(|| "bad starttime field")?;
    Ok((ppid, starttime))
}

/// Pull the `NSpid:` column out of `/proc/[pid]/status`: the process's PID
/// in every PID namespace it is visible in, outermost namespace first.
fn parse_nspids(status: &str) -> Option<Vec<Pid>> {
    let line = status.lines().find(|line| line.starts_with("NSpid:"))?;
    let nspids: Vec<Pid> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|field| field.parse::<Pid>().ok())
        .collect();
    if nspids.is_empty() {
        None
    } else {
        Some(nspids)
    }
}
