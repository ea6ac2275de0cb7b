//! Finding namespaces that are only kept alive by an open file descriptor.
//!
//! A process can hold a namespace open long after the last process left it.
//! Such a namespace never shows up in any `/proc/[pid]/ns/*` link, but its
//! fd's readlink text still carries the `kind:[inode]` identity.

use std::fs;

use log::debug;

use crate::kind;
use crate::model::{DiscoveryResult, Pid};

/// Walk `/proc/[pid]/fd/*` of every process directory and attribute every
/// namespace-typed fd to its namespace node.
///
/// Rescanning is idempotent: the same evidence never creates a second node
/// or a second `(pid, fd)` entry.
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
        let fd_dir = entry.path().join("fd");
        let fds = match fs::read_dir(&fd_dir) {
            Ok(fds) => fds,
            // Reading another user's fd directory needs privileges; losing
            // it only loses fd evidence for that process.
            Err(err) => {
                debug!("cannot read {}: {}", fd_dir.display(), err);
                continue;
            }
        };
        for fd_entry in fds.flatten() {
            let fd = match fd_entry.file_name().to_str().and_then(|name| name.parse::<i32>().ok())
            {
                Some(fd) => fd,
                None => continue,
            };
            // Only namespace fds readlink to `kind:[inode]`; sockets,
            // pipes, anonymous inodes and plain files all parse as
            // something else and are ignored.
            let target = match fs::read_link(fd_entry.path()) {
                Ok(target) => target,
                Err(_) => continue,
            };
            if let Some(Ok((kind, ino))) = target.to_str().map(kind::parse) {
                if kinds.contains(kind) {
                    result.ensure(kind, ino).fd_refs.insert((pid, fd));
                }
            }
        }
    }
}
