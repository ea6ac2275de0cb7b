//! Walking the user and PID namespace hierarchies and resolving ownership.
//!
//! User and PID namespaces nest; all other kinds are flat but are *owned*
//! by a user namespace. Both relations are only reachable through ioctls on
//! open namespace files (`ioctl_ns(2)`), which also reveal namespaces no
//! process inhabits any more. Ancestors found this way enter the result
//! with hierarchy evidence only.
//!
//! The kernel answers `NS_GET_PARENT` with `EPERM` both at a genuine root
//! and where the caller's capabilities end; the walk cannot tell the two
//! apart and records both as a chain that ends here.

use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;

use log::debug;
use nix::errno::Errno;

use crate::kind::NamespaceKind;
use crate::model::DiscoveryResult;
use crate::nsio;

/// Walk the parent chains of every discovered user and PID namespace, then
/// resolve the owning user namespace of every other namespace.
pub(super) fn walk(result: &mut DiscoveryResult) {
    for kind in &[NamespaceKind::User, NamespaceKind::Pid] {
        if !result.options.kinds.contains(*kind) {
            continue;
        }
        let inos: Vec<u64> = result.namespaces(*kind).keys().cloned().collect();
        for ino in inos {
            if let Some((fd, dev)) = reference(result, *kind, ino) {
                if let Some(ns) = result.namespace_mut(*kind, ino) {
                    if ns.id.dev.is_none() {
                        ns.id.dev = dev;
                    }
                }
                climb(result, *kind, ino, fd);
            }
        }
    }
    if !result.options.skip_ownership && result.options.kinds.contains(NamespaceKind::User) {
        resolve_owners(result);
    }
}

/// Open a namespace through any of its evidence: an inhabitant's `ns/`
/// link, a referencing fd, or a bind mount, tried in that order. The open
/// file is verified by inode so that recycled PIDs or repurposed fds cannot
/// smuggle in a different namespace.
fn reference(
    result: &DiscoveryResult,
    kind: NamespaceKind,
    ino: u64,
) -> Option<(OwnedFd, Option<u64>)> {
    let ns = result.namespace(kind, ino)?;
    let proc_root = &result.options.proc_root;
    let mut candidates: Vec<PathBuf> = Vec::new();
    for pid in &ns.inhabitants {
        candidates.push(proc_root.join(pid.to_string()).join("ns").join(kind.name()));
    }
    for (pid, fd) in &ns.fd_refs {
        candidates.push(proc_root.join(pid.to_string()).join("fd").join(fd.to_string()));
    }
    for path in &ns.bind_mounts {
        candidates.push(path.clone());
    }

    for path in candidates {
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(_) => continue,
        };
        match nsio::identity_of(file.as_raw_fd()) {
            Ok(id) if id.ino == ino => return Some((file.into(), id.dev)),
            _ => continue,
        }
    }
    None
}

/// Walk from one namespace up its parent chain, inserting ancestors not
/// seen before, until the chain joins an already-walked part of the result
/// or the kernel refuses to go further.
fn climb(result: &mut DiscoveryResult, kind: NamespaceKind, ino: u64, fd: OwnedFd) {
    let mut current_ino = ino;
    let mut current_fd = fd;
    if kind == NamespaceKind::User {
        fill_owner_uid(result, current_ino, current_fd.as_fd());
    }

    loop {
        let parent_fd = match nsio::parent_of(current_fd.as_fd()) {
            Ok(fd) => fd,
            Err(Errno::EPERM) => {
                // End of our visibility; genuine roots answer the same way.
                if let Some(ns) = result.namespace_mut(kind, current_ino) {
                    ns.truncated = true;
                }
                return;
            }
            Err(err) => {
                // ENOTTY/EINVAL: the kernel predates the hierarchy ioctls.
                debug!("no parent of {}: {}", kind.format(current_ino), err);
                return;
            }
        };
        let id = match nsio::identity_of(parent_fd.as_raw_fd()) {
            Ok(id) => id,
            Err(err) => {
                debug!("cannot stat parent of {}: {}", kind.format(current_ino), err);
                return;
            }
        };

        let seen_before = result.namespace(kind, id.ino).is_some();
        let parent = result.ensure(kind, id.ino);
        if parent.id.dev.is_none() {
            parent.id.dev = id.dev;
        }
        parent.children.insert(current_ino);
        if let Some(ns) = result.namespace_mut(kind, current_ino) {
            ns.parent = Some(id.ino);
        }
        if kind == NamespaceKind::User {
            fill_owner_uid(result, id.ino, parent_fd.as_fd());
        }

        if seen_before {
            // The chain above this ancestor was closed by an earlier walk.
            return;
        }
        current_ino = id.ino;
        current_fd = parent_fd;
    }
}

/// Record the creating UID of a user namespace.
fn fill_owner_uid(result: &mut DiscoveryResult, ino: u64, fd: BorrowedFd) {
    match nsio::owner_uid_of(fd) {
        Ok(uid) => {
            if let Some(ns) = result.namespace_mut(NamespaceKind::User, ino) {
                ns.owner_uid = Some(uid);
            }
        }
        Err(err) => debug!("cannot read owner UID of user:[{}]: {}", ino, err),
    }
}

/// Set the owning user namespace of every non-user namespace, pulling
/// owners that no other evidence found into the result and closing their
/// parent chains.
fn resolve_owners(result: &mut DiscoveryResult) {
    for kind in NamespaceKind::ALL.iter().filter(|kind| **kind != NamespaceKind::User) {
        if !result.options.kinds.contains(*kind) {
            continue;
        }
        let inos: Vec<u64> = result
            .namespaces(*kind)
            .iter()
            .filter(|(_, ns)| ns.owner.is_none())
            .map(|(ino, _)| *ino)
            .collect();
        for ino in inos {
            let (fd, _) = match reference(result, *kind, ino) {
                Some(found) => found,
                None => continue,
            };
            let owner_fd = match nsio::userns_of(fd.as_fd()) {
                Ok(owner_fd) => owner_fd,
                Err(err) => {
                    debug!("cannot find owner of {}: {}", kind.format(ino), err);
                    continue;
                }
            };
            let id = match nsio::identity_of(owner_fd.as_raw_fd()) {
                Ok(id) => id,
                Err(_) => continue,
            };

            let known = result.namespace(NamespaceKind::User, id.ino).is_some();
            let owner = result.ensure(NamespaceKind::User, id.ino);
            if owner.id.dev.is_none() {
                owner.id.dev = id.dev;
            }
            if let Some(ns) = result.namespace_mut(*kind, ino) {
                ns.owner = Some(id.ino);
            }
            if !known {
                climb(result, NamespaceKind::User, id.ino, owner_fd);
            }
        }
    }
}
