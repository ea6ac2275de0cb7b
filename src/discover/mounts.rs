//! Finding namespaces kept alive by bind mounts, and reading mount tables.
//!
//! `ip netns add` and friends pin namespaces by bind-mounting their `nsfs`
//! files onto the filesystem. Such namespaces can be completely deserted,
//! so the only evidence is a mount whose filesystem type is `nsfs` and
//! whose root field carries the `kind:[inode]` identity.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::kind::{self, NamespaceKind};
use crate::model::{DiscoveryResult, MountPoint, Pid};

/// Scan the mount table of a reference process for `nsfs` mounts and
/// attribute each mount point to its namespace node.
///
/// PID 1 sees the canonical mount table; when it is unreadable the
/// discoverer's own table serves as fallback.
pub(super) fn scan_bindmounts(result: &mut DiscoveryResult) {
    let proc_root = result.options.proc_root.clone();
    let kinds = result.options.kinds;
    let table = match read_mountinfo(&proc_root, "1").or_else(|| read_mountinfo(&proc_root, "self"))
    {
        Some(table) => table,
        None => {
            debug!("no readable mount table under {}", proc_root.display());
            return;
        }
    };

    for mount in table {
        if mount.fs_type != "nsfs" {
            continue;
        }
        let identity = kind::parse(&mount.root)
            .or_else(|_| kind::parse(trailing_identity(&mount.source)));
        match identity {
            Ok((kind, ino)) if kinds.contains(kind) => {
                result.ensure(kind, ino).bind_mounts.insert(mount.mount_point);
            }
            Ok(_) => {}
            Err(err) => debug!("nsfs mount {} without identity: {}", mount.mount_point.display(), err),
        }
    }
}

/// Collect the full mount table of every mount namespace with a reachable
/// inhabitant, keyed by the mount namespace's inode.
pub(super) fn scan_mount_points(result: &mut DiscoveryResult) {
    let proc_root = result.options.proc_root.clone();
    let witnesses: Vec<(u64, Pid)> = result
        .namespaces(NamespaceKind::Mount)
        .iter()
        .filter_map(|(ino, ns)| ns.inhabitants.iter().next().map(|pid| (*ino, *pid)))
        .collect();
    for (ino, pid) in witnesses {
        if let Some(table) = read_mountinfo(&proc_root, &pid.to_string()) {
            result.mounts.insert(ino, table);
        }
    }
}

/// Read and parse `/proc/<who>/mountinfo`; `None` if unreadable.
fn read_mountinfo(proc_root: &Path, who: &str) -> Option<Vec<MountPoint>> {
    let path = proc_root.join(who).join("mountinfo");
    let text = fs::read_to_string(&path).ok()?;
    Some(parse_mountinfo(&text))
}

/// Parse a `mountinfo` table; malformed lines are dropped.
fn parse_mountinfo(text: &str) -> Vec<MountPoint> {
    text.lines().filter_map(parse_mountinfo_line).collect()
}

/// One `mountinfo` line: mount and parent IDs, root, mount point and
/// optional fields left of the separator, filesystem type and source right
/// of it.
fn parse_mountinfo_line(line: &str) -> Option<MountPoint> {
    let sep = line.find(" - ")?;
    let left: Vec<&str> = line[..sep].split_whitespace().collect();
    let right: Vec<&str> = line[sep + 3..].split_whitespace().collect();
    if left.len() < 5 || right.len() < 2 {
        return None;
    }
    Some(MountPoint {
        mount_id: left[0].parse().ok()?,
        parent_id: left[1].parse().ok()?,
        root: unescape(left[3]),
        mount_point: PathBuf::from(unescape(left[4])),
        fs_type: right[0].to_string(),
        source: unescape(right[1]),
    })
}

/// Undo the octal escaping (`\040` and friends) the kernel applies to
/// whitespace and backslashes in mount fields.
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let mut digits = String::new();
        while digits.len() < 3 {
            match chars.peek() {
                Some(d @ '0'..='7') => {
                    digits.push(*d);
                    chars.next();
                }
                _ => break,
            }
        }
        match u8::from_str_radix(&digits, 8) {
            Ok(byte) if digits.len() == 3 => out.push(byte as char),
            _ => {
                // Not a kernel escape; keep the text as it was.
                out.push('\\');
                out.push_str(&digits);
            }
        }
    }
    out
}

/// The `kind:[inode]` identity some kernels append to an nsfs mount source,
/// as in `nsfs[net:[4026532661]]`.
fn trailing_identity(source: &str) -> &str {
    source
        .find('[')
        .filter(|_| source.ends_with(']'))
        .map(|start| &source[start + 1..source.len() - 1])
        .unwrap_or("")
}
