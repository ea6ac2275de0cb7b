//! Namespace kinds and the textual `kind:[inode]` identity notation.
//!
//! Linux provides a namespaces API. Every namespace belongs to one of eight
//! kinds, and each kind corresponds to one `CLONE_NEW*` bit of the `clone`
//! and `unshare` syscalls. The kernel names namespaces in the `kind:[inode]`
//! notation wherever they surface as text, such as the targets of the
//! `/proc/[pid]/ns/*` symlinks; this module parses and produces that
//! notation.

use std::fmt;

use serde_derive::{Deserialize, Serialize};

use crate::error::*;

/// The kind of a Linux-kernel namespace.
///
/// The `time` kind only exists on kernels 5.6 and later; discovery simply
/// never sights it on older kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NamespaceKind {
    /// Mount points.
    #[serde(rename = "mnt")]
    Mount,
    /// Control group roots.
    #[serde(rename = "cgroup")]
    Cgroup,
    /// Hostname and NIS domain name.
    #[serde(rename = "uts")]
    Uts,
    /// System V IPC and POSIX message queues.
    #[serde(rename = "ipc")]
    Ipc,
    /// User and group IDs, capabilities, and namespace ownership.
    #[serde(rename = "user")]
    User,
    /// Process IDs.
    #[serde(rename = "pid")]
    Pid,
    /// Network devices, stacks, ports.
    #[serde(rename = "net")]
    Net,
    /// System clock offsets.
    #[serde(rename = "time")]
    Time,
}

impl NamespaceKind {
    /// All eight kinds, in the order used for kind-indexed tables.
    pub const ALL: [NamespaceKind; 8] = [
        NamespaceKind::Mount,
        NamespaceKind::Cgroup,
        NamespaceKind::Uts,
        NamespaceKind::Ipc,
        NamespaceKind::User,
        NamespaceKind::Pid,
        NamespaceKind::Net,
        NamespaceKind::Time,
    ];

    /// The short kind name as used by the kernel in `/proc/[pid]/ns/`.
    pub fn name(self) -> &'static str {
        match self {
            NamespaceKind::Mount => "mnt",
            NamespaceKind::Cgroup => "cgroup",
            NamespaceKind::Uts => "uts",
            NamespaceKind::Ipc => "ipc",
            NamespaceKind::User => "user",
            NamespaceKind::Pid => "pid",
            NamespaceKind::Net => "net",
            NamespaceKind::Time => "time",
        }
    }

    /// Look a kind up by its short kernel name.
    pub fn from_name(name: &str) -> Option<NamespaceKind> {
        match name {
            "mnt" => Some(NamespaceKind::Mount),
            "cgroup" => Some(NamespaceKind::Cgroup),
            "uts" => Some(NamespaceKind::Uts),
            "ipc" => Some(NamespaceKind::Ipc),
            "user" => Some(NamespaceKind::User),
            "pid" => Some(NamespaceKind::Pid),
            "net" => Some(NamespaceKind::Net),
            "time" => Some(NamespaceKind::Time),
            _ => None,
        }
    }

    /// The `CLONE_NEW*` bit identifying this kind.
    ///
    /// See `clone(2)` and `namespaces(7)` for more information.
    pub fn flag(self) -> u64 {
        match self {
            NamespaceKind::Mount => 0x0002_0000,
            NamespaceKind::Cgroup => 0x0200_0000,
            NamespaceKind::Uts => 0x0400_0000,
            NamespaceKind::Ipc => 0x0800_0000,
            NamespaceKind::User => 0x1000_0000,
            NamespaceKind::Pid => 0x2000_0000,
            NamespaceKind::Net => 0x4000_0000,
            NamespaceKind::Time => 0x0000_0080,
        }
    }

    /// Look a kind up by its `CLONE_NEW*` bit.
    pub fn from_flag(flag: u64) -> Option<NamespaceKind> {
        NamespaceKind::ALL.iter().cloned().find(|kind| kind.flag() == flag)
    }

    /// Format an inode as an identity string of this kind.
    pub fn format(self, ino: u64) -> String {
        format!("{}:[{}]", self.name(), ino)
    }

    /// Parse an identity that must belong to this kind.
    ///
    /// Accepts either a bare decimal inode number or the full
    /// `kind:[inode]` notation with a matching kind. Identities of another
    /// kind are rejected.
    pub fn parse_id(self, text: &str) -> Result<u64> {
        if let Ok(ino) = parse_ino(text) {
            return Ok(ino);
        }
        match parse(text) {
            Ok((kind, ino)) if kind == self => Ok(ino),
            _ => Err(ErrorKind::InvalidKindNamespaceId(self.name(), text.to_string()).into()),
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse a `kind:[inode]` identity string.
///
/// The kind must be one of the eight kind names and the inode a decimal
/// number; anything else, including trailing garbage, is rejected.
pub fn parse(text: &str) -> Result<(NamespaceKind, u64)> {
    let invalid = || Error::from(ErrorKind::InvalidNamespaceId(text.to_string()));

    let colon = text.find(':').ok_or_else(invalid)?;
    let kind = NamespaceKind::from_name(&text[..colon]).ok_or_else(invalid)?;
    let rest = &text[colon + 1..];
    if !rest.starts_with('[') || !rest.ends_with(']') || rest.len() < 3 {
        return Err(invalid());
    }
    let ino = parse_ino(&rest[1..rest.len() - 1]).map_err(|_| invalid())?;
    Ok((kind, ino))
}

/// Parse a plain decimal inode number, strictly.
fn parse_ino(text: &str) -> Result<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ErrorKind::InvalidNamespaceId(text.to_string()).into());
    }
    text.parse::<u64>()
        .map_err(|_| ErrorKind::InvalidNamespaceId(text.to_string()).into())
}

/// A set of namespace kinds, stored as OR'ed `CLONE_NEW*` bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindMask(u64);

impl KindMask {
    /// The empty set.
    pub fn empty() -> KindMask {
        KindMask(0)
    }

    /// All eight kinds.
    pub fn all() -> KindMask {
        KindMask::of(&NamespaceKind::ALL)
    }

    /// The set containing exactly the given kinds.
    pub fn of(kinds: &[NamespaceKind]) -> KindMask {
        KindMask(kinds.iter().fold(0, |bits, kind| bits | kind.flag()))
    }

    /// Build a set from raw `CLONE_NEW*` bits; unknown bits are dropped.
    pub fn from_bits(bits: u64) -> KindMask {
        KindMask(bits & KindMask::all().0)
    }

    /// Add a kind to the set.
    pub fn insert(&mut self, kind: NamespaceKind) {
        self.0 |= kind.flag();
    }

    /// Whether the set contains the given kind.
    pub fn contains(self, kind: NamespaceKind) -> bool {
        self.0 & kind.flag() != 0
    }

    /// Whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The raw OR'ed `CLONE_NEW*` bits.
    pub fn bits(self) -> u64 {
        self.0
    }
}

impl Default for KindMask {
    fn default() -> KindMask {
        KindMask::all()
    }
}
