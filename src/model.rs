//! The in-memory namespace and process graph built by discovery.
//!
//! All graph edges are stored as keys rather than references: namespaces are
//! keyed by their inode number (per kind), processes by their PID in the
//! discoverer's PID namespace, and containers by the PID of their initial
//! process. This keeps the graph trivially serializable and lets the wire
//! format reuse the in-memory keys as reference IDs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

use crate::container::ContainerModel;
use crate::discover::DiscoverOpts;
use crate::kind::NamespaceKind;

/// A process identifier in the discoverer's own PID namespace.
pub type Pid = libc::pid_t;

/// The identity of a namespace: its inode on the `nsfs` filesystem.
///
/// The device number is constant per boot, so the inode alone keys all maps;
/// the device is kept when a discovery stage happened to learn it through
/// `fstat`, as evidence only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceId {
    /// Inode number of the namespace on the `nsfs` filesystem.
    pub ino: u64,
    /// Device number of the `nsfs` instance, when known.
    pub dev: Option<u64>,
}

impl NamespaceId {
    /// An identity known only by inode.
    pub fn from_ino(ino: u64) -> NamespaceId {
        NamespaceId { ino, dev: None }
    }
}

/// A single Linux-kernel namespace with all the evidence gathered about it.
///
/// Nodes are created exclusively through [`DiscoveryResult::ensure`], so one
/// kernel namespace is always one node no matter how many discovery stages
/// sighted it; each stage only adds evidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    /// The kind of this namespace.
    pub kind: NamespaceKind,
    /// Its identity.
    pub id: NamespaceId,
    /// PIDs of the processes currently inhabiting this namespace. Empty for
    /// namespaces sighted only through fds, bind mounts, or the hierarchy.
    pub inhabitants: BTreeSet<Pid>,
    /// Open file descriptors referencing this namespace, as (PID, fd) pairs.
    pub fd_refs: BTreeSet<(Pid, i32)>,
    /// Filesystem paths where this namespace is bind-mounted.
    pub bind_mounts: BTreeSet<PathBuf>,
    /// Inode of the parent namespace. Only user and PID namespaces have
    /// parents; `None` for roots and wherever the walk was truncated.
    pub parent: Option<u64>,
    /// Inodes of the child namespaces (user and PID kinds only).
    pub children: BTreeSet<u64>,
    /// Inode of the owning user namespace; `None` for user namespaces
    /// themselves and where ownership could not be queried.
    pub owner: Option<u64>,
    /// For user namespaces, the UID of the task that created the namespace.
    pub owner_uid: Option<libc::uid_t>,
    /// Leader processes: inhabitants whose parent process is missing or
    /// lives in a different namespace of this kind. Sorted most senior
    /// (earliest start time) first.
    pub leaders: Vec<Pid>,
    /// Set when the kernel refused to reveal a parent beyond this
    /// namespace. That is where the caller's capabilities end; for a
    /// genuine root namespace it is also simply the top.
    pub truncated: bool,
    /// Containers whose processes inhabit this namespace, keyed by the
    /// container's initial PID.
    pub containers: BTreeSet<Pid>,
}

impl Namespace {
    /// A fresh node with no evidence attached yet.
    pub fn new(kind: NamespaceKind, ino: u64) -> Namespace {
        Namespace {
            kind,
            id: NamespaceId::from_ino(ino),
            inhabitants: BTreeSet::new(),
            fd_refs: BTreeSet::new(),
            bind_mounts: BTreeSet::new(),
            parent: None,
            children: BTreeSet::new(),
            owner: None,
            owner_uid: None,
            leaders: Vec::new(),
            truncated: false,
            containers: BTreeSet::new(),
        }
    }

    /// The most senior leader process: the leader with the earliest start
    /// time, ties broken towards the lowest PID.
    pub fn senior_leader(&self) -> Option<Pid> {
        self.leaders.first().cloned()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind.format(self.id.ino))?;
        if let Some(owner) = self.owner {
            write!(f, ", owned by user:[{}]", owner)?;
        }
        Ok(())
    }
}

/// A process as read from procfs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// PID in the discoverer's PID namespace.
    pub pid: Pid,
    /// Parent PID; 0 when the process has no visible parent.
    pub ppid: Pid,
    /// Process name, from `/proc/[pid]/comm`.
    pub name: String,
    /// Start time after boot in clock ticks, from `/proc/[pid]/stat`.
    pub starttime: u64,
    /// PIDs of the child processes, reconstructed from their `ppid`.
    pub children: BTreeSet<Pid>,
    /// Namespace links by kind, as namespace inodes. A kind is absent when
    /// its link could not be read, typically for lack of privileges.
    pub namespaces: BTreeMap<NamespaceKind, u64>,
    /// The process's PID in each PID namespace it is visible in, outermost
    /// namespace first, from the `NSpid:` line of `/proc/[pid]/status`.
    pub nspids: Vec<Pid>,
    /// The container this process is the initial process of, or belongs to;
    /// keys into [`ContainerModel::containers`].
    pub container: Option<Pid>,
}

impl Process {
    /// A process known only by its PID.
    pub fn new(pid: Pid) -> Process {
        Process {
            pid,
            ppid: 0,
            name: String::new(),
            starttime: 0,
            children: BTreeSet::new(),
            namespaces: BTreeMap::new(),
            nspids: vec![pid],
            container: None,
        }
    }
}

/// All processes visible at discovery time, keyed by PID.
pub type ProcessTable = BTreeMap<Pid, Process>;

/// The namespaces of one kind, keyed by inode.
pub type NamespaceMap = BTreeMap<u64, Namespace>;

/// One mount point of a mount namespace, from `/proc/[pid]/mountinfo`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Unique mount ID.
    pub mount_id: i64,
    /// Mount ID of the parent mount.
    pub parent_id: i64,
    /// Pathname of the directory in the filesystem forming the root of this
    /// mount; for `nsfs` mounts this is the namespace identity.
    pub root: String,
    /// Mount point relative to the process's root.
    pub mount_point: PathBuf,
    /// Filesystem type.
    pub fs_type: String,
    /// Filesystem-specific source, such as a device path.
    pub source: String,
}

/// Everything one discovery run found.
///
/// The result is only ever written by the discovery pipeline; afterwards it
/// is read-only and must not be shared with a concurrently running
/// discovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// The options this result was discovered with.
    pub options: DiscoverOpts,
    /// All discovered namespaces: kind, then inode.
    pub namespaces: BTreeMap<NamespaceKind, NamespaceMap>,
    /// All discovered processes.
    pub processes: ProcessTable,
    /// Inodes of the user namespaces without a visible parent.
    pub user_roots: Vec<u64>,
    /// Inodes of the PID namespaces without a visible parent.
    pub pid_roots: Vec<u64>,
    /// Mount points per mount namespace, when mount discovery was asked
    /// for; keyed by the mount namespace's inode.
    pub mounts: BTreeMap<u64, Vec<MountPoint>>,
    /// Containers, engines and groups attached by the containerizer.
    pub containers: ContainerModel,
}

impl DiscoveryResult {
    /// An empty result for the given options, with all kind indices
    /// initialised.
    pub fn new(options: DiscoverOpts) -> DiscoveryResult {
        let mut namespaces = BTreeMap::new();
        for kind in NamespaceKind::ALL.iter() {
            namespaces.insert(*kind, NamespaceMap::new());
        }
        DiscoveryResult {
            options,
            namespaces,
            processes: ProcessTable::new(),
            user_roots: Vec::new(),
            pid_roots: Vec::new(),
            mounts: BTreeMap::new(),
            containers: ContainerModel::new(),
        }
    }

    /// The namespaces of one kind.
    pub fn namespaces(&self, kind: NamespaceKind) -> &NamespaceMap {
        &self.namespaces[&kind]
    }

    /// A single namespace, if discovered.
    pub fn namespace(&self, kind: NamespaceKind, ino: u64) -> Option<&Namespace> {
        self.namespaces[&kind].get(&ino)
    }

    /// Fetch or create the node for a namespace identity.
    ///
    /// This is the only constructor used by the discovery stages, which
    /// guarantees one node per kernel namespace; repeated sightings merge
    /// into the same node.
    pub fn ensure(&mut self, kind: NamespaceKind, ino: u64) -> &mut Namespace {
        self.namespaces
            .entry(kind)
            .or_insert_with(NamespaceMap::new)
            .entry(ino)
            .or_insert_with(|| Namespace::new(kind, ino))
    }

    /// Mutable access to a single namespace, if discovered.
    pub fn namespace_mut(&mut self, kind: NamespaceKind, ino: u64) -> Option<&mut Namespace> {
        self.namespaces.get_mut(&kind).and_then(|m| m.get_mut(&ino))
    }
}
