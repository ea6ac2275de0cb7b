//! The multi-source namespace discovery pipeline.
//!
//! Discovery merges four sources of evidence into one canonical graph:
//! the `/proc/[pid]/ns/*` links of every process, namespace references held
//! open as file descriptors, `nsfs` bind mounts, and the kernel's
//! namespace-hierarchy ioctls. Every stage funnels its sightings through
//! [`DiscoveryResult::ensure`](crate::model::DiscoveryResult::ensure), so a
//! namespace sighted five ways is still a single node.
//!
//! Discovery deliberately never fails: a process that vanished mid-scan, an
//! unreadable fd directory or a hierarchy cut short by missing privileges
//! merely leave gaps in the evidence, logged at debug level.

mod fds;
mod hierarchy;
mod leaders;
mod mounts;
mod procs;

use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

use crate::container::{attach, Containerizer};
use crate::kind::KindMask;
use crate::model::DiscoveryResult;

/// Options steering a discovery run.
///
/// The two preset constructors are the usual starting points:
/// [`full_discovery`](DiscoverOpts::full_discovery) runs every stage, and
/// [`no_discovery`](DiscoverOpts::no_discovery) runs none, leaving
/// individual stages to be switched back on for surgical discoveries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoverOpts {
    /// Skip scanning processes and their namespace links.
    pub skip_procs: bool,
    /// Skip scanning `/proc/[pid]/fd/*` for namespace references.
    pub skip_fds: bool,
    /// Skip scanning the mount table for `nsfs` bind mounts.
    pub skip_bindmounts: bool,
    /// Skip walking the user/PID namespace hierarchy.
    pub skip_hierarchy: bool,
    /// Skip resolving the owning user namespace of non-user namespaces.
    pub skip_ownership: bool,
    /// Also collect the mount points of every reachable mount namespace.
    pub with_mounts: bool,
    /// Restrict discovery to these namespace kinds.
    pub kinds: KindMask,
    /// Root of the procfs instance to scan; overridable for tests.
    pub proc_root: PathBuf,
}

impl DiscoverOpts {
    /// Run every discovery stage on `/proc`.
    pub fn full_discovery() -> DiscoverOpts {
        DiscoverOpts {
            skip_procs: false,
            skip_fds: false,
            skip_bindmounts: false,
            skip_hierarchy: false,
            skip_ownership: false,
            with_mounts: false,
            kinds: KindMask::all(),
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Run no discovery stage at all.
    pub fn no_discovery() -> DiscoverOpts {
        DiscoverOpts {
            skip_procs: true,
            skip_fds: true,
            skip_bindmounts: true,
            skip_hierarchy: true,
            skip_ownership: true,
            with_mounts: false,
            kinds: KindMask::all(),
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Use a different procfs root, such as a test fixture.
    pub fn scan_procs<P: Into<PathBuf>>(mut self, proc_root: P) -> DiscoverOpts {
        self.proc_root = proc_root.into();
        self
    }
}

impl Default for DiscoverOpts {
    fn default() -> DiscoverOpts {
        DiscoverOpts::full_discovery()
    }
}

/// Discover the namespaces and processes of the host.
///
/// Always returns a fully populated result; evidence the caller lacks the
/// privileges to gather is simply absent from it.
pub fn discover(opts: DiscoverOpts) -> DiscoveryResult {
    let mut result = DiscoveryResult::new(opts);
    if !result.options.skip_procs {
        procs::scan(&mut result);
    }
    if !result.options.skip_fds {
        fds::scan(&mut result);
    }
    if !result.options.skip_bindmounts {
        mounts::scan_bindmounts(&mut result);
    }
    if result.options.with_mounts {
        mounts::scan_mount_points(&mut result);
    }
    if !result.options.skip_hierarchy {
        hierarchy::walk(&mut result);
    }
    leaders::resolve(&mut result);
    result
}

/// Discover as [`discover`] does, then attach container metadata from the
/// given containerizer to the processes and namespaces it found.
pub fn discover_with(opts: DiscoverOpts, containerizer: &dyn Containerizer) -> DiscoveryResult {
    let mut result = discover(opts);
    attach(&mut result, containerizer);
    result
}
