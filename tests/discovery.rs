//! Discovery against hand-built procfs fixtures.
//!
//! The fixtures are throwaway directory trees shaped like a procfs:
//! namespace links are dangling symlinks whose readlink text carries the
//! identity, exactly what discovery parses. The hierarchy ioctls cannot
//! work on fixtures, which is fine: their refusal must be tolerated.

use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use tempfile::TempDir;

use nscensus::{discover, DiscoverOpts, DiscoveryResult, KindMask, NamespaceKind};

/// Builder for fake procfs trees.
struct FakeProc {
    dir: TempDir,
}

impl FakeProc {
    fn new() -> FakeProc {
        FakeProc { dir: TempDir::new().unwrap() }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn opts(&self) -> DiscoverOpts {
        DiscoverOpts::full_discovery().scan_procs(self.path())
    }

    /// Add a process directory with comm, stat and namespace links.
    fn process(
        &self,
        pid: i32,
        ppid: i32,
        comm: &str,
        starttime: u64,
        namespaces: &[(NamespaceKind, u64)],
    ) -> &Self {
        let dir = self.path().join(pid.to_string());
        fs::create_dir_all(dir.join("ns")).unwrap();
        fs::write(dir.join("comm"), format!("{}\n", comm)).unwrap();
        fs::write(
            dir.join("stat"),
            format!(
                "{} ({}) S {} 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 {} 0 0\n",
                pid, comm, ppid, starttime
            ),
        )
        .unwrap();
        for (kind, ino) in namespaces {
            symlink(kind.format(*ino), dir.join("ns").join(kind.name())).unwrap();
        }
        self
    }

    /// Add an `NSpid:` status line for a process.
    fn nspids(&self, pid: i32, nspids: &[i32]) -> &Self {
        let column: Vec<String> = nspids.iter().map(|pid| pid.to_string()).collect();
        fs::write(
            self.path().join(pid.to_string()).join("status"),
            format!("Name:\tx\nPid:\t{}\nNSpid:\t{}\n", pid, column.join("\t")),
        )
        .unwrap();
        self
    }

    /// Add an open fd of a process, readlinking to `target`.
    fn fd(&self, pid: i32, fd: i32, target: &str) -> &Self {
        let fd_dir = self.path().join(pid.to_string()).join("fd");
        fs::create_dir_all(&fd_dir).unwrap();
        symlink(target, fd_dir.join(fd.to_string())).unwrap();
        self
    }

    /// Set the mountinfo table of a process.
    fn mountinfo(&self, pid: i32, table: &str) -> &Self {
        fs::write(self.path().join(pid.to_string()).join("mountinfo"), table).unwrap();
        self
    }
}

/// The seven kinds every kernel has, with distinct fixture inodes.
fn seven_namespaces() -> Vec<(NamespaceKind, u64)> {
    vec![
        (NamespaceKind::Mount, 4026531840),
        (NamespaceKind::Cgroup, 4026531835),
        (NamespaceKind::Uts, 4026531838),
        (NamespaceKind::Ipc, 4026531839),
        (NamespaceKind::User, 4026531837),
        (NamespaceKind::Pid, 4026531836),
        (NamespaceKind::Net, 4026531905),
    ]
}

/// The structural invariants every discovery result must satisfy.
fn assert_invariants(result: &DiscoveryResult) {
    // Process links index into the result, and the linked namespaces point
    // back at their inhabitants.
    for process in result.processes.values() {
        for (kind, ino) in &process.namespaces {
            let ns = result
                .namespace(*kind, *ino)
                .unwrap_or_else(|| panic!("{} link of {} not indexed", kind, process.pid));
            assert!(
                ns.inhabitants.contains(&process.pid),
                "{} missing inhabitant {}",
                ns,
                process.pid
            );
        }
    }
    for kind in NamespaceKind::ALL.iter() {
        for ns in result.namespaces(*kind).values() {
            for pid in &ns.inhabitants {
                assert_eq!(
                    result.processes[pid].namespaces.get(kind),
                    Some(&ns.id.ino),
                    "inhabitant {} of {} does not link back",
                    pid,
                    ns
                );
            }
            // Hierarchy edges are symmetric and stay inside the result.
            if let Some(parent) = ns.parent {
                let parent_ns = result.namespace(*kind, parent).expect("parent not indexed");
                assert!(parent_ns.children.contains(&ns.id.ino));
            }
            for child in &ns.children {
                let child_ns = result.namespace(*kind, *child).expect("child not indexed");
                assert_eq!(child_ns.parent, Some(ns.id.ino));
            }
            // Ownership points at indexed user namespaces.
            if let Some(owner) = ns.owner {
                assert!(result.namespace(NamespaceKind::User, owner).is_some());
            }
            // Leaders are exactly the topmost inhabitants.
            let expected: BTreeSet<i32> = ns
                .inhabitants
                .iter()
                .filter(|pid| {
                    match result
                        .processes
                        .get(*pid)
                        .and_then(|process| result.processes.get(&process.ppid))
                    {
                        None => true,
                        Some(parent) => parent.namespaces.get(kind) != Some(&ns.id.ino),
                    }
                })
                .cloned()
                .collect();
            assert_eq!(ns.leaders.iter().cloned().collect::<BTreeSet<_>>(), expected);
        }
    }
}

#[test]
fn minimal_single_process_discovery() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1, 0, "init", 1, &seven_namespaces());

    let result = discover(proc_fs.opts());

    for (kind, ino) in seven_namespaces() {
        let map = result.namespaces(kind);
        assert_eq!(map.len(), 1, "{} namespaces", kind);
        let ns = &map[&ino];
        assert_eq!(ns.inhabitants.iter().cloned().collect::<Vec<_>>(), vec![1]);
        assert_eq!(ns.leaders, vec![1], "{} leader", kind);
        assert!(ns.parent.is_none());
    }
    assert_eq!(result.namespaces(NamespaceKind::Time).len(), 0);
    assert_eq!(result.processes.len(), 1);
    assert_eq!(result.processes[&1].name, "init");
    assert_eq!(result.user_roots, vec![4026531837]);
    assert_eq!(result.pid_roots, vec![4026531836]);
    assert_invariants(&result);
}

#[test]
fn processes_form_a_tree_and_leaders_are_topmost() {
    let proc_fs = FakeProc::new();
    let shared = seven_namespaces();
    proc_fs.process(1, 0, "init", 1, &shared);
    proc_fs.process(100, 1, "daemon", 50, &shared);
    // A child in its own net namespace; everything else shared.
    let mut netted = shared.clone();
    netted[6] = (NamespaceKind::Net, 4026532000);
    proc_fs.process(200, 100, "netted", 60, &netted);

    let result = discover(proc_fs.opts());

    assert_eq!(result.processes[&1].children.iter().cloned().collect::<Vec<_>>(), vec![100]);
    assert_eq!(
        result.processes[&100].children.iter().cloned().collect::<Vec<_>>(),
        vec![200]
    );
    // Only init leads the shared namespaces; the netted child leads its own
    // net namespace.
    let root_net = &result.namespaces(NamespaceKind::Net)[&4026531905];
    assert_eq!(root_net.leaders, vec![1]);
    let child_net = &result.namespaces(NamespaceKind::Net)[&4026532000];
    assert_eq!(child_net.leaders, vec![200]);
    let uts = &result.namespaces(NamespaceKind::Uts)[&4026531838];
    assert_eq!(uts.leaders, vec![1]);
    assert_eq!(uts.inhabitants.len(), 3);
    assert_invariants(&result);
}

#[test]
fn fd_referenced_namespaces_toggle_with_the_option() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1234, 0, "holder", 1, &seven_namespaces());
    proc_fs.fd(1234, 3, "net:[12345678]");
    proc_fs.fd(1234, 4, "/dev/null");

    let mut opts = proc_fs.opts();
    opts.skip_fds = false;
    let result = discover(opts);
    let ns = &result.namespaces(NamespaceKind::Net)[&12345678];
    assert_eq!(ns.fd_refs.iter().cloned().collect::<Vec<_>>(), vec![(1234, 3)]);
    assert!(ns.inhabitants.is_empty());
    assert!(ns.leaders.is_empty());
    assert_invariants(&result);

    let mut opts = proc_fs.opts();
    opts.skip_fds = true;
    let result = discover(opts);
    assert!(result.namespace(NamespaceKind::Net, 12345678).is_none());
}

#[test]
fn bind_mounted_namespaces_are_attributed() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1, 0, "init", 1, &seven_namespaces());
    proc_fs.mountinfo(
        1,
        "22 1 0:5 / / rw - ext4 /dev/sda1 rw\n\
         189 22 0:4 net:[4026532661] /run/netns/frozen rw shared:115 - nsfs nsfs rw\n\
         190 22 0:4 uts:[4026532662] /run/utsns/frozen rw - nsfs nsfs rw\n",
    );

    let result = discover(proc_fs.opts());

    let netns = &result.namespaces(NamespaceKind::Net)[&4026532661];
    assert_eq!(
        netns.bind_mounts.iter().cloned().collect::<Vec<_>>(),
        vec![std::path::PathBuf::from("/run/netns/frozen")]
    );
    assert!(netns.inhabitants.is_empty());
    let utsns = &result.namespaces(NamespaceKind::Uts)[&4026532662];
    assert!(utsns.bind_mounts.contains(Path::new("/run/utsns/frozen")));
    assert_invariants(&result);

    // And not when told to skip bind mounts.
    let mut opts = proc_fs.opts();
    opts.skip_bindmounts = true;
    let result = discover(opts);
    assert!(result.namespace(NamespaceKind::Net, 4026532661).is_none());
}

#[test]
fn mount_points_are_collected_on_request() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1, 0, "init", 1, &seven_namespaces());
    proc_fs.mountinfo(
        1,
        "22 1 0:5 / / rw - ext4 /dev/sda1 rw\n\
         23 22 0:6 / /proc rw - proc proc rw\n",
    );

    let mut opts = proc_fs.opts();
    opts.with_mounts = true;
    let result = discover(opts);
    let table = &result.mounts[&4026531840];
    assert_eq!(table.len(), 2);
    assert_eq!(table[0].mount_point, Path::new("/"));
    assert_eq!(table[1].fs_type, "proc");

    let result = discover(proc_fs.opts());
    assert!(result.mounts.is_empty());
}

#[test]
fn kind_mask_restricts_discovery() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1, 0, "init", 1, &seven_namespaces());
    proc_fs.fd(1, 3, "uts:[555]");

    let mut opts = proc_fs.opts();
    opts.kinds = KindMask::of(&[NamespaceKind::Net]);
    let result = discover(opts);

    assert_eq!(result.namespaces(NamespaceKind::Net).len(), 1);
    for kind in NamespaceKind::ALL.iter().filter(|kind| **kind != NamespaceKind::Net) {
        assert_eq!(result.namespaces(*kind).len(), 0, "{} leaked through", kind);
    }
    assert!(result.processes[&1].namespaces.get(&NamespaceKind::Uts).is_none());
}

#[test]
fn skipping_processes_skips_the_table() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1, 0, "init", 1, &seven_namespaces());

    let mut opts = proc_fs.opts();
    opts.skip_procs = true;
    let result = discover(opts);
    assert!(result.processes.is_empty());
    assert_eq!(result.namespaces(NamespaceKind::Net).len(), 0);
}

#[test]
fn vanished_and_malformed_processes_are_skipped() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1, 0, "init", 1, &seven_namespaces());
    // A directory without comm/stat, as left behind by a dying process.
    fs::create_dir_all(proc_fs.path().join("666")).unwrap();
    // Non-process procfs entries.
    fs::create_dir_all(proc_fs.path().join("sys")).unwrap();
    fs::write(proc_fs.path().join("uptime"), "42.0 13.0\n").unwrap();
    // A process with an unparseable namespace link.
    proc_fs.process(77, 1, "odd", 2, &[]);
    symlink(
        "borg:[1]",
        proc_fs.path().join("77").join("ns").join("net"),
    )
    .unwrap();

    let result = discover(proc_fs.opts());
    assert_eq!(result.processes.len(), 2);
    assert!(result.processes[&77].namespaces.is_empty());
    assert_invariants(&result);
}

#[test]
fn nspid_columns_reach_the_processes() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1, 0, "init", 1, &seven_namespaces());
    let mut inner = seven_namespaces();
    inner[5] = (NamespaceKind::Pid, 4026532244);
    proc_fs.process(1234, 1, "inner-init", 99, &inner);
    proc_fs.nspids(1234, &[1234, 1]);

    let result = discover(proc_fs.opts());
    assert_eq!(result.processes[&1234].nspids, vec![1234, 1]);
    assert_eq!(result.processes[&1].nspids, vec![1]);
    assert_invariants(&result);
}

#[test]
fn discovery_is_deterministic() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1, 0, "init", 1, &seven_namespaces());
    proc_fs.process(2, 1, "child", 2, &seven_namespaces());
    proc_fs.fd(2, 3, "ipc:[888]");
    proc_fs.mountinfo(
        1,
        "189 22 0:4 net:[4026532661] /run/netns/frozen rw - nsfs nsfs rw\n",
    );

    let first = discover(proc_fs.opts());
    let second = discover(proc_fs.opts());
    assert_eq!(first, second);
}

#[test]
fn results_survive_the_json_wire() {
    let proc_fs = FakeProc::new();
    proc_fs.process(1, 0, "init", 1, &seven_namespaces());
    proc_fs.process(50, 1, "worker", 7, &seven_namespaces());
    proc_fs.fd(50, 9, "time:[4242]");

    let result = discover(proc_fs.opts());
    let json = serde_json::to_string(&result).unwrap();
    let back: DiscoveryResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
    // The revived graph still satisfies the structural invariants,
    // back-references included.
    assert_invariants(&back);
}
