//! Discovery and namespace switching against the live host.
//!
//! Everything here runs against the real `/proc`. Tests needing privileges
//! or optional kernel features probe for them first and bow out quietly
//! when the environment does not cooperate; asserting would only make the
//! suite flaky on locked-down build machines.

use std::fs;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use nscensus::{discover, DiscoverOpts, ErrorKind, NamespaceKind, NsRef, PidMap};

fn self_pid() -> i32 {
    std::process::id() as i32
}

/// The inode behind one of our own namespace links.
fn self_ns_ino(kind: NamespaceKind) -> u64 {
    let target = fs::read_link(format!("/proc/self/ns/{}", kind.name())).unwrap();
    kind.parse_id(target.to_str().unwrap()).unwrap()
}

#[test]
fn the_discoverer_discovers_itself() {
    let result = discover(DiscoverOpts::full_discovery());
    let me = &result.processes[&self_pid()];
    assert!(!me.name.is_empty());
    assert!(me.starttime > 0);

    for kind in &[NamespaceKind::Net, NamespaceKind::Pid, NamespaceKind::User] {
        let ino = self_ns_ino(*kind);
        assert_eq!(me.namespaces.get(kind), Some(&ino), "own {} link", kind);
        let ns = result.namespace(*kind, ino).expect("own namespace discovered");
        assert!(ns.inhabitants.contains(&self_pid()));
    }
}

#[test]
fn every_process_link_is_indexed_and_backlinked() {
    let result = discover(DiscoverOpts::full_discovery());
    for process in result.processes.values() {
        for (kind, ino) in &process.namespaces {
            let ns = result.namespace(*kind, *ino).expect("linked namespace indexed");
            assert!(ns.inhabitants.contains(&process.pid));
        }
    }
    // And our own PID translates to itself.
    let pidmap = PidMap::new(&result);
    let own = self_ns_ino(NamespaceKind::Pid);
    assert_eq!(pidmap.translate(self_pid(), own, own), Some(self_pid()));
}

#[test]
fn an_open_fd_shows_up_as_namespace_evidence() {
    let held = fs::File::open("/proc/self/ns/net").unwrap();
    let result = discover(DiscoverOpts::full_discovery());
    let ns = result
        .namespace(NamespaceKind::Net, self_ns_ino(NamespaceKind::Net))
        .expect("own net namespace discovered");
    assert!(
        ns.fd_refs.contains(&(self_pid(), held.as_raw_fd())),
        "fd evidence missing: {:?}",
        ns.fd_refs
    );
    drop(held);
}

/// An `unshare -U` child; `None` when the environment cannot unshare.
fn unshared_sleeper() -> Option<Child> {
    let child = Command::new("unshare")
        .args(&["-U", "sleep", "30"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;
    // Give unshare a moment to actually move into the new namespace.
    thread::sleep(Duration::from_millis(300));
    Some(child)
}

#[test]
fn an_unshared_user_namespace_hangs_off_our_own() {
    let mut child = match unshared_sleeper() {
        Some(child) => child,
        None => {
            eprintln!("skipping: no unshare(1) available");
            return;
        }
    };

    let result = discover(DiscoverOpts::full_discovery());
    let own_userns = self_ns_ino(NamespaceKind::User);
    let child_userns = result
        .processes
        .get(&(child.id() as i32))
        .and_then(|process| process.namespaces.get(&NamespaceKind::User))
        .cloned();

    match child_userns {
        Some(ino) if ino != own_userns => {
            let ns = result.namespace(NamespaceKind::User, ino).unwrap();
            assert_eq!(ns.parent, Some(own_userns), "parent is our user namespace");
            assert_eq!(ns.owner_uid, Some(nix::unistd::geteuid().as_raw()));
            assert!(result
                .namespace(NamespaceKind::User, own_userns)
                .unwrap()
                .children
                .contains(&ino));
        }
        _ => eprintln!("skipping: unshare(1) did not produce a new user namespace"),
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn visiting_our_own_net_namespace_round_trips() {
    let before = self_ns_ino(NamespaceKind::Net);
    let outcome = std::thread::spawn(move || {
        nscensus::switch::visit(
            || self_ns_ino(NamespaceKind::Net),
            &[NsRef::Path(PathBuf::from("/proc/self/ns/net"))],
        )
    })
    .join()
    .unwrap();

    match outcome {
        Ok(seen) => {
            assert_eq!(seen, before, "visited namespace");
            assert_eq!(self_ns_ino(NamespaceKind::Net), before, "restored namespace");
        }
        // setns needs CAP_SYS_ADMIN even for the namespace we are in.
        Err(err) => match err.kind() {
            ErrorKind::EnterNamespace(..) => eprintln!("skipping: {}", err),
            other => panic!("unexpected switch failure: {}", other),
        },
    }
}

#[test]
fn entering_on_a_disposable_thread_reports_switch_errors_only() {
    let outcome = nscensus::switch::execute(
        || self_ns_ino(NamespaceKind::Net),
        &[NsRef::Proc(self_pid(), NamespaceKind::Net)],
    );
    match outcome {
        Ok(seen) => assert_eq!(seen, self_ns_ino(NamespaceKind::Net)),
        Err(err) => match err.kind() {
            ErrorKind::EnterNamespace(..) => eprintln!("skipping: {}", err),
            other => panic!("unexpected switch failure: {}", other),
        },
    }
}
