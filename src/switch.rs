//! Running code while joined to a different set of namespaces.
//!
//! Two disciplines are on offer. [`enter`] switches a freshly spawned
//! thread into the requested namespaces and runs the payload there; the
//! thread dies with the payload, and any namespace pollution dies with the
//! thread. [`visit`] switches the *current* thread and switches back
//! afterwards; it is the cheaper option, but a failed switch-back leaves
//! the thread stranded in foreign namespaces, so it must never run on a
//! thread the caller cannot afford to abandon, least of all the main
//! thread.
//!
//! Every way of referencing a namespace resolves to an open `nsfs` file
//! descriptor only for the duration of one `setns`; owned descriptors are
//! dropped on every exit path.

use std::fmt;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use log::debug;
use nix::sched::{setns, CloneFlags};

use crate::error::*;
use crate::kind::NamespaceKind;
use crate::model::Pid;
use crate::nsio;

/// A reference to a namespace that can be joined.
#[derive(Clone, Debug)]
pub enum NsRef {
    /// A filesystem path to open on demand: a `/proc/[pid]/ns/*` link or a
    /// bind-mounted namespace file.
    Path(PathBuf),
    /// A namespace file descriptor the caller already holds open. The
    /// caller keeps ownership and must keep it open while switching.
    Fd(RawFd),
    /// The namespace of some process, resolved through procfs on demand.
    Proc(Pid, NamespaceKind),
}

impl NsRef {
    /// Resolve this reference to an open file descriptor.
    fn open(&self) -> Result<NsFd> {
        match self {
            NsRef::Path(path) => File::open(path)
                .map(NsFd::Owned)
                .chain_err(|| ErrorKind::NamespaceRef(self.to_string())),
            NsRef::Fd(fd) => Ok(NsFd::Borrowed(*fd)),
            NsRef::Proc(pid, kind) => {
                let path = format!("/proc/{}/ns/{}", pid, kind.name());
                File::open(&path)
                    .map(NsFd::Owned)
                    .chain_err(|| ErrorKind::NamespaceRef(self.to_string()))
            }
        }
    }
}

impl fmt::Display for NsRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NsRef::Path(path) => write!(f, "{}", path.display()),
            NsRef::Fd(fd) => write!(f, "fd {}", fd),
            NsRef::Proc(pid, kind) => write!(f, "/proc/{}/ns/{}", pid, kind.name()),
        }
    }
}

/// A resolved namespace fd: either scoped to this value or on loan from
/// the caller. Dropping the owned form is what releases the descriptor,
/// so release happens on every exit path.
enum NsFd {
    Owned(File),
    Borrowed(RawFd),
}

impl NsFd {
    fn as_fd(&self) -> BorrowedFd {
        match self {
            NsFd::Owned(file) => file.as_fd(),
            // The caller guarantees the loaned fd stays open while the
            // switch is in progress.
            NsFd::Borrowed(fd) => unsafe { BorrowedFd::borrow_raw(*fd) },
        }
    }
}

/// Run `f` on its own disposable thread, joined to the given namespaces.
///
/// The calling thread blocks only until the switch sequence has succeeded
/// or failed; `f` then runs detached and the thread is destroyed when `f`
/// returns, taking any namespace pollution with it. Errors while switching
/// are returned synchronously and `f` is never invoked after a failed
/// switch.
pub fn enter<F>(f: F, nsrefs: &[NsRef]) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let nsrefs = nsrefs.to_vec();
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("namespace-switcher".to_string())
        .spawn(move || match switch_into(&nsrefs) {
            Ok(()) => {
                let _ = tx.send(Ok(()));
                f();
            }
            Err(err) => {
                let _ = tx.send(Err(err));
            }
        })
        .chain_err(|| "cannot spawn namespace switch thread")?;
    rx.recv()
        .unwrap_or_else(|_| Err("namespace switch thread died unreported".into()))
}

/// Run `f` on a disposable thread as [`enter`] does, but wait for it and
/// hand its return value back.
pub fn execute<F, T>(f: F, nsrefs: &[NsRef]) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    enter(
        move || {
            let _ = tx.send(f());
        },
        nsrefs,
    )?;
    rx.recv().chain_err(|| "switched function dropped its result")
}

/// Join the given namespaces in order; on failure the caller decides what
/// happens to the thread.
fn switch_into(nsrefs: &[NsRef]) -> Result<()> {
    for nsref in nsrefs {
        let fd = nsref.open()?;
        setns(fd.as_fd(), CloneFlags::empty())
            .map_err(|err| ErrorKind::EnterNamespace(nsref.to_string(), err))?;
    }
    Ok(())
}

/// Run `f` on the current thread, temporarily joined to the given
/// namespaces.
///
/// For every reference the thread's current namespace of the same kind is
/// recorded first; after `f` returns (or panics) the recorded namespaces
/// are rejoined in reverse order. When a switch-back fails the thread is
/// stranded in foreign namespaces and the distinguished
/// [`ErrorKind::TaintedThread`] error is returned: the thread must then be
/// terminated rather than reused, which is why `visit` has no business on
/// the main thread.
pub fn visit<F, T>(f: F, nsrefs: &[NsRef]) -> Result<T>
where
    F: FnOnce() -> T,
{
    let tid = nix::unistd::gettid();
    let mut rejoin: Vec<(String, File)> = Vec::new();

    let mut switch_err = None;
    for nsref in nsrefs {
        if let Err(err) = visit_one(tid.as_raw(), nsref, &mut rejoin) {
            switch_err = Some(err);
            break;
        }
    }

    // Run the payload only with all switches in place; a partial switch
    // still unwinds below.
    let outcome = match switch_err {
        Some(err) => Err(err),
        None => Ok(catch_unwind(AssertUnwindSafe(f))),
    };

    let mut restore_err: Option<Error> = None;
    for (path, file) in rejoin.iter().rev() {
        if let Err(err) = setns(file.as_fd(), CloneFlags::empty()) {
            debug!("cannot switch back into {}: {}", path, err);
            if restore_err.is_none() {
                restore_err = Some(ErrorKind::RestoreNamespace(path.clone(), err).into());
            }
        }
    }
    // The original namespace fds stay alive until after restoration.
    drop(rejoin);

    match outcome {
        Err(err) => Err(err),
        Ok(Err(panic)) => resume_unwind(panic),
        Ok(Ok(value)) => match restore_err {
            Some(err) => Err(Error::with_chain(err, ErrorKind::TaintedThread)),
            None => Ok(value),
        },
    }
}

/// Record the current thread's namespace matching `nsref`'s kind, then
/// join `nsref`. Only successfully joined namespaces enter the rejoin
/// list.
fn visit_one(tid: libc::pid_t, nsref: &NsRef, rejoin: &mut Vec<(String, File)>) -> Result<()> {
    let fd = nsref.open()?;
    let kind = nsio::kind_of(fd.as_fd())
        .chain_err(|| ErrorKind::NamespaceRef(nsref.to_string()))?;

    let orig_path = format!("/proc/self/task/{}/ns/{}", tid, kind.name());
    let orig = File::open(&orig_path).chain_err(|| ErrorKind::NamespaceRef(orig_path.clone()))?;

    setns(fd.as_fd(), CloneFlags::empty())
        .map_err(|err| ErrorKind::EnterNamespace(nsref.to_string(), err))?;
    rejoin.push((orig_path, orig));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn enter_with_no_namespaces_just_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let (tx, rx) = mpsc::channel();
        enter(
            move || {
                flag.store(true, Ordering::SeqCst);
                tx.send(()).unwrap();
            },
            &[],
        )
        .unwrap();
        rx.recv().unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn execute_returns_the_payload_value() {
        let value = execute(|| 7 * 6, &[]).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn a_dead_reference_fails_before_the_payload_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let err = enter(
            move || flag.store(true, Ordering::SeqCst),
            &[NsRef::Path(PathBuf::from("/nonexistent/ns/net"))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot reference namespace"));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn visit_with_no_namespaces_returns_the_value() {
        let value = visit(|| "ok", &[]).unwrap();
        assert_eq!(value, "ok");
    }

    #[test]
    fn visit_reports_the_failing_reference() {
        let err = visit(|| (), &[NsRef::Proc(0, NamespaceKind::Net)]).unwrap_err();
        assert!(err.to_string().contains("/proc/0/ns/net"));
    }

    #[test]
    fn references_display_usably() {
        assert_eq!(
            NsRef::Path(PathBuf::from("/run/netns/foo")).to_string(),
            "/run/netns/foo"
        );
        assert_eq!(NsRef::Fd(3).to_string(), "fd 3");
        assert_eq!(
            NsRef::Proc(1, NamespaceKind::Net).to_string(),
            "/proc/1/ns/net"
        );
    }
}
