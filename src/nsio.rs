//! Low-level plumbing for `nsfs` namespace files.
//!
//! The kernel answers questions about a namespace through ioctls on an open
//! namespace file: who is its parent, which user namespace owns it, what
//! kind is it, and which UID created it. See `ioctl_ns(2)`. All wrappers
//! here work on borrowed file descriptors and hand back owned ones, so fd
//! lifetimes stay scoped to their users.

use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::stat::fstat;
use nix::{ioctl_none, ioctl_read_bad, request_code_none};

use crate::kind::NamespaceKind;
use crate::model::NamespaceId;

// The NSIO ioctl group, from linux/nsfs.h.
ioctl_none!(ns_get_userns, 0xb7, 0x1);
ioctl_none!(ns_get_parent, 0xb7, 0x2);
ioctl_none!(ns_get_nstype, 0xb7, 0x3);
ioctl_read_bad!(ns_get_owner_uid, request_code_none!(0xb7, 0x4), libc::uid_t);

/// Open the parent namespace of a user or PID namespace.
///
/// `EPERM` means the caller may not see beyond this namespace; `ENOTTY`
/// means the kernel predates the hierarchy ioctls.
pub fn parent_of(fd: BorrowedFd) -> nix::Result<OwnedFd> {
    let parent = unsafe { ns_get_parent(fd.as_raw_fd()) }?;
    Ok(unsafe { OwnedFd::from_raw_fd(parent) })
}

/// Open the user namespace owning the namespace behind `fd`.
pub fn userns_of(fd: BorrowedFd) -> nix::Result<OwnedFd> {
    let owner = unsafe { ns_get_userns(fd.as_raw_fd()) }?;
    Ok(unsafe { OwnedFd::from_raw_fd(owner) })
}

/// The UID of the task that created the user namespace behind `fd`.
///
/// The kernel reports an unsigned 32-bit UID; no sign extension happens for
/// UIDs above 2³¹.
pub fn owner_uid_of(fd: BorrowedFd) -> nix::Result<libc::uid_t> {
    let mut uid: libc::uid_t = 0;
    unsafe { ns_get_owner_uid(fd.as_raw_fd(), &mut uid) }?;
    Ok(uid)
}

/// The kind of the namespace behind `fd`, queried from the kernel.
pub fn kind_of(fd: BorrowedFd) -> nix::Result<NamespaceKind> {
    let flag = unsafe { ns_get_nstype(fd.as_raw_fd()) }?;
    NamespaceKind::from_flag(flag as u64).ok_or(Errno::EINVAL)
}

/// The identity of the namespace behind `fd`, from `fstat`.
pub fn identity_of(fd: RawFd) -> nix::Result<NamespaceId> {
    let stat = fstat(fd)?;
    Ok(NamespaceId {
        ino: stat.st_ino as u64,
        dev: Some(stat.st_dev as u64),
    })
}
