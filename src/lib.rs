//! Discovery, modelling and reporting of Linux kernel namespaces.
//!
//! `nscensus` finds every namespace it can see on the host: through the
//! processes inhabiting them, through file descriptors and bind mounts
//! keeping otherwise deserted namespaces alive, and through the kernel's
//! namespace-hierarchy ioctls. All sightings merge into one graph of
//! namespaces, processes, ownership and hierarchy.
//!
//! The usual entry point is [`discover`] with a set of [`DiscoverOpts`]:
//!
//! ```no_run
//! let result = nscensus::discover(nscensus::DiscoverOpts::full_discovery());
//! for ns in result.namespaces(nscensus::NamespaceKind::User).values() {
//!     println!("{}", ns);
//! }
//! ```
//!
//! Beyond discovery, [`PidMap`] translates PIDs between PID namespaces and
//! [`switch`] runs closures while joined to other namespaces.

#![warn(missing_docs)]

#[macro_use]
extern crate error_chain;

mod error;
mod nsio;

pub mod container;
pub mod discover;
pub mod kind;
pub mod model;
pub mod pidmap;
pub mod switch;

pub use crate::container::{Container, ContainerModel, Containerizer, Engine, Group};
pub use crate::discover::{discover, discover_with, DiscoverOpts};
pub use crate::error::*;
pub use crate::kind::{KindMask, NamespaceKind};
pub use crate::model::{DiscoveryResult, Namespace, NamespaceId, Process, ProcessTable};
pub use crate::pidmap::PidMap;
pub use crate::switch::NsRef;
