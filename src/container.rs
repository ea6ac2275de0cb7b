//! Containers, container engines, and container groups.
//!
//! Discovery itself has no idea what a container is; an injected
//! [`Containerizer`] supplies a snapshot of the currently running
//! containers and the engines and groups around them. The attacher then
//! back-references every container from the process it runs as and from
//! every namespace that process inhabits, so reports can group namespaces
//! by container.
//!
//! Containers, engines and groups form a cyclic graph. The model therefore
//! stores each entity in a keyed arena: containers are keyed by the PID of
//! their initial process, engines and groups by reference IDs counted from
//! 1. Cross-references are those keys, which doubles as the JSON wire
//! format.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use serde_derive::{Deserialize, Serialize};

use crate::model::{DiscoveryResult, Pid};

/// Free-form key/value metadata on containers and groups.
pub type Labels = BTreeMap<String, String>;

/// A container, as reported by a containerizer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Engine-assigned container ID.
    pub id: String,
    /// Human-readable container name; often the same as the ID.
    pub name: String,
    /// What kind of container this is, such as `docker.com` or
    /// `containerd.io`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// A more specific variant of the type, where engines distinguish one.
    pub flavor: String,
    /// PID of the container's initial process, in the discoverer's PID
    /// namespace. Also the container's key in the model.
    pub pid: Pid,
    /// Whether the container is currently paused.
    pub paused: bool,
    /// Engine-reported labels.
    pub labels: Labels,
    /// Reference ID of the managing engine.
    pub engine: u32,
    /// Reference IDs of the groups this container belongs to.
    pub groups: Vec<u32>,
}

/// A container engine instance with the containers it manages.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Engine {
    /// Engine instance ID.
    pub id: String,
    /// Engine type, such as `docker.com`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// API path or address the engine was reached through.
    pub api: String,
    /// PID of the engine process, when known.
    pub pid: Pid,
    /// The managed containers, as container keys (initial PIDs).
    pub containers: Vec<Pid>,
}

/// A grouping of containers, such as a composer project or a pod.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Group name.
    pub name: String,
    /// What this grouping mechanism is.
    #[serde(rename = "type")]
    pub type_name: String,
    /// A more specific variant of the type.
    pub flavor: String,
    /// Labels on the group itself.
    pub labels: Labels,
    /// The grouped containers, as container keys (initial PIDs).
    pub containers: Vec<Pid>,
}

/// The containers, engines and groups of one discovery, in keyed arenas.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerModel {
    /// Containers by the PID of their initial process.
    pub containers: BTreeMap<Pid, Container>,
    /// Engines by reference ID, assigned sequentially from 1.
    pub engines: BTreeMap<u32, Engine>,
    /// Groups by reference ID, assigned sequentially from 1.
    pub groups: BTreeMap<u32, Group>,
}

impl ContainerModel {
    /// An empty model.
    pub fn new() -> ContainerModel {
        ContainerModel::default()
    }

    /// Whether no container at all was reported.
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Register an engine, handing back its reference ID.
    pub fn add_engine(&mut self, engine: Engine) -> u32 {
        let refid = self.engines.len() as u32 + 1;
        self.engines.insert(refid, engine);
        refid
    }

    /// Register a group, handing back its reference ID.
    pub fn add_group(&mut self, group: Group) -> u32 {
        let refid = self.groups.len() as u32 + 1;
        self.groups.insert(refid, group);
        refid
    }

    /// Register a container whose `engine` and `groups` keys are already
    /// set, wiring up the back-references on the engine and the groups.
    pub fn add_container(&mut self, container: Container) {
        let pid = container.pid;
        if let Some(engine) = self.engines.get_mut(&container.engine) {
            engine.containers.push(pid);
        }
        for refid in &container.groups {
            if let Some(group) = self.groups.get_mut(refid) {
                group.containers.push(pid);
            }
        }
        self.containers.insert(pid, container);
    }
}

/// A source of container metadata, typically backed by one or more
/// container engine clients watching their engines in the background.
///
/// Discovery only ever asks for a snapshot of the current state. The
/// `cancel` flag is handed in by the caller; implementations talking to a
/// slow engine should give up once it turns true.
pub trait Containerizer {
    /// A snapshot of the currently running containers with their engines
    /// and groups.
    fn containers(&self, cancel: &AtomicBool) -> ContainerModel;
}

/// Attach a containerizer's snapshot to a discovery result: every found
/// container is back-referenced from its initial process and from all
/// namespaces that process inhabits.
pub(crate) fn attach(result: &mut DiscoveryResult, containerizer: &dyn Containerizer) {
    let cancel = AtomicBool::new(false);
    result.containers = containerizer.containers(&cancel);

    let pids: Vec<Pid> = result.containers.containers.keys().cloned().collect();
    for pid in pids {
        let links = match result.processes.get_mut(&pid) {
            Some(process) => {
                process.container = Some(pid);
                process.namespaces.clone()
            }
            // The container's process is gone or out of reach; keep the
            // container, there is just nothing to pin it to.
            None => continue,
        };
        for (kind, ino) in links {
            if let Some(ns) = result.namespace_mut(kind, ino) {
                ns.containers.insert(pid);
            }
        }
    }
}
