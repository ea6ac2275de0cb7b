//! `nscensus` is a command line tool that renders the Linux-kernel
//! namespaces discovered by the [`nscensus`](../nscensus/index.html)
//! library.
//!
//! Three views are available: `ns` draws the tree of user namespaces with
//! the namespaces each of them owns, `pids` draws the process tree
//! interleaved with the PID namespaces it crosses, and `json` dumps the
//! whole discovery result.
//!
//! # Configuration file
//!
//! The configuration file can be specified at the command line using the
//! `-c` or `--config-file` flag. Alternatively, the following locations are
//! searched in order:
//!
//! 1. `./nscensus.toml`
//! 1. `./.nscensus.toml`
//! 1. `~/.config/nscensus.toml`
//! 1. `~/.nscensus.toml`
//! 1. `/etc/nscensus.toml`

use std::env;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::exit;

use docopt::Docopt;
use serde_derive::Deserialize;

use nscensus::kind::{KindMask, NamespaceKind};
use nscensus::model::{DiscoveryResult, Namespace, Process};
use nscensus::pidmap::PidMap;
use nscensus::{discover, DiscoverOpts, Result, ResultExt};

fn main() {
    env_logger::init();
    let args = Arguments::load();

    if args.flag_default_config {
        print!("{}", DEFAULT_CONFIG);
        exit(0);
    }

    if let Err(err) = run(&args) {
        eprintln!("Error: {}", err);
        exit(1);
    }
}

/// Dispatch the selected subcommand.
fn run(args: &Arguments) -> Result<()> {
    let config = args.config()?;
    let filter = match args.flag_filter.as_ref().or_else(|| config.filter.as_ref()) {
        Some(kinds) => parse_filter(kinds)?,
        None => KindMask::all(),
    };

    let mut opts = DiscoverOpts::full_discovery();
    opts.with_mounts = args.flag_mounts || config.mounts.unwrap_or(false);

    let result = discover(opts);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.cmd_ns || (!args.cmd_pids && !args.cmd_json) {
        // A bare invocation renders the namespace view as well.
        render_user_forest(&mut out, &result, filter)?;
    } else if args.cmd_pids {
        render_pid_forest(&mut out, &result)?;
    } else {
        let json = serde_json::to_string_pretty(&result)
            .chain_err(|| "cannot marshal discovery result")?;
        writeln!(out, "{}", json)?;
    }
    Ok(())
}

const USAGE: &str = "
Usage:
    nscensus ns [options]
    nscensus pids [options]
    nscensus json [options]
    nscensus [-v | -h | -d]

Options:
    -f <kinds>, --filter <kinds>     Show only namespaces of the given kinds, as a
                                     comma-separated list of cgroup/c, ipc/i, mnt/m,
                                     net/n, pid/p, user/U, uts/u.
    -c <file>, --config-file <file>  Location of configuration file to use.
    -m, --mounts                     Also collect mount points per mount namespace.
    -h, --help                       Show this help.
    -v, --version                    Show the version.
    -d, --default-config             Dump the default configuration to stdout.
";

#[derive(Deserialize)]
struct Arguments {
    cmd_ns: bool,
    cmd_pids: bool,
    cmd_json: bool,
    flag_filter: Option<String>,
    flag_config_file: Option<String>,
    flag_mounts: bool,
    flag_default_config: bool,
}

impl Arguments {
    /// Load arguments from the command line.
    fn load() -> Arguments {
        Docopt::new(USAGE)
            .unwrap_or_else(|e| e.exit())
            .help(true)
            .version(Some(version()))
            .deserialize()
            .unwrap_or_else(|e| e.exit())
    }

    /// Load the configuration to run under.
    fn config(&self) -> Result<Configuration> {
        let text = if let Some(path) = self.find_config_path() {
            let mut file =
                File::open(&path).chain_err(|| "could not open configuration file")?;
            let mut text = String::new();
            file.read_to_string(&mut text)
                .chain_err(|| "could not read configuration file")?;
            text
        } else {
            DEFAULT_CONFIG.to_string()
        };

        toml::from_str(&text).chain_err(|| "could not parse configuration")
    }

    /// Determine the path of the configuration file.
    fn find_config_path(&self) -> Option<String> {
        if let Some(ref path) = self.flag_config_file {
            Some(path.clone())
        } else {
            Arguments::default_config_paths()
                .into_iter()
                .find(|path| Path::new(path).exists())
        }
    }

    /// Default configuration path list.
    fn default_config_paths() -> Vec<String> {
        let mut paths = vec!["nscensus.toml".to_string(), ".nscensus.toml".to_string()];

        if let Ok(home) = env::var("HOME") {
            paths.push(format!("{}/.config/nscensus.toml", home));
            paths.push(format!("{}/.nscensus.toml", home));
        }

        paths.push("/etc/nscensus.toml".to_string());

        paths
    }
}

const DEFAULT_CONFIG: &str = include_str!("nscensus.toml");

#[derive(Deserialize)]
struct Configuration {
    filter: Option<String>,
    mounts: Option<bool>,
}

/// Parse a comma-separated list of kind names or abbreviations into a
/// display filter.
fn parse_filter(kinds: &str) -> Result<KindMask> {
    let mut mask = KindMask::empty();
    for token in kinds.split(',') {
        let kind = match token.trim() {
            "cgroup" | "c" => NamespaceKind::Cgroup,
            "ipc" | "i" => NamespaceKind::Ipc,
            "mnt" | "m" => NamespaceKind::Mount,
            "net" | "n" => NamespaceKind::Net,
            "pid" | "p" => NamespaceKind::Pid,
            "user" | "U" => NamespaceKind::User,
            "uts" | "u" => NamespaceKind::Uts,
            "time" => NamespaceKind::Time,
            other => return Err(format!("not a valid namespace kind: {:?}", other).into()),
        };
        mask.insert(kind);
    }
    Ok(mask)
}

/// Tree glyphs for a child at the given position.
fn glyphs(last: bool) -> (&'static str, &'static str) {
    if last {
        ("└─ ", "   ")
    } else {
        ("├─ ", "│  ")
    }
}

/// The label of a namespace: its identity, its most senior process if any,
/// and its creator for user namespaces.
fn namespace_label(ns: &Namespace, result: &DiscoveryResult) -> String {
    let mut label = ns.kind.format(ns.id.ino);
    if let Some(process) = ns.senior_leader().and_then(|pid| result.processes.get(&pid)) {
        label.push_str(&format!(" process {:?} ({})", process.name, process.pid));
    }
    if let Some(uid) = ns.owner_uid {
        label.push_str(&format!(", created by UID {}", uid));
    }
    label
}

/// Render the forest of user namespaces; under every user namespace its
/// child user namespaces and the namespaces it owns, restricted to the
/// kinds passing the filter.
fn render_user_forest(
    out: &mut dyn Write,
    result: &DiscoveryResult,
    filter: KindMask,
) -> io::Result<()> {
    for root in &result.user_roots {
        if let Some(ns) = result.namespace(NamespaceKind::User, *root) {
            if filter.contains(NamespaceKind::User) {
                writeln!(out, "{}", namespace_label(ns, result))?;
            }
            render_owned(out, result, ns, filter, "")?;
        }
    }
    Ok(())
}

/// One layer of the user namespace tree: owned namespaces first, child
/// user namespaces after.
fn render_owned(
    out: &mut dyn Write,
    result: &DiscoveryResult,
    user_ns: &Namespace,
    filter: KindMask,
    prefix: &str,
) -> io::Result<()> {
    let mut owned: Vec<&Namespace> = Vec::new();
    for kind in NamespaceKind::ALL.iter() {
        if *kind == NamespaceKind::User || !filter.contains(*kind) {
            continue;
        }
        owned.extend(
            result
                .namespaces(*kind)
                .values()
                .filter(|ns| ns.owner == Some(user_ns.id.ino)),
        );
    }
    let children: Vec<&Namespace> = user_ns
        .children
        .iter()
        .filter_map(|ino| result.namespace(NamespaceKind::User, *ino))
        .collect();

    let total = owned.len() + children.len();
    for (idx, ns) in owned.iter().enumerate() {
        let (branch, _) = glyphs(idx + 1 == total);
        writeln!(out, "{}{}{}", prefix, branch, namespace_label(ns, result))?;
    }
    for (idx, child) in children.iter().enumerate() {
        let (branch, indent) = glyphs(owned.len() + idx + 1 == total);
        writeln!(out, "{}{}{}", prefix, branch, namespace_label(child, result))?;
        render_owned(out, result, child, filter, &format!("{}{}", prefix, indent))?;
    }
    Ok(())
}

/// A node of the PID tree: either a PID namespace or a process. The tree
/// alternates between the two wherever a process's children live in
/// another PID namespace.
enum TreeNode<'a> {
    PidNs(&'a Namespace),
    Proc(&'a Process),
}

impl<'a> TreeNode<'a> {
    /// The label of this node.
    fn label(&self, result: &DiscoveryResult, pidmap: &PidMap, root: u64) -> String {
        match self {
            TreeNode::PidNs(ns) => {
                let mut label = ns.kind.format(ns.id.ino);
                let owner_uid = ns
                    .owner
                    .and_then(|ino| result.namespace(NamespaceKind::User, ino))
                    .and_then(|owner| owner.owner_uid);
                if let Some(uid) = owner_uid {
                    label.push_str(&format!(", owned by UID {}", uid));
                }
                label
            }
            TreeNode::Proc(process) => {
                let local = process
                    .namespaces
                    .get(&NamespaceKind::Pid)
                    .and_then(|own| pidmap.translate(process.pid, root, *own));
                match local {
                    Some(local) if local != process.pid => {
                        format!("{:?} ({}={})", process.name, process.pid, local)
                    }
                    Some(_) => format!("{:?} ({})", process.name, process.pid),
                    None => format!("{:?} ({}=?)", process.name, process.pid),
                }
            }
        }
    }

    /// The typed children of this node: a PID namespace branches into its
    /// leader processes, a process into its child processes, or into the
    /// PID namespaces those children open up.
    fn children(&self, result: &'a DiscoveryResult) -> Vec<TreeNode<'a>> {
        let mut nodes = Vec::new();
        match self {
            TreeNode::PidNs(ns) => {
                for pid in &ns.leaders {
                    if let Some(process) = result.processes.get(pid) {
                        nodes.push(TreeNode::Proc(process));
                    }
                }
            }
            TreeNode::Proc(process) => {
                let own = process.namespaces.get(&NamespaceKind::Pid);
                let mut entered: Vec<u64> = Vec::new();
                for pid in &process.children {
                    let child = match result.processes.get(pid) {
                        Some(child) => child,
                        None => continue,
                    };
                    match child.namespaces.get(&NamespaceKind::Pid) {
                        Some(ino) if Some(ino) != own => {
                            if !entered.contains(ino) {
                                entered.push(*ino);
                                if let Some(ns) = result.namespace(NamespaceKind::Pid, *ino) {
                                    nodes.push(TreeNode::PidNs(ns));
                                }
                            }
                        }
                        _ => nodes.push(TreeNode::Proc(child)),
                    }
                }
            }
        }
        nodes
    }
}

/// Render the process forest, interleaving the PID namespaces the process
/// hierarchy crosses.
fn render_pid_forest(out: &mut dyn Write, result: &DiscoveryResult) -> io::Result<()> {
    let pidmap = PidMap::new(result);
    for root in &result.pid_roots {
        if let Some(ns) = result.namespace(NamespaceKind::Pid, *root) {
            let node = TreeNode::PidNs(ns);
            writeln!(out, "{}", node.label(result, &pidmap, *root))?;
            render_branch(out, result, &pidmap, *root, &node, "")?;
        }
    }
    Ok(())
}

/// Recursively render the children of one PID tree node.
fn render_branch(
    out: &mut dyn Write,
    result: &DiscoveryResult,
    pidmap: &PidMap,
    root: u64,
    node: &TreeNode,
    prefix: &str,
) -> io::Result<()> {
    let children = node.children(result);
    let count = children.len();
    for (idx, child) in children.iter().enumerate() {
        let (branch, indent) = glyphs(idx + 1 == count);
        writeln!(out, "{}{}{}", prefix, branch, child.label(result, pidmap, root))?;
        render_branch(out, result, pidmap, root, child, &format!("{}{}", prefix, indent))?;
    }
    Ok(())
}

/// Construct the version string for the program.
fn version() -> String {
    format!(
        "{} - {}\n{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_DESCRIPTION"),
    )
}
