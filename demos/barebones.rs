//! Barebones no-thrills example that lists *all* discovered namespaces.

use nscensus::{discover, DiscoverOpts, NamespaceKind};

fn main() {
    let result = discover(DiscoverOpts::full_discovery());

    for kind in NamespaceKind::ALL.iter() {
        for ns in result.namespaces(*kind).values() {
            println!("{}", ns);
        }
    }
}
