//! Basic usage: build a small tree, look up, delete, tear down.
//!
//! Run with `RUST_LOG=coupled_tree=trace cargo run --example basic_usage` to
//! see the tree's own events.

use coupled_tree::{ConcurrentTree, TreeConfig, TreeError};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), TreeError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let tree: ConcurrentTree<String, &'static str> = ConcurrentTree::with_config(TreeConfig {
        initial_capacity: 8,
        max_nodes: None,
    })?;

    for (key, value) in [
        ("d", "delta"),
        ("b", "bravo"),
        ("a", "alpha"),
        ("c", "charlie"),
        ("e", "echo"),
    ] {
        let _ = tree.insert(key.to_string(), value)?;
    }

    if let Some(value) = tree.get("c") {
        println!("c -> {}", value);
    }

    if let Some(old) = tree.remove("b") {
        println!("deleted b (old value: {})", old);
    }

    let stats = tree.stats();
    println!(
        "{} keys, height {}, {} slots ({} vacant)",
        stats.nodes, stats.height, stats.slots, stats.vacant_slots
    );

    tree.destroy_with(|value| println!("released {}", value));
    Ok(())
}
