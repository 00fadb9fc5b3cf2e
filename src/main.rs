//! Demo application for the virtual filesystem facade.
//!
//! Watches a directory through [`LocalBackend`] and prints every change
//! and rename the core delivers. Try creating, renaming, or deleting
//! files under the watched directory from another shell.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vfs_facade::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vfs_facade=debug".parse()?),
        )
        .init();

    let watch_path = std::env::args().nth(1).unwrap_or_else(|| {
        std::env::current_dir()
            .expect("current dir")
            .to_string_lossy()
            .into_owned()
    });

    println!("=== vfs-facade demo ===\n");
    println!("Watching: {watch_path}\n");

    let fs = FileSystem::new();
    fs.init(Arc::new(LocalBackend::new()));

    fs.on_change(|event| match &event.entry {
        Some(entry) => {
            println!("[change] {}", entry.full_path());
            for added in event.added.iter().flatten() {
                println!("         + {}", added.full_path());
            }
            for removed in event.removed.iter().flatten() {
                println!("         - {}", removed.full_path());
            }
        }
        None => println!("[change] <wholesale>"),
    });
    fs.on_rename(|old, new| {
        println!("[rename] {old} -> {new}");
    });

    let root = fs.get_directory_for_path(&watch_path)?;
    fs.watch(&root.as_entry(), |name, _parent| {
        !name.starts_with('.') && name != "node_modules" && name != "target"
    })
    .await?;

    let contents = root.get_contents().await?;
    println!("{} top-level entries indexed\n", contents.len());
    println!("Press Ctrl+C to exit\n---\n");

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    fs.close().await?;
    println!("Done!");

    Ok(())
}
