//! Virtual filesystem facade.
//!
//! This crate sits between application code and a pluggable low-level
//! storage backend (local disk, in-memory) and provides:
//!
//! - **Stable, deduplicated handles**: every path normalizes to one
//!   canonical form and interns to exactly one [`fs::File`] or
//!   [`fs::Directory`] object, so handle equality is identity.
//! - **A consistent cache** of directory listings and file stats, kept
//!   fresh by watcher traffic under watched roots and invalidated on
//!   unwatch.
//! - **Watched roots** with per-root include filters, recursive or
//!   per-directory depending on backend capability, with all backend
//!   watch/unwatch calls serialized through one queue.
//! - **Change coordination**: in-process mutations bracket themselves so
//!   externally observed changes are delivered only once the index is
//!   consistent, which is what keeps a rename from being misread as an
//!   unrelated delete/add pair.
//!
//! ## Event flow
//!
//! ```text
//! Backend watcher
//!        ↓
//! BackendNotice (mpsc channel)
//!        ↓
//! listener task → enqueue_external_change()
//!        ↓                    deferred while a mutation bracket is open
//! handle_external_change()
//!        ↓
//! index update + cache invalidation
//!        ↓
//! change / rename observers
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vfs_facade::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), FsError> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     backend.add_file("/proj/src/main.rs", b"fn main() {}");
//!
//!     let fs = FileSystem::new();
//!     fs.init(backend);
//!
//!     fs.on_change(|event| {
//!         if let Some(entry) = &event.entry {
//!             println!("changed: {}", entry.full_path());
//!         }
//!     });
//!
//!     let project = fs.get_directory_for_path("/proj")?;
//!     fs.watch(&project.as_entry(), |name, _parent| !name.starts_with('.'))
//!         .await?;
//!
//!     let (entry, stat) = fs.resolve("/proj/src/main.rs").await?;
//!     println!("{} is {} bytes", entry.full_path(), stat.size);
//!     Ok(())
//! }
//! ```
//!
//! ## Module structure
//!
//! - [`fs`]: entry handles, intern index, change coordination, events, and
//!   the [`fs::FileSystem`] facade
//! - [`watch`]: watched-root registry and the serial watch-request queue
//! - [`backend`]: the [`backend::Backend`] contract plus the local-disk
//!   and in-memory implementations
//! - [`path_util`]: canonical path normalization
//! - [`error`]: the [`error::FsError`] type

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod error;
pub mod fs;
pub mod path_util;
pub mod watch;

/// Re-exports for convenience.
pub mod prelude {
    pub use crate::backend::{
        Backend, BackendNotice, LocalBackend, MemoryBackend, OpenDialogOptions, SaveDialogOptions,
    };
    pub use crate::error::FsError;
    pub use crate::fs::{ChangeEvent, Directory, Entry, File, FileStat, FileSystem, ListenerId};
    pub use crate::path_util::is_absolute_path;
    pub use crate::watch::WatchFilter;
}
