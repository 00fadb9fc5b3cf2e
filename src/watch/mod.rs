//! Watched-root management and the serialized watch-request pipeline.

pub(crate) mod queue;
pub mod roots;

pub use roots::WatchFilter;
