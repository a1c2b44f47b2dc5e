use thiserror::Error;

/// Errors reported by the compute device, the parallel building blocks and the tree builder.
///
/// Setup failures (`Unsupported`, `GroupSize`, `Allocation`, `Config`) are returned from the
/// `create` functions and leave nothing behind. Every other variant comes out of a `dispatch`:
/// the buffers touched by that dispatch must be treated as stale until the next successful one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("compute shaders are not supported by the device")]
    Unsupported,

    #[error("group size {size} must be a power of two between 2 and {limit}")]
    GroupSize { size: u32, limit: u32 },

    #[error("allocation of {requested} bytes exceeds the device budget ({available} bytes available)")]
    Allocation { requested: usize, available: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{count} elements exceed the capacity of {capacity}")]
    Capacity { count: usize, capacity: usize },

    #[error("pass `{pass}` accesses buffer {buffer} before a barrier")]
    Hazard { pass: &'static str, buffer: u64 },

    #[error("range {offset}..{end} is out of bounds for a buffer of {len} words")]
    OutOfBounds { offset: usize, end: usize, len: usize },

    #[error("{0} mode does not support segmented dispatch")]
    Mode(&'static str),

    #[error("device lost")]
    DeviceLost,
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
