use std::io;

/// Resource-level failures that can surface from the fallible constructors.
///
/// These are distinct from the fatal precondition violations in [`crate::runtime`]
/// (resuming a dead strand, freeing a live one, yielding outside a strand), which
/// are programmer errors and abort the process rather than return an `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The anonymous stack mapping could not be obtained.
    #[error("failed to map stack of {size} bytes: {source}")]
    Map { size: usize, source: io::Error },

    /// The guard page could not be made inaccessible.
    #[error("failed to protect guard page: {source}")]
    Protect { source: io::Error },

    /// The defer-list node pool and the allocator are both exhausted.
    #[error("failed to allocate a defer node")]
    DeferAlloc,
}
