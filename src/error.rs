use thiserror::Error;

/// Errors surfaced by the buffer pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every frame is pinned, or every unpinned frame is still inside its
    /// correlated reference window. Callers decide whether to retry or abort;
    /// the pool never blocks waiting for a frame.
    #[error("no buffer available")]
    NoBufferAvailable,

    /// A read, write, or append against the underlying files failed. The
    /// affected frame has been returned to the empty state before this
    /// surfaces.
    #[error("storage i/o failed")]
    Io(#[from] std::io::Error),
}
