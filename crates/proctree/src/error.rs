use crate::Pid;

/// Boxed error returned by a [`ProcessSource`](crate::ProcessSource).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The process listing call failed. The session keeps its previous snapshot.
    #[error("failed to enumerate processes: {0}")]
    Enumeration(BoxError),

    /// A configured root pid was absent when configured roots were resolved.
    /// Resolution is retried on the next update.
    #[error("configured root pid {0} does not exist")]
    RootNotFound(Pid),
}
