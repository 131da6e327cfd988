use std::io;

use thiserror::Error;

use crate::fetch::FetchError;
use crate::net::PoolError;

/// Errors returned by director operations.
#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("backend {0}: unhealthy")]
    Unhealthy(String),

    #[error("backend {backend}: busy ({max} connections)")]
    OverCapacity { backend: String, max: usize },

    #[error("no backend connection: {0}")]
    ConnectFailed(#[from] PoolError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("no backend connection attached")]
    NotConnected,

    #[error("backend connection already attached")]
    AlreadyConnected,

    #[error("pipe failed: {0}")]
    Pipe(#[source] io::Error),
}

impl DirectorError {
    /// True for failures caused by the backend being unavailable, as
    /// opposed to a failed exchange on an acquired connection.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DirectorError::Unhealthy(_) | DirectorError::OverCapacity { .. } | DirectorError::ConnectFailed(_)
        )
    }
}
