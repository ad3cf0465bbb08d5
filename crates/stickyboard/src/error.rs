use crate::types::StickyId;
use thiserror::Error;

/// Failure of a board store operation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sticky {sticky_id} not found on board {board_id}")]
    NotFound { board_id: String, sticky_id: StickyId },

    #[error("backend operation failed: {0}")]
    Backend(#[from] BackendError),
}

impl StoreError {
    pub fn not_found(board_id: &str, sticky_id: StickyId) -> Self {
        StoreError::NotFound {
            board_id: board_id.to_string(),
            sticky_id,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Storage I/O or query failure
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The readiness queue was dropped before the operation was replayed
    #[error("operation was dropped before a backend was attached")]
    Detached,

    #[error("unexpected backend outcome: expected {expected}")]
    UnexpectedOutcome { expected: &'static str },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(BackendError::Sqlite(e))
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Backend(BackendError::Pool(e))
    }
}

/// Failure delivering an event to a subscriber
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriberError {
    #[error("subscriber connection closed")]
    Disconnected,

    #[error("subscriber rejected event: {0}")]
    Rejected(String),

    #[error("subscriber panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure opening a live feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("failed to load board snapshot: {0}")]
    Store(#[from] StoreError),

    #[error("feed connection failed: {0}")]
    Connection(#[from] SubscriberError),
}
