// Architecture modules
pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod hub;
pub mod readiness;
pub mod storage;
pub mod store;
pub mod types;

// Public exports
pub use config::{BackendKind, Config};
pub use error::{BackendError, FeedError, StoreError, SubscriberError};
pub use feed::{FeedFrame, FeedSink, LiveFeed};
pub use hub::{EventHub, Subscriber, SubscriptionId};
pub use readiness::{Operation, ReadinessQueue};
pub use storage::{Backend, MemoryBackend, SqliteBackend};
pub use store::BoardStore;
pub use types::{Action, BoardEvent, Sticky, StickyId};
