mod memory;
mod sqlite;
mod storage_trait;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use storage_trait::{Backend, Cursor, Interaction, Outcome, Statement};
