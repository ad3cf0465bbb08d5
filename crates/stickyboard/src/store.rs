use crate::error::{BackendError, Result, StoreError};
use crate::storage::{Backend, Cursor, Interaction, Outcome, Statement};
use crate::types::{Sticky, StickyId};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// CRUD over sticky notes, scoped by board id
///
/// Generic over Backend so the same store runs on the in-memory backend, on
/// SQLite, or on a [`ReadinessQueue`](crate::ReadinessQueue) that is still
/// waiting for its backend.
///
/// Every method issues its request immediately and returns a future for the
/// result, so requests reach the backend in the order the methods were called
/// even if the futures are awaited later or in another order.
pub struct BoardStore<B: Backend> {
    backend: Arc<B>,
}

impl<B: Backend> Clone for BoardStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: Backend> BoardStore<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// All notes on a board, oldest write first
    pub fn get_stickies(
        &self,
        board_id: &str,
    ) -> impl Future<Output = Result<Vec<Sticky>>> + Send + 'static {
        let board_id = board_id.to_string();
        let pending = self.backend.run_query(Statement::SelectBoard {
            board_id: board_id.clone(),
        });

        async move {
            let mut rows = pending
                .await
                .and_then(into_rows)
                .inspect_err(|e| log_failure("get_stickies", &board_id, e))?;
            // Stable, so notes sharing a timestamp keep their write order
            rows.sort_by_key(|s| s.updated_at);
            Ok(rows)
        }
    }

    pub fn get_sticky(
        &self,
        sticky_id: StickyId,
        board_id: &str,
    ) -> impl Future<Output = Result<Sticky>> + Send + 'static {
        let board_id = board_id.to_string();
        let pending = self.backend.run_query(Statement::SelectOne {
            board_id: board_id.clone(),
            sticky_id,
        });

        async move {
            pending
                .await
                .and_then(|outcome| single(outcome, &board_id, sticky_id))
                .inspect_err(|e| log_failure("get_sticky", &board_id, e))
        }
    }

    /// Create a note; id and timestamp are assigned by the backend
    pub fn add_sticky(
        &self,
        board_id: &str,
        text: impl Into<String>,
        x: i64,
        y: i64,
    ) -> impl Future<Output = Result<Sticky>> + Send + 'static {
        let board_id = board_id.to_string();
        let text = text.into();

        let interaction: Interaction = {
            let board_id = board_id.clone();
            Box::new(move |cursor: &mut dyn Cursor| {
                let sticky_id = match cursor.execute(&Statement::Insert {
                    board_id: board_id.clone(),
                    text,
                    x,
                    y,
                })? {
                    Outcome::Inserted(id) => id,
                    _ => return Err(unexpected("inserted id")),
                };
                cursor.execute(&Statement::SelectOne {
                    board_id,
                    sticky_id,
                })
            })
        };
        let pending = self.backend.run_interaction(interaction);

        async move {
            let sticky = pending
                .await
                .and_then(|outcome| match outcome {
                    Outcome::Rows(rows) => {
                        rows.into_iter().next().ok_or_else(|| unexpected("stored row"))
                    }
                    _ => Err(unexpected("rows")),
                })
                .inspect_err(|e| log_failure("add_sticky", &board_id, e))?;
            debug!("ADD board={} id={}", board_id, sticky.id);
            Ok(sticky)
        }
    }

    /// Overwrite a note's text and position and refresh its timestamp
    ///
    /// Fails with `NotFound` if the note does not exist on this board.
    pub fn update_sticky(
        &self,
        board_id: &str,
        sticky_id: StickyId,
        text: impl Into<String>,
        x: i64,
        y: i64,
    ) -> impl Future<Output = Result<Sticky>> + Send + 'static {
        let board_id = board_id.to_string();
        let text = text.into();

        let interaction: Interaction = {
            let board_id = board_id.clone();
            Box::new(move |cursor: &mut dyn Cursor| {
                let changed = cursor.execute(&Statement::Update {
                    board_id: board_id.clone(),
                    sticky_id,
                    text,
                    x,
                    y,
                })?;
                if changed == Outcome::Affected(0) {
                    return Err(StoreError::not_found(&board_id, sticky_id));
                }
                cursor.execute(&Statement::SelectOne {
                    board_id,
                    sticky_id,
                })
            })
        };
        let pending = self.backend.run_interaction(interaction);

        async move {
            let sticky = pending
                .await
                .and_then(|outcome| single(outcome, &board_id, sticky_id))
                .inspect_err(|e| log_failure("update_sticky", &board_id, e))?;
            debug!("UPDATE board={} id={}", board_id, sticky_id);
            Ok(sticky)
        }
    }

    /// Delete a note, returning its id as acknowledgment
    pub fn remove_sticky(
        &self,
        board_id: &str,
        sticky_id: StickyId,
    ) -> impl Future<Output = Result<StickyId>> + Send + 'static {
        let board_id = board_id.to_string();
        let pending = self.backend.run_query(Statement::Delete {
            board_id: board_id.clone(),
            sticky_id,
        });

        async move {
            let removed = pending
                .await
                .and_then(|outcome| match outcome {
                    Outcome::Affected(0) => Err(StoreError::not_found(&board_id, sticky_id)),
                    Outcome::Affected(_) => Ok(sticky_id),
                    _ => Err(unexpected("affected rows")),
                })
                .inspect_err(|e| log_failure("remove_sticky", &board_id, e))?;
            debug!("REMOVE board={} id={}", board_id, sticky_id);
            Ok(removed)
        }
    }
}

fn into_rows(outcome: Outcome) -> Result<Vec<Sticky>> {
    match outcome {
        Outcome::Rows(rows) => Ok(rows),
        _ => Err(unexpected("rows")),
    }
}

fn single(outcome: Outcome, board_id: &str, sticky_id: StickyId) -> Result<Sticky> {
    into_rows(outcome)?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::not_found(board_id, sticky_id))
}

fn unexpected(expected: &'static str) -> StoreError {
    BackendError::UnexpectedOutcome { expected }.into()
}

fn log_failure(operation: &str, board_id: &str, err: &StoreError) {
    match err {
        StoreError::NotFound { .. } => debug!("{} on board {}: {}", operation, board_id, err),
        StoreError::Backend(_) => error!("{} on board {} failed: {}", operation, board_id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::ReadinessQueue;
    use crate::storage::MemoryBackend;

    fn memory_store() -> BoardStore<MemoryBackend> {
        BoardStore::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_add_returns_stored_record() {
        let store = memory_store();
        let sticky = store.add_sticky("demo", "hi", 10, 20).await.unwrap();

        assert_eq!(sticky.id, 1);
        assert_eq!(sticky.board_id, "demo");
        assert_eq!(sticky.text, "hi");
        assert_eq!((sticky.x, sticky.y), (10, 20));

        let fetched = store.get_sticky(1, "demo").await.unwrap();
        assert_eq!(fetched, sticky);
    }

    #[tokio::test]
    async fn test_update_refreshes_timestamp_and_order() {
        let store = memory_store();
        let first = store.add_sticky("demo", "one", 0, 0).await.unwrap();
        let second = store.add_sticky("demo", "two", 0, 0).await.unwrap();

        let updated = store
            .update_sticky("demo", first.id, "uno", 5, 5)
            .await
            .unwrap();
        assert_eq!(updated.text, "uno");
        assert!(updated.updated_at > first.updated_at);

        let ids: Vec<_> = store
            .get_stickies("demo")
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_missing_note_is_not_found() {
        let store = memory_store();
        store.add_sticky("a", "mine", 0, 0).await.unwrap();

        assert!(store.get_sticky(1, "b").await.unwrap_err().is_not_found());
        assert!(
            store
                .update_sticky("b", 1, "x", 0, 0)
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(store.remove_sticky("b", 1).await.unwrap_err().is_not_found());
        assert!(store.remove_sticky("a", 42).await.unwrap_err().is_not_found());

        // The note on board "a" is untouched
        assert_eq!(store.get_sticky(1, "a").await.unwrap().text, "mine");
    }

    #[tokio::test]
    async fn test_remove_returns_id() {
        let store = memory_store();
        let sticky = store.add_sticky("demo", "bye", 0, 0).await.unwrap();
        assert_eq!(store.remove_sticky("demo", sticky.id).await.unwrap(), sticky.id);
        assert!(store.get_stickies("demo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requests_issued_before_backend_is_ready() {
        let queue = Arc::new(ReadinessQueue::new());
        let store = BoardStore::new(Arc::clone(&queue));

        let add_a = store.add_sticky("demo", "a", 1, 1);
        let add_b = store.add_sticky("demo", "b", 2, 2);
        let list = store.get_stickies("demo");
        assert_eq!(queue.pending_len(), 3);

        queue.attach(MemoryBackend::new()).await;

        assert_eq!(add_a.await.unwrap().id, 1);
        assert_eq!(add_b.await.unwrap().id, 2);
        let texts: Vec<_> = list.await.unwrap().into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }
}
