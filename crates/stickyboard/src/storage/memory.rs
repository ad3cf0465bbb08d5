use crate::clock::MonotonicClock;
use crate::error::Result;
use crate::storage::storage_trait::{Backend, Cursor, Interaction, Outcome, Statement};
use crate::types::{Sticky, StickyId};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

/// In-memory implementation of the Backend trait
///
/// Statements execute synchronously when issued and the result is handed back
/// through an already-completed future. Interactions apply each statement as
/// it runs; there is no rollback.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    // Per board, kept in write order: updates move a note to the end
    boards: HashMap<String, Vec<Sticky>>,
    last_id: StickyId,
    clock: MonotonicClock,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notes across all boards
    pub fn len(&self) -> usize {
        self.state.lock().boards.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryState {
    fn next_id(&mut self) -> StickyId {
        self.last_id += 1;
        self.last_id
    }

    fn position(&self, board_id: &str, sticky_id: StickyId) -> Option<usize> {
        self.boards
            .get(board_id)
            .and_then(|notes| notes.iter().position(|s| s.id == sticky_id))
    }
}

impl Cursor for MemoryState {
    fn execute(&mut self, statement: &Statement) -> Result<Outcome> {
        trace!(statement = statement.name(), "memory execute");
        match statement {
            Statement::SelectBoard { board_id } => Ok(Outcome::Rows(
                self.boards.get(board_id).cloned().unwrap_or_default(),
            )),
            Statement::SelectOne {
                board_id,
                sticky_id,
            } => {
                let rows = self
                    .boards
                    .get(board_id)
                    .into_iter()
                    .flatten()
                    .filter(|s| s.id == *sticky_id)
                    .cloned()
                    .collect();
                Ok(Outcome::Rows(rows))
            }
            Statement::Insert {
                board_id,
                text,
                x,
                y,
            } => {
                let id = self.next_id();
                let updated_at = self.clock.tick();
                self.boards
                    .entry(board_id.clone())
                    .or_default()
                    .push(Sticky {
                        id,
                        board_id: board_id.clone(),
                        text: text.clone(),
                        x: *x,
                        y: *y,
                        updated_at,
                    });
                Ok(Outcome::Inserted(id))
            }
            Statement::Update {
                board_id,
                sticky_id,
                text,
                x,
                y,
            } => {
                let Some(index) = self.position(board_id, *sticky_id) else {
                    return Ok(Outcome::Affected(0));
                };
                let updated_at = self.clock.tick();
                let notes = self.boards.entry(board_id.clone()).or_default();
                let mut sticky = notes.remove(index);
                sticky.text = text.clone();
                sticky.x = *x;
                sticky.y = *y;
                sticky.updated_at = updated_at;
                notes.push(sticky);
                Ok(Outcome::Affected(1))
            }
            Statement::Delete {
                board_id,
                sticky_id,
            } => {
                let Some(index) = self.position(board_id, *sticky_id) else {
                    return Ok(Outcome::Affected(0));
                };
                if let Some(notes) = self.boards.get_mut(board_id) {
                    notes.remove(index);
                    if notes.is_empty() {
                        self.boards.remove(board_id);
                    }
                }
                Ok(Outcome::Affected(1))
            }
        }
    }
}

impl Backend for MemoryBackend {
    fn run_query(&self, statement: Statement) -> BoxFuture<'static, Result<Outcome>> {
        let result = self.state.lock().execute(&statement);
        future::ready(result).boxed()
    }

    fn run_interaction(&self, interaction: Interaction) -> BoxFuture<'static, Result<Outcome>> {
        let result = {
            let mut state = self.state.lock();
            interaction(&mut *state)
        };
        future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn insert(board_id: &str, text: &str) -> Statement {
        Statement::Insert {
            board_id: board_id.to_string(),
            text: text.to_string(),
            x: 0,
            y: 0,
        }
    }

    fn rows(outcome: Outcome) -> Vec<Sticky> {
        match outcome {
            Outcome::Rows(rows) => rows,
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let backend = MemoryBackend::new();
        let a = block_on(backend.run_query(insert("a", "one"))).unwrap();
        let b = block_on(backend.run_query(insert("b", "two"))).unwrap();
        assert_eq!(a, Outcome::Inserted(1));
        assert_eq!(b, Outcome::Inserted(2));
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let backend = MemoryBackend::new();
        block_on(backend.run_query(insert("a", "one"))).unwrap();
        let deleted = block_on(backend.run_query(Statement::Delete {
            board_id: "a".to_string(),
            sticky_id: 1,
        }))
        .unwrap();
        assert_eq!(deleted, Outcome::Affected(1));
        assert!(backend.is_empty());

        let again = block_on(backend.run_query(insert("a", "two"))).unwrap();
        assert_eq!(again, Outcome::Inserted(2));
    }

    #[test]
    fn test_update_moves_note_last() {
        let backend = MemoryBackend::new();
        block_on(backend.run_query(insert("a", "one"))).unwrap();
        block_on(backend.run_query(insert("a", "two"))).unwrap();

        let updated = block_on(backend.run_query(Statement::Update {
            board_id: "a".to_string(),
            sticky_id: 1,
            text: "uno".to_string(),
            x: 5,
            y: 6,
        }))
        .unwrap();
        assert_eq!(updated, Outcome::Affected(1));

        let notes = rows(
            block_on(backend.run_query(Statement::SelectBoard {
                board_id: "a".to_string(),
            }))
            .unwrap(),
        );
        let ids: Vec<_> = notes.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(notes[1].text, "uno");
        assert!(notes[1].updated_at > notes[0].updated_at);
    }

    #[test]
    fn test_statements_are_board_scoped() {
        let backend = MemoryBackend::new();
        block_on(backend.run_query(insert("a", "one"))).unwrap();

        let wrong_board = block_on(backend.run_query(Statement::Delete {
            board_id: "b".to_string(),
            sticky_id: 1,
        }))
        .unwrap();
        assert_eq!(wrong_board, Outcome::Affected(0));

        let found = rows(
            block_on(backend.run_query(Statement::SelectOne {
                board_id: "b".to_string(),
                sticky_id: 1,
            }))
            .unwrap(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_interaction_sees_its_own_writes() {
        let backend = MemoryBackend::new();
        let outcome = block_on(backend.run_interaction(Box::new(|cursor: &mut dyn Cursor| {
            let id = match cursor.execute(&insert("a", "one"))? {
                Outcome::Inserted(id) => id,
                _ => 0,
            };
            cursor.execute(&Statement::SelectOne {
                board_id: "a".to_string(),
                sticky_id: id,
            })
        })))
        .unwrap();
        let notes = rows(outcome);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "one");
    }
}
