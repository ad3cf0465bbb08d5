use crate::error::Result;
use crate::types::{Sticky, StickyId};
use futures::future::BoxFuture;

/// A single dialect-free statement against the sticky table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// All notes of a board, oldest write first
    SelectBoard { board_id: String },
    SelectOne {
        board_id: String,
        sticky_id: StickyId,
    },
    Insert {
        board_id: String,
        text: String,
        x: i64,
        y: i64,
    },
    Update {
        board_id: String,
        sticky_id: StickyId,
        text: String,
        x: i64,
        y: i64,
    },
    Delete {
        board_id: String,
        sticky_id: StickyId,
    },
}

impl Statement {
    pub fn name(&self) -> &'static str {
        match self {
            Statement::SelectBoard { .. } => "select_board",
            Statement::SelectOne { .. } => "select_one",
            Statement::Insert { .. } => "insert",
            Statement::Update { .. } => "update",
            Statement::Delete { .. } => "delete",
        }
    }
}

/// What a statement or interaction produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Rows(Vec<Sticky>),
    /// Number of rows changed by an update or delete
    Affected(usize),
    /// Id assigned by an insert
    Inserted(StickyId),
}

/// Transactional handle passed to an [`Interaction`]
pub trait Cursor {
    fn execute(&mut self, statement: &Statement) -> Result<Outcome>;
}

/// Work run inside one backend transaction
///
/// Returning `Err` rolls the transaction back on backends that support it.
pub type Interaction = Box<dyn FnOnce(&mut dyn Cursor) -> Result<Outcome> + Send + 'static>;

/// Asynchronous storage abstraction for sticky notes
///
/// Work is issued when the method is called; the returned future only waits
/// for the result. Callers therefore observe the backend executing requests
/// in the order the methods were called, whatever backend sits underneath.
///
/// Implementations never retry: a failure fails the returned future.
pub trait Backend: Send + Sync + 'static {
    /// Run one statement in its own transaction
    fn run_query(&self, statement: Statement) -> BoxFuture<'static, Result<Outcome>>;

    /// Run several statements in one transaction
    fn run_interaction(&self, interaction: Interaction) -> BoxFuture<'static, Result<Outcome>>;
}

impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn run_query(&self, statement: Statement) -> BoxFuture<'static, Result<Outcome>> {
        (**self).run_query(statement)
    }

    fn run_interaction(&self, interaction: Interaction) -> BoxFuture<'static, Result<Outcome>> {
        (**self).run_interaction(interaction)
    }
}
