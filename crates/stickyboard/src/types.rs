use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Identifier of a sticky note
///
/// Unique within the backend that assigned it. Callers always pair it with a
/// board id, so cross-board uniqueness is never relied upon.
pub type StickyId = i64;

/// A sticky note as stored on a board
///
/// Values handed out by the store are snapshots: mutating one has no effect
/// on the stored note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sticky {
    pub id: StickyId,
    pub board_id: String,
    pub text: String,
    pub x: i64,
    pub y: i64,
    pub updated_at: DateTime<Utc>,
}

/// Kind of mutation carried by a [`BoardEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Update,
    Remove,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Update => "update",
            Action::Remove => "remove",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation of a board, delivered to that board's subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    Add(Sticky),
    Update(Sticky),
    Remove(StickyId),
}

impl BoardEvent {
    pub fn action(&self) -> Action {
        match self {
            BoardEvent::Add(_) => Action::Add,
            BoardEvent::Update(_) => Action::Update,
            BoardEvent::Remove(_) => Action::Remove,
        }
    }

    /// The JSON body sent on the wire: the full record, or the bare id for removals
    pub fn data(&self) -> serde_json::Value {
        match self {
            BoardEvent::Add(sticky) | BoardEvent::Update(sticky) => json_or_null(sticky),
            BoardEvent::Remove(id) => serde_json::Value::from(*id),
        }
    }

    pub fn sticky_id(&self) -> StickyId {
        match self {
            BoardEvent::Add(sticky) | BoardEvent::Update(sticky) => sticky.id,
            BoardEvent::Remove(id) => *id,
        }
    }
}

/// A body that cannot be encoded goes out as `null` rather than dropping the event
fn json_or_null<T: Serialize + fmt::Debug>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!("Failed to encode event body {:?}: {}", value, e);
        serde_json::Value::Null
    })
}
