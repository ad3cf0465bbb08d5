use crate::error::{FeedError, SubscriberError};
use crate::hub::{EventHub, Subscriber, SubscriptionId};
use crate::storage::Backend;
use crate::types::{BoardEvent, Sticky, StickyId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const KEEP_ALIVE_EVENT: &str = "hello";

/// A named event with a JSON body, as pushed down a streaming connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl FeedFrame {
    pub fn keep_alive() -> Self {
        Self {
            event: KEEP_ALIVE_EVENT.to_string(),
            data: serde_json::Value::from("keep alive"),
        }
    }

    pub fn from_event(event: &BoardEvent) -> Self {
        Self {
            event: event.action().to_string(),
            data: event.data(),
        }
    }

    /// Render as a server-sent event message
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// The writing half of one client connection
pub trait FeedSink: Send + Sync + 'static {
    fn send_frame(&self, frame: FeedFrame) -> Result<(), SubscriberError>;
}

impl FeedSink for mpsc::UnboundedSender<FeedFrame> {
    fn send_frame(&self, frame: FeedFrame) -> Result<(), SubscriberError> {
        self.send(frame).map_err(|_| SubscriberError::Disconnected)
    }
}

/// A full buffer means the client stopped reading; it is treated as a failure
impl FeedSink for mpsc::Sender<FeedFrame> {
    fn send_frame(&self, frame: FeedFrame) -> Result<(), SubscriberError> {
        self.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SubscriberError::Rejected("feed buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => SubscriberError::Disconnected,
        })
    }
}

struct FeedSubscriber<S> {
    sink: S,
    replay: Mutex<Replay>,
}

/// Events that arrive while the snapshot loads are held back, then checked
/// against the snapshot so a note is never announced twice
struct Replay {
    backlog: Option<Vec<BoardEvent>>,
    snapshot: HashMap<StickyId, DateTime<Utc>>,
}

fn covered_by(snapshot: &HashMap<StickyId, DateTime<Utc>>, event: &BoardEvent) -> bool {
    match event {
        BoardEvent::Add(sticky) => snapshot.contains_key(&sticky.id),
        BoardEvent::Update(sticky) => snapshot
            .get(&sticky.id)
            .is_some_and(|seen| sticky.updated_at <= *seen),
        BoardEvent::Remove(_) => false,
    }
}

impl<S: FeedSink> FeedSubscriber<S> {
    fn new(sink: S) -> Self {
        Self {
            sink,
            replay: Mutex::new(Replay {
                backlog: Some(Vec::new()),
                snapshot: HashMap::new(),
            }),
        }
    }

    /// Send the snapshot as `add` frames, then whatever arrived while it loaded
    fn finish_replay(&self, snapshot: Vec<Sticky>) -> Result<usize, SubscriberError> {
        let mut replay = self.replay.lock();
        let replayed = snapshot.len();
        for sticky in snapshot {
            replay.snapshot.insert(sticky.id, sticky.updated_at);
            self.sink
                .send_frame(FeedFrame::from_event(&BoardEvent::Add(sticky)))?;
        }

        let backlog = replay.backlog.take().unwrap_or_default();
        for event in backlog {
            if !covered_by(&replay.snapshot, &event) {
                self.sink.send_frame(FeedFrame::from_event(&event))?;
            }
        }
        Ok(replayed)
    }
}

impl<S: FeedSink> Subscriber for FeedSubscriber<S> {
    fn notify(&self, event: &BoardEvent) -> Result<(), SubscriberError> {
        let mut replay = self.replay.lock();
        if let Some(backlog) = replay.backlog.as_mut() {
            backlog.push(event.clone());
            return Ok(());
        }
        if covered_by(&replay.snapshot, event) {
            return Ok(());
        }
        self.sink.send_frame(FeedFrame::from_event(event))
    }
}

/// One open streaming connection following one board
///
/// Opening the feed sends a keep-alive frame, then an `add` frame for every
/// note currently on the board, then forwards every later event. There is no
/// end-of-stream frame. Closing or dropping the feed unsubscribes it.
///
/// The feed subscribes before it reads the snapshot, so a change made while
/// the snapshot is loading is still delivered, after the snapshot frames.
pub struct LiveFeed<B: Backend> {
    hub: EventHub<B>,
    board_id: String,
    subscription: Option<SubscriptionId>,
}

impl<B: Backend> LiveFeed<B> {
    pub async fn open<S: FeedSink>(
        hub: &EventHub<B>,
        board_id: &str,
        sink: S,
    ) -> Result<Self, FeedError> {
        sink.send_frame(FeedFrame::keep_alive())?;

        let subscriber = Arc::new(FeedSubscriber::new(sink));
        let live = Arc::clone(&subscriber);
        let subscription =
            hub.subscribe(board_id, move |event: &BoardEvent| live.notify(event));

        // Unsubscribes on any early return below
        let feed = Self {
            hub: hub.clone(),
            board_id: board_id.to_string(),
            subscription: Some(subscription),
        };

        let snapshot = hub.get_stickies(board_id).await?;
        let replayed = subscriber.finish_replay(snapshot)?;
        info!(
            "Live feed {} opened on board {} ({} notes replayed)",
            subscription, board_id, replayed
        );

        Ok(feed)
    }

    /// Open a feed writing into a fresh bounded channel
    pub async fn channel(
        hub: &EventHub<B>,
        board_id: &str,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<FeedFrame>), FeedError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let feed = Self::open(hub, board_id, tx).await?;
        Ok((feed, rx))
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription
    }

    /// False once closed, or once the hub dropped the feed after a failed delivery
    pub fn is_active(&self) -> bool {
        self.subscription
            .is_some_and(|id| self.hub.is_subscribed(&self.board_id, id))
    }

    /// Stop receiving events; call when the transport closes
    pub fn close(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.hub.unsubscribe(&self.board_id, id);
            debug!("Live feed {} closed on board {}", id, self.board_id);
        }
    }
}

impl<B: Backend> Drop for LiveFeed<B> {
    fn drop(&mut self) {
        self.close();
    }
}
