use crate::error::{BackendError, Result};
use crate::storage::{Backend, Interaction, Outcome, Statement};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// A request waiting for, or being handed to, a backend
pub enum Operation {
    Query(Statement),
    Interaction(Interaction),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Query(statement) => statement.name(),
            Operation::Interaction(_) => "interaction",
        }
    }

    fn run(self, backend: &dyn Backend) -> BoxFuture<'static, Result<Outcome>> {
        match self {
            Operation::Query(statement) => backend.run_query(statement),
            Operation::Interaction(interaction) => backend.run_interaction(interaction),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Query(statement) => f.debug_tuple("Query").field(statement).finish(),
            Operation::Interaction(_) => f.write_str("Interaction(..)"),
        }
    }
}

struct PendingOp {
    operation: Operation,
    reply: oneshot::Sender<Result<Outcome>>,
}

enum Readiness {
    /// No backend yet
    Pending { queue: VecDeque<PendingOp> },
    /// Backend attached, backlog still replaying. New requests queue behind it.
    Draining {
        backend: Arc<dyn Backend>,
        queue: VecDeque<PendingOp>,
    },
    Ready { backend: Arc<dyn Backend> },
}

enum DrainStep {
    Replay(Arc<dyn Backend>, PendingOp),
    Finished(Arc<dyn Backend>),
    Idle,
}

/// Backend that accepts requests before the real backend exists
///
/// Requests issued while no backend is attached are buffered in issue order
/// and replayed one at a time once [`attach`](Self::attach) is called. After
/// that, requests go straight to the attached backend.
///
/// Replays run on their own task, so cancelling `attach` or `drain` never
/// strands the backlog or drops the reply of an operation already handed to
/// the backend.
///
/// If the queue is dropped with requests still buffered, their futures fail
/// with [`BackendError::Detached`].
pub struct ReadinessQueue {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<Readiness>,
    // Serializes replays so two drains never interleave the backlog
    drain_lock: tokio::sync::Mutex<()>,
}

impl ReadinessQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Readiness::Pending {
                    queue: VecDeque::new(),
                }),
                drain_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Submit an operation
    ///
    /// Never fails at submission time. The returned future resolves with the
    /// backend's result once the operation has run.
    pub fn enqueue(&self, operation: Operation) -> BoxFuture<'static, Result<Outcome>> {
        let backend = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                Readiness::Ready { backend } => Arc::clone(backend),
                Readiness::Pending { queue } | Readiness::Draining { queue, .. } => {
                    let (reply, rx) = oneshot::channel();
                    trace!(
                        operation = operation.name(),
                        position = queue.len(),
                        "queueing operation until backend is ready"
                    );
                    queue.push_back(PendingOp { operation, reply });
                    return async move {
                        rx.await
                            .unwrap_or_else(|_| Err(BackendError::Detached.into()))
                    }
                    .boxed();
                }
            }
        };

        operation.run(&*backend)
    }

    /// Bind a backend and replay everything queued so far
    ///
    /// Attaching again swaps the backend used for later requests; requests
    /// already replayed are not run a second time.
    pub async fn attach<B: Backend>(&self, backend: B) {
        let backend: Arc<dyn Backend> = Arc::new(backend);
        {
            let mut state = self.shared.state.lock();
            let previous = std::mem::replace(
                &mut *state,
                Readiness::Pending {
                    queue: VecDeque::new(),
                },
            );
            *state = match previous {
                Readiness::Pending { queue } => {
                    info!(pending = queue.len(), "backend attached");
                    Readiness::Draining { backend, queue }
                }
                Readiness::Draining { queue, .. } => {
                    warn!("backend replaced while replaying queued operations");
                    Readiness::Draining { backend, queue }
                }
                Readiness::Ready { .. } => {
                    warn!("backend replaced");
                    Readiness::Ready { backend }
                }
            };
        }

        self.drain().await;
    }

    /// Replay queued operations against the attached backend, oldest first
    ///
    /// Returns how many operations were replayed. A no-op when nothing is
    /// queued or no backend is attached yet.
    pub async fn drain(&self) -> usize {
        let shared = Arc::clone(&self.shared);
        match tokio::spawn(async move { shared.replay().await }).await {
            Ok(replayed) => replayed,
            Err(e) => {
                warn!("replay task failed: {}", e);
                0
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.state.lock(), Readiness::Ready { .. })
    }

    /// Number of operations waiting to be replayed
    pub fn pending_len(&self) -> usize {
        match &*self.shared.state.lock() {
            Readiness::Pending { queue } | Readiness::Draining { queue, .. } => queue.len(),
            Readiness::Ready { .. } => 0,
        }
    }
}

impl Shared {
    async fn replay(&self) -> usize {
        let _guard = self.drain_lock.lock().await;
        let mut replayed = 0;

        loop {
            let step = {
                let mut state = self.state.lock();
                let step = match &mut *state {
                    Readiness::Draining { backend, queue } => match queue.pop_front() {
                        Some(op) => DrainStep::Replay(Arc::clone(backend), op),
                        None => DrainStep::Finished(Arc::clone(backend)),
                    },
                    _ => DrainStep::Idle,
                };
                if let DrainStep::Finished(backend) = &step {
                    *state = Readiness::Ready {
                        backend: Arc::clone(backend),
                    };
                }
                step
            };

            let (backend, PendingOp { operation, reply }) = match step {
                DrainStep::Replay(backend, op) => (backend, op),
                DrainStep::Finished(_) | DrainStep::Idle => break,
            };

            debug!(operation = operation.name(), "replaying queued operation");
            let result = operation.run(&*backend).await;
            if reply.send(result).is_err() {
                debug!("caller stopped waiting for a replayed operation");
            }
            replayed += 1;
        }

        if replayed > 0 {
            info!(replayed, "readiness queue drained");
        }
        replayed
    }
}

impl Default for ReadinessQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for ReadinessQueue {
    fn run_query(&self, statement: Statement) -> BoxFuture<'static, Result<Outcome>> {
        self.enqueue(Operation::Query(statement))
    }

    fn run_interaction(&self, interaction: Interaction) -> BoxFuture<'static, Result<Outcome>> {
        self.enqueue(Operation::Interaction(interaction))
    }
}
