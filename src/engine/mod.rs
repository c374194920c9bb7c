mod conflict;
mod error;
pub mod guard;
pub mod lifecycle;
mod mutations;
mod queries;

pub use conflict::conflicts;
pub use error::{ConflictInfo, EngineError, ErrorKind, ValidationError};
pub use guard::{Action, Refusal, RefusalReason, ViewScope};

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

pub type SharedSpotState = Arc<RwLock<SpotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that arrive while a flush is being prepared ride
/// along in the same batch, so N concurrent commits cost one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Keep ordering: the batch goes to disk before e.g. a compaction.
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    // All or nothing: a failed batch is rolled off the log, so a refused
    // event can't reappear on replay next to whatever took its place.
    let result = wal.commit(batch.iter().map(|(event, _)| event));
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// The reservation service: owns spot state, serializes writers per spot and
/// commits every change to the WAL before it becomes visible.
pub struct Engine {
    spots: DashMap<SpotId, SharedSpotState>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → spot id
    booking_to_spot: DashMap<BookingId, SpotId>,
    /// Writers hold this shared for the span of a commit; compaction takes it
    /// exclusively so its snapshot and the log swap see a quiet store.
    commit_barrier: RwLock<()>,
    clock: Arc<dyn Clock>,
}

/// Apply an event to a spot (no locking; caller holds the write lock).
fn apply_to_spot(rs: &mut SpotState, event: &Event, index: &DashMap<BookingId, SpotId>) {
    match event {
        Event::SpotUpdated { name, .. } => {
            rs.name = name.clone();
        }
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.spot_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingRescheduled {
            id,
            range,
            updated_at,
            ..
        } => {
            // Re-insert so the list stays sorted by start.
            if let Some(mut b) = rs.remove_booking(*id) {
                b.range = *range;
                b.updated_at = *updated_at;
                rs.insert_booking(b);
            }
        }
        Event::BookingCancelled { id, updated_at, .. } => {
            if let Some(b) = rs.bookings.iter_mut().find(|b| b.id == *id) {
                b.status = BookingStatus::Cancelled;
                b.updated_at = *updated_at;
            }
        }
        // Spot creation and deletion change the map, not a spot's state.
        Event::SpotCreated { .. } | Event::SpotDeleted { .. } => {}
    }
}

/// The spot an event belongs to, for events applied inside a spot.
fn event_spot_id(event: &Event) -> Option<SpotId> {
    match event {
        Event::SpotUpdated { id, .. } => Some(*id),
        Event::BookingCreated { booking } => Some(booking.spot_id),
        Event::BookingRescheduled { spot_id, .. } | Event::BookingCancelled { spot_id, .. } => {
            Some(*spot_id)
        }
        Event::SpotCreated { .. } | Event::SpotDeleted { .. } => None,
    }
}

impl Engine {
    /// Open the store at `wal_path`, replaying whatever is already there.
    /// Must be called inside a Tokio runtime: it spawns the WAL writer.
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            spots: DashMap::new(),
            wal_tx,
            booking_to_spot: DashMap::new(),
            commit_barrier: RwLock::new(()),
            clock,
        };

        // Nobody else has these Arcs yet, so get_mut always succeeds.
        for event in &events {
            match event {
                Event::SpotCreated { id, owner_id, name } => {
                    let rs = SpotState::new(*id, *owner_id, name.clone());
                    engine.spots.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::SpotDeleted { id } => {
                    if let Some((_, rs)) = engine.spots.remove(id)
                        && let Ok(guard) = rs.try_read()
                    {
                        for b in &guard.bookings {
                            engine.booking_to_spot.remove(&b.id);
                        }
                    }
                }
                other => {
                    if let Some(spot_id) = event_spot_id(other)
                        && let Some(mut entry) = engine.spots.get_mut(&spot_id)
                        && let Some(rs) = Arc::get_mut(entry.value_mut())
                    {
                        apply_to_spot(rs.get_mut(), other, &engine.booking_to_spot);
                    }
                }
            }
        }

        tracing::info!(
            "replayed {} events: {} spots, {} bookings",
            events.len(),
            engine.spots.len(),
            engine.booking_to_spot.len()
        );
        engine.record_gauges();
        Ok(engine)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_spot.len()
    }

    fn record_gauges(&self) {
        metrics::gauge!(crate::observability::SPOTS).set(self.spots.len() as f64);
        metrics::gauge!(crate::observability::BOOKINGS).set(self.booking_to_spot.len() as f64);
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    fn get_spot_handle(&self, id: &SpotId) -> Option<SharedSpotState> {
        self.spots.get(id).map(|e| e.value().clone())
    }

    /// WAL-append, then apply. The event is durable before anyone can see it.
    async fn persist_and_apply(
        &self,
        rs: &mut SpotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_spot(rs, event, &self.booking_to_spot);
        Ok(())
    }

    /// Lock a spot for writing. A spot deleted while we waited is gone.
    async fn spot_write(
        &self,
        spot_id: SpotId,
    ) -> Result<OwnedRwLockWriteGuard<SpotState>, EngineError> {
        let rs = self
            .get_spot_handle(&spot_id)
            .ok_or(EngineError::SpotNotFound(spot_id))?;
        let guard = rs.write_owned().await;
        if guard.deleted {
            return Err(EngineError::SpotNotFound(spot_id));
        }
        Ok(guard)
    }

    /// Lookup booking → spot, acquire the spot's write lock.
    async fn booking_write(
        &self,
        booking_id: BookingId,
    ) -> Result<OwnedRwLockWriteGuard<SpotState>, EngineError> {
        let spot_id = self
            .booking_to_spot
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let guard = self
            .spot_write(spot_id)
            .await
            .map_err(|_| EngineError::BookingNotFound(booking_id))?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::BookingNotFound(booking_id));
        }
        Ok(guard)
    }

    /// Run a commit on its own task. If the caller stops waiting, the commit
    /// still finishes (or fails) as a unit; it is never cut between the WAL
    /// append and the in-memory apply.
    async fn detached<T, F, Fut>(self: &Arc<Self>, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<Engine>) -> Fut,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(f(Arc::clone(self)))
            .await
            .map_err(|e| EngineError::Internal(format!("commit task failed: {e}")))?
    }
}
