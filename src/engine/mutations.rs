use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{self, Operation};

use super::guard::{can_act_on_spot, Action};
use super::lifecycle::{gate_cancel, gate_confirm, gate_reschedule};
use super::{Engine, EngineError, WalCommand};

fn validate_name(name: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("spot name too long"));
    }
    Ok(())
}

impl Engine {
    // ── Spots ────────────────────────────────────────────────

    /// List a new spot owned by `owner`.
    pub async fn create_spot(
        self: &Arc<Self>,
        owner: UserId,
        name: Option<String>,
    ) -> Result<SpotId, EngineError> {
        let started = Instant::now();
        let result = self
            .detached(move |engine| async move { engine.commit_create_spot(owner, name).await })
            .await;
        observability::record(Operation::CreateSpot, started, &result);
        result
    }

    async fn commit_create_spot(
        &self,
        owner: UserId,
        name: Option<String>,
    ) -> Result<SpotId, EngineError> {
        validate_name(&name)?;
        if self.spots.len() >= MAX_SPOTS {
            return Err(EngineError::LimitExceeded("too many spots"));
        }
        let id = Ulid::new();
        let _barrier = self.commit_barrier.read().await;
        let event = Event::SpotCreated {
            id,
            owner_id: owner,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.spots
            .insert(id, Arc::new(RwLock::new(SpotState::new(id, owner, name))));
        self.record_gauges();
        tracing::debug!(%id, %owner, "spot created");
        Ok(id)
    }

    pub async fn update_spot(
        self: &Arc<Self>,
        actor: UserId,
        spot_id: SpotId,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self
            .detached(move |engine| async move {
                engine.commit_update_spot(actor, spot_id, name).await
            })
            .await;
        observability::record(Operation::UpdateSpot, started, &result);
        result
    }

    async fn commit_update_spot(
        &self,
        actor: UserId,
        spot_id: SpotId,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        validate_name(&name)?;
        let _barrier = self.commit_barrier.read().await;
        let mut guard = self.spot_write(spot_id).await?;
        can_act_on_spot(actor, &guard, Action::EditSpot)?;

        let event = Event::SpotUpdated { id: spot_id, name };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Remove a spot. Refused while any confirmed booking on it has not yet
    /// ended; past and cancelled bookings go with the spot.
    pub async fn delete_spot(
        self: &Arc<Self>,
        actor: UserId,
        spot_id: SpotId,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self
            .detached(move |engine| async move { engine.commit_delete_spot(actor, spot_id).await })
            .await;
        observability::record(Operation::DeleteSpot, started, &result);
        result
    }

    async fn commit_delete_spot(&self, actor: UserId, spot_id: SpotId) -> Result<(), EngineError> {
        let _barrier = self.commit_barrier.read().await;
        let mut guard = self.spot_write(spot_id).await?;
        can_act_on_spot(actor, &guard, Action::DeleteSpot)?;
        if guard.active_bookings(self.clock.today()).next().is_some() {
            return Err(EngineError::HasActiveBookings(spot_id));
        }

        self.wal_append(&Event::SpotDeleted { id: spot_id }).await?;
        guard.deleted = true;
        for b in &guard.bookings {
            self.booking_to_spot.remove(&b.id);
        }
        self.spots.remove(&spot_id);
        self.record_gauges();
        tracing::debug!(%spot_id, "spot deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Book `spot_id` for the nights `[start, end)` on behalf of `actor`.
    pub async fn create_booking(
        self: &Arc<Self>,
        actor: UserId,
        spot_id: SpotId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self
            .detached(move |engine| async move {
                engine.commit_create_booking(actor, spot_id, start, end).await
            })
            .await;
        observability::record(Operation::CreateBooking, started, &result);
        result
    }

    async fn commit_create_booking(
        &self,
        actor: UserId,
        spot_id: SpotId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let _barrier = self.commit_barrier.read().await;
        let mut guard = self.spot_write(spot_id).await?;
        let range = gate_confirm(&guard, actor, start, end, self.clock.today())?;

        let now = self.clock.now_ms();
        let booking = Booking {
            id: Ulid::new(),
            spot_id,
            user_id: actor,
            range,
            status: BookingStatus::Confirmed,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        self.record_gauges();
        tracing::debug!(booking_id = %booking.id, %spot_id, %range, "booking confirmed");
        Ok(booking)
    }

    /// Move a booking to new dates. Only its holder may, and only before checkout.
    pub async fn update_booking_dates(
        self: &Arc<Self>,
        actor: UserId,
        booking_id: BookingId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self
            .detached(move |engine| async move {
                engine
                    .commit_update_booking_dates(actor, booking_id, start, end)
                    .await
            })
            .await;
        observability::record(Operation::UpdateBookingDates, started, &result);
        result
    }

    async fn commit_update_booking_dates(
        &self,
        actor: UserId,
        booking_id: BookingId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let _barrier = self.commit_barrier.read().await;
        let mut guard = self.booking_write(booking_id).await?;
        let current = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let range = gate_reschedule(&guard, &current, actor, start, end, self.clock.today())?;

        let updated_at = self.clock.now_ms();
        let event = Event::BookingRescheduled {
            id: booking_id,
            spot_id: current.spot_id,
            range,
            updated_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(%booking_id, from = %current.range, to = %range, "booking rescheduled");
        Ok(Booking {
            range,
            updated_at,
            ..current
        })
    }

    pub async fn cancel_booking(
        self: &Arc<Self>,
        actor: UserId,
        booking_id: BookingId,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self
            .detached(move |engine| async move {
                engine.commit_cancel_booking(actor, booking_id).await
            })
            .await;
        observability::record(Operation::CancelBooking, started, &result);
        result
    }

    async fn commit_cancel_booking(
        &self,
        actor: UserId,
        booking_id: BookingId,
    ) -> Result<(), EngineError> {
        let _barrier = self.commit_barrier.read().await;
        let mut guard = self.booking_write(booking_id).await?;
        let current = guard
            .booking(booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        gate_cancel(current, actor)?;

        let event = Event::BookingCancelled {
            id: booking_id,
            spot_id: current.spot_id,
            updated_at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(%booking_id, "booking cancelled");
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event set that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _quiet = self.commit_barrier.write().await;

        let handles: Vec<_> = self.spots.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            events.push(Event::SpotCreated {
                id: guard.id,
                owner_id: guard.owner_id,
                name: guard.name.clone(),
            });
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(observability::COMPACTIONS_TOTAL).increment(1);
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
