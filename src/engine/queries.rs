use crate::model::*;

use super::guard::{can_act_on_spot, view_scope, Action, ViewScope};
use super::{Engine, EngineError};

fn shape(b: &Booking, scope: ViewScope) -> BookingView {
    match scope {
        ViewScope::Full => BookingView::full(b),
        ViewScope::Reduced => BookingView::reduced(b),
    }
}

impl Engine {
    pub async fn get_spot(&self, spot_id: SpotId) -> Result<SpotInfo, EngineError> {
        let rs = self
            .get_spot_handle(&spot_id)
            .ok_or(EngineError::SpotNotFound(spot_id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::SpotNotFound(spot_id));
        }
        Ok(SpotInfo {
            id: guard.id,
            owner_id: guard.owner_id,
            name: guard.name.clone(),
            booking_count: guard.bookings.len(),
        })
    }

    /// All bookings on a spot, ordered by start date. The owner sees every
    /// field; anyone else gets the dates without guest identity.
    pub async fn list_bookings_for_spot(
        &self,
        actor: UserId,
        spot_id: SpotId,
    ) -> Result<Vec<BookingView>, EngineError> {
        let rs = self
            .get_spot_handle(&spot_id)
            .ok_or(EngineError::SpotNotFound(spot_id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::SpotNotFound(spot_id));
        }
        can_act_on_spot(actor, &guard, Action::ViewSpotBookings)?;
        let scope = view_scope(actor, &guard);

        let mut bookings: Vec<&Booking> = guard.bookings.iter().collect();
        bookings.sort_by_key(|b| (b.range.start, b.id));
        Ok(bookings.into_iter().map(|b| shape(b, scope)).collect())
    }

    /// One booking, shaped like a listing entry: full for its holder and the
    /// spot owner, reduced for everyone else.
    pub async fn get_booking(
        &self,
        actor: UserId,
        booking_id: BookingId,
    ) -> Result<BookingView, EngineError> {
        let spot_id = self
            .booking_to_spot
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let rs = self
            .get_spot_handle(&spot_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let guard = rs.read().await;
        let booking = guard
            .booking(booking_id)
            .filter(|_| !guard.deleted)
            .ok_or(EngineError::BookingNotFound(booking_id))?;

        let scope = if booking.user_id == actor {
            ViewScope::Full
        } else {
            view_scope(actor, &guard)
        };
        Ok(shape(booking, scope))
    }

    /// The actor's own bookings across all spots, ordered by start date.
    pub async fn bookings_for_user(&self, actor: UserId) -> Vec<BookingView> {
        let handles: Vec<_> = self.spots.iter().map(|e| e.value().clone()).collect();
        let mut own = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            own.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.user_id == actor)
                    .map(BookingView::full),
            );
        }
        own.sort_by_key(|v| (v.start_date, v.id));
        own
    }
}
