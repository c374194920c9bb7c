//! Booking state machine and the gates guarding each transition.
//!
//! ```text
//! Proposed ──confirm──▶ Confirmed ──cancel──▶ Cancelled
//!                        │    ▲
//!                        └────┘ reschedule
//! ```
//!
//! Gates are pure: they read the spot (under the caller's write lock) and
//! either return what to commit or an error. Nothing is mutated here.

use chrono::NaiveDate;

use crate::model::*;

use super::conflict::{check_no_conflict, validate_dates, validate_limits};
use super::guard::{can_act_on_booking, can_act_on_spot, Action};
use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Proposed,
    Confirmed,
    Cancelled,
}

impl From<BookingStatus> for LifecycleState {
    fn from(status: BookingStatus) -> Self {
        match status {
            BookingStatus::Confirmed => LifecycleState::Confirmed,
            BookingStatus::Cancelled => LifecycleState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Reschedule,
    Cancel,
}

impl LifecycleState {
    /// State after `t`, or `None` if `t` is not allowed from here.
    pub fn next(self, t: Transition) -> Option<LifecycleState> {
        match (self, t) {
            (LifecycleState::Proposed, Transition::Confirm) => Some(LifecycleState::Confirmed),
            (LifecycleState::Confirmed, Transition::Reschedule) => Some(LifecycleState::Confirmed),
            (LifecycleState::Confirmed, Transition::Cancel) => Some(LifecycleState::Cancelled),
            _ => None,
        }
    }
}

fn require(booking: &Booking, t: Transition) -> Result<(), EngineError> {
    match LifecycleState::from(booking.status).next(t) {
        Some(_) => Ok(()),
        None => Err(EngineError::AlreadyCancelled(booking.id)),
    }
}

/// Proposed → Confirmed. Returns the validated range to book.
pub(crate) fn gate_confirm(
    spot: &SpotState,
    actor: UserId,
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Result<DateRange, EngineError> {
    if spot.deleted {
        return Err(EngineError::SpotNotFound(spot.id));
    }
    can_act_on_spot(actor, spot, Action::CreateBooking)?;
    let range = validate_dates(start, end, today)?;
    validate_limits(&range, today)?;
    if spot.bookings.len() >= crate::limits::MAX_BOOKINGS_PER_SPOT {
        return Err(EngineError::LimitExceeded("too many bookings on spot"));
    }
    check_no_conflict(spot, &range, None)?;
    Ok(range)
}

/// Confirmed → Confirmed with new dates.
pub(crate) fn gate_reschedule(
    spot: &SpotState,
    booking: &Booking,
    actor: UserId,
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Result<DateRange, EngineError> {
    can_act_on_booking(actor, booking, Action::ModifyBooking)?;
    require(booking, Transition::Reschedule)?;
    if booking.range.is_past(today) {
        return Err(EngineError::PastBookingImmutable(booking.id));
    }
    let range = validate_dates(start, end, today)?;
    validate_limits(&range, today)?;
    check_no_conflict(spot, &range, Some(booking.id))?;
    Ok(range)
}

/// Confirmed → Cancelled.
pub(crate) fn gate_cancel(booking: &Booking, actor: UserId) -> Result<(), EngineError> {
    can_act_on_booking(actor, booking, Action::CancelBooking)?;
    require(booking, Transition::Cancel)
}
