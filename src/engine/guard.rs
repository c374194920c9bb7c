//! Ownership-based authorization.
//!
//! There are no roles: whether an actor is the "owner" or a "guest" depends
//! only on the spot or booking being acted on. Decisions are permit-or-refuse;
//! shaping what a permitted caller gets to see is `view_scope`'s job.

use crate::model::{Booking, SpotState, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateBooking,
    ViewSpotBookings,
    ModifyBooking,
    CancelBooking,
    EditSpot,
    DeleteSpot,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateBooking => "create_booking",
            Action::ViewSpotBookings => "view_spot_bookings",
            Action::ModifyBooking => "modify_booking",
            Action::CancelBooking => "cancel_booking",
            Action::EditSpot => "edit_spot",
            Action::DeleteSpot => "delete_spot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    /// Owners cannot book their own spot.
    OwnSpot,
    NotSpotOwner,
    NotBookingHolder,
    /// The action does not apply to this kind of target.
    WrongTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refusal {
    pub action: Action,
    pub reason: RefusalReason,
}

impl std::fmt::Display for Refusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let why = match self.reason {
            RefusalReason::OwnSpot => "owner cannot book their own spot",
            RefusalReason::NotSpotOwner => "actor does not own the spot",
            RefusalReason::NotBookingHolder => "actor does not hold the booking",
            RefusalReason::WrongTarget => "action does not apply to this target",
        };
        write!(f, "{}: {why}", self.action.as_str())
    }
}

/// How much of each booking a caller listing a spot's bookings may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewScope {
    Full,
    Reduced,
}

fn refuse(action: Action, reason: RefusalReason) -> Result<(), Refusal> {
    Err(Refusal { action, reason })
}

pub fn can_act_on_spot(actor: UserId, spot: &SpotState, action: Action) -> Result<(), Refusal> {
    let is_owner = actor == spot.owner_id;
    match action {
        Action::CreateBooking if is_owner => refuse(action, RefusalReason::OwnSpot),
        Action::CreateBooking | Action::ViewSpotBookings => Ok(()),
        Action::EditSpot | Action::DeleteSpot if is_owner => Ok(()),
        Action::EditSpot | Action::DeleteSpot => refuse(action, RefusalReason::NotSpotOwner),
        Action::ModifyBooking | Action::CancelBooking => {
            refuse(action, RefusalReason::WrongTarget)
        }
    }
}

pub fn can_act_on_booking(actor: UserId, booking: &Booking, action: Action) -> Result<(), Refusal> {
    match action {
        Action::ModifyBooking | Action::CancelBooking if actor == booking.user_id => Ok(()),
        Action::ModifyBooking | Action::CancelBooking => {
            refuse(action, RefusalReason::NotBookingHolder)
        }
        Action::CreateBooking | Action::ViewSpotBookings | Action::EditSpot | Action::DeleteSpot => {
            refuse(action, RefusalReason::WrongTarget)
        }
    }
}

pub fn view_scope(actor: UserId, spot: &SpotState) -> ViewScope {
    if actor == spot.owner_id {
        ViewScope::Full
    } else {
        ViewScope::Reduced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingStatus, DateRange};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn spot(owner: UserId) -> SpotState {
        SpotState::new(Ulid::new(), owner, None)
    }

    fn booking_for(user: UserId) -> Booking {
        let d = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        Booking {
            id: Ulid::new(),
            spot_id: Ulid::new(),
            user_id: user,
            range: DateRange::new(d(1), d(3)).unwrap(),
            status: BookingStatus::Confirmed,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn owner_cannot_create_booking() {
        let owner = Ulid::new();
        let s = spot(owner);
        let refusal = can_act_on_spot(owner, &s, Action::CreateBooking).unwrap_err();
        assert_eq!(refusal.reason, RefusalReason::OwnSpot);
        assert_eq!(refusal.action, Action::CreateBooking);
        assert!(can_act_on_spot(Ulid::new(), &s, Action::CreateBooking).is_ok());
    }

    #[test]
    fn only_owner_edits_or_deletes_spot() {
        let owner = Ulid::new();
        let s = spot(owner);
        for action in [Action::EditSpot, Action::DeleteSpot] {
            assert!(can_act_on_spot(owner, &s, action).is_ok());
            let r = can_act_on_spot(Ulid::new(), &s, action).unwrap_err();
            assert_eq!(r.reason, RefusalReason::NotSpotOwner);
        }
    }

    #[test]
    fn anyone_may_view_spot_bookings() {
        let owner = Ulid::new();
        let s = spot(owner);
        assert!(can_act_on_spot(owner, &s, Action::ViewSpotBookings).is_ok());
        assert!(can_act_on_spot(Ulid::new(), &s, Action::ViewSpotBookings).is_ok());
        assert_eq!(view_scope(owner, &s), ViewScope::Full);
        assert_eq!(view_scope(Ulid::new(), &s), ViewScope::Reduced);
    }

    #[test]
    fn only_holder_modifies_or_cancels_booking() {
        let guest = Ulid::new();
        let b = booking_for(guest);
        for action in [Action::ModifyBooking, Action::CancelBooking] {
            assert!(can_act_on_booking(guest, &b, action).is_ok());
            let r = can_act_on_booking(Ulid::new(), &b, action).unwrap_err();
            assert_eq!(r.reason, RefusalReason::NotBookingHolder);
        }
    }

    #[test]
    fn wrong_target_is_refused() {
        let owner = Ulid::new();
        let s = spot(owner);
        let r = can_act_on_spot(owner, &s, Action::CancelBooking).unwrap_err();
        assert_eq!(r.reason, RefusalReason::WrongTarget);

        let b = booking_for(owner);
        let r = can_act_on_booking(owner, &b, Action::EditSpot).unwrap_err();
        assert_eq!(r.reason, RefusalReason::WrongTarget);
    }

    #[test]
    fn refusal_display_names_action() {
        let r = Refusal {
            action: Action::CreateBooking,
            reason: RefusalReason::OwnSpot,
        };
        assert_eq!(r.to_string(), "create_booking: owner cannot book their own spot");
    }
}
