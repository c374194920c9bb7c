use chrono::NaiveDate;

use crate::model::*;

use super::error::{ConflictInfo, ValidationError};
use super::EngineError;

/// One validation pass over a requested stay. Every failing field is
/// reported together; the range is only built once both pass.
pub(crate) fn validate_dates(
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Result<DateRange, ValidationError> {
    let mut err = ValidationError::default();
    if start < today {
        err.fields
            .insert("startDate".into(), "startDate cannot be in the past".into());
    }
    if end <= start {
        err.fields.insert(
            "endDate".into(),
            "endDate cannot be on or before startDate".into(),
        );
    }
    if !err.fields.is_empty() {
        return Err(err);
    }
    DateRange::new(start, end)
}

pub(crate) fn validate_limits(range: &DateRange, today: NaiveDate) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    if (range.start - today).num_days() > MAX_BOOKING_HORIZON_DAYS {
        return Err(EngineError::LimitExceeded("start date too far ahead"));
    }
    Ok(())
}

/// First confirmed booking on the spot overlapping `candidate`, ignoring
/// `exclude` (the booking being rescheduled).
pub fn conflicts(
    spot: &SpotState,
    candidate: &DateRange,
    exclude: Option<BookingId>,
) -> Option<ConflictInfo> {
    spot.overlapping(candidate)
        .filter(|b| b.is_confirmed() && Some(b.id) != exclude)
        .map(|b| ConflictInfo {
            booking_id: b.id,
            existing: b.range,
            start_conflicts: b.range.contains_night(candidate.start),
            end_conflicts: candidate
                .end
                .pred_opt()
                .is_some_and(|last| b.range.contains_night(last)),
        })
        .next()
}

pub(crate) fn check_no_conflict(
    spot: &SpotState,
    candidate: &DateRange,
    exclude: Option<BookingId>,
) -> Result<(), EngineError> {
    match conflicts(spot, candidate, exclude) {
        Some(info) => Err(EngineError::Conflict(info)),
        None => Ok(()),
    }
}
