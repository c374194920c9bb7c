use std::collections::BTreeMap;

use crate::model::{BookingId, DateRange, SpotId};

use super::guard::Refusal;

/// Field-level validation failures, keyed by request field name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    pub fields: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn single(field: &str, message: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), message.to_string());
        Self { fields }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation failed")?;
        for (i, (field, msg)) in self.fields.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{field}: {msg}")?;
        }
        Ok(())
    }
}

/// Which existing booking a candidate range collided with, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub booking_id: BookingId,
    pub existing: DateRange,
    /// The candidate's first night falls inside the existing booking.
    pub start_conflicts: bool,
    /// The candidate's last night falls inside the existing booking.
    pub end_conflicts: bool,
}

impl ConflictInfo {
    /// Per-field messages. A candidate that encloses the existing booking
    /// has neither endpoint inside it and reports both.
    pub fn field_errors(&self) -> BTreeMap<String, String> {
        let enclosing = !self.start_conflicts && !self.end_conflicts;
        let mut fields = BTreeMap::new();
        if self.start_conflicts || enclosing {
            fields.insert(
                "startDate".to_string(),
                "Start date conflicts with an existing booking".to_string(),
            );
        }
        if self.end_conflicts || enclosing {
            fields.insert(
                "endDate".to_string(),
                "End date conflicts with an existing booking".to_string(),
            );
        }
        fields
    }
}

/// Coarse classification for callers mapping errors onto their own surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Validation,
    Conflict,
    PastBookingImmutable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PastBookingImmutable => "past_booking_immutable",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    SpotNotFound(SpotId),
    BookingNotFound(BookingId),
    Forbidden(Refusal),
    Validation(ValidationError),
    Conflict(ConflictInfo),
    PastBookingImmutable(BookingId),
    AlreadyCancelled(BookingId),
    HasActiveBookings(SpotId),
    LimitExceeded(&'static str),
    WalError(String),
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SpotNotFound(_) | EngineError::BookingNotFound(_) => ErrorKind::NotFound,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::Conflict(_)
            | EngineError::AlreadyCancelled(_)
            | EngineError::HasActiveBookings(_) => ErrorKind::Conflict,
            EngineError::PastBookingImmutable(_) => ErrorKind::PastBookingImmutable,
            EngineError::WalError(_) | EngineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<Refusal> for EngineError {
    fn from(r: Refusal) -> Self {
        EngineError::Forbidden(r)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SpotNotFound(id) => write!(f, "spot not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::Forbidden(r) => write!(f, "forbidden: {r}"),
            EngineError::Validation(e) => write!(f, "{e}"),
            EngineError::Conflict(c) => write!(
                f,
                "dates conflict with booking {} {}",
                c.booking_id, c.existing
            ),
            EngineError::PastBookingImmutable(id) => {
                write!(f, "past booking {id} cannot be modified")
            }
            EngineError::AlreadyCancelled(id) => write!(f, "booking {id} is already cancelled"),
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot delete spot {id}: has active bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
