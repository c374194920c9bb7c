use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::ValidationError;

/// Unix milliseconds. Used for audit timestamps only; stays are whole dates.
pub type Ms = i64;

pub type SpotId = Ulid;
pub type BookingId = Ulid;
pub type UserId = Ulid;

/// Half-open range of calendar dates `[start, end)`.
///
/// `start` is the first night, `end` the checkout day. A stay ending on the
/// day another starts does not overlap it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if end <= start {
            return Err(ValidationError::single(
                "endDate",
                "endDate cannot be on or before startDate",
            ));
        }
        Ok(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True once the checkout day has been reached.
    pub fn is_past(&self, reference: NaiveDate) -> bool {
        self.end <= reference
    }

    /// True if `date` is one of the booked nights.
    pub fn contains_night(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub spot_id: SpotId,
    pub user_id: UserId,
    pub range: DateRange,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

#[derive(Debug, Clone)]
pub struct SpotState {
    pub id: SpotId,
    pub owner_id: UserId,
    pub name: Option<String>,
    /// Set under the write lock when the spot is removed, so a request that
    /// grabbed the handle before removal sees it as gone.
    pub deleted: bool,
    /// All bookings on this spot, confirmed and cancelled, sorted by `range.start`.
    pub bookings: Vec<Booking>,
}

impl SpotState {
    pub fn new(id: SpotId, owner_id: UserId, name: Option<String>) -> Self {
        Self {
            id,
            owner_id,
            name,
            deleted: false,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by range.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.range.start <= booking.range.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings of any status whose range overlaps `query`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts on or after query.end.
        let right_bound = self
            .bookings
            .partition_point(|b| b.range.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end > query.start)
    }

    /// Confirmed bookings whose checkout day is after `today`.
    pub fn active_bookings(&self, today: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.bookings
            .iter()
            .filter(move |b| b.is_confirmed() && !b.range.is_past(today))
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpotCreated {
        id: SpotId,
        owner_id: UserId,
        name: Option<String>,
    },
    SpotUpdated {
        id: SpotId,
        name: Option<String>,
    },
    SpotDeleted {
        id: SpotId,
    },
    /// Also emitted by compaction with the booking's current snapshot,
    /// which may already be cancelled.
    BookingCreated {
        booking: Booking,
    },
    BookingRescheduled {
        id: BookingId,
        spot_id: SpotId,
        range: DateRange,
        updated_at: Ms,
    },
    BookingCancelled {
        id: BookingId,
        spot_id: SpotId,
        updated_at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotInfo {
    pub id: SpotId,
    pub owner_id: UserId,
    pub name: Option<String>,
    pub booking_count: usize,
}

/// A booking shaped for the caller who asked for it. Fields left `None`
/// are withheld from that caller and skipped when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: BookingId,
    pub spot_id: SpotId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BookingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Ms>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Ms>,
}

impl BookingView {
    pub fn full(b: &Booking) -> Self {
        Self {
            id: b.id,
            spot_id: b.spot_id,
            user_id: Some(b.user_id),
            start_date: b.range.start,
            end_date: b.range.end,
            status: b.status,
            created_at: Some(b.created_at),
            updated_at: Some(b.updated_at),
        }
    }

    pub fn reduced(b: &Booking) -> Self {
        Self {
            id: b.id,
            spot_id: b.spot_id,
            user_id: None,
            start_date: b.range.start,
            end_date: b.range.end,
            status: b.status,
            created_at: None,
            updated_at: None,
        }
    }
}
