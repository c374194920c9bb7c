//! Hard limits on store size and request shape.

pub const MAX_SPOTS: usize = 100_000;
pub const MAX_BOOKINGS_PER_SPOT: usize = 50_000;
pub const MAX_NAME_LEN: usize = 256;

/// Longest stay, in nights, a single booking may cover.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// How far ahead of today a stay may start, in days.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 3 * 365;
