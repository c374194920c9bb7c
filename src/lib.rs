pub mod clock;
pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, EngineError, ErrorKind};
pub use model::{Booking, BookingStatus, BookingView, DateRange, SpotInfo};
