use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::{EngineError, ErrorKind};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations. Labels: operation, outcome.
pub const OPERATIONS_TOTAL: &str = "spotbook_operations_total";

/// Histogram: operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "spotbook_operation_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: spots currently in the store.
pub const SPOTS: &str = "spotbook_spots";

/// Gauge: bookings currently in the store, any status.
pub const BOOKINGS: &str = "spotbook_bookings";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spotbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const COMPACTIONS_TOTAL: &str = "spotbook_compactions_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateSpot,
    UpdateSpot,
    DeleteSpot,
    CreateBooking,
    UpdateBookingDates,
    CancelBooking,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::CreateSpot => "create_spot",
            Operation::UpdateSpot => "update_spot",
            Operation::DeleteSpot => "delete_spot",
            Operation::CreateBooking => "create_booking",
            Operation::UpdateBookingDates => "update_booking_dates",
            Operation::CancelBooking => "cancel_booking",
        }
    }
}

/// Count and time one finished operation. Refusals are expected traffic and
/// only logged at debug; internal failures are errors.
pub fn record<T>(op: Operation, started: Instant, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "operation" => op.label(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => op.label())
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = result {
        if e.kind() == ErrorKind::Internal {
            tracing::error!("{} failed: {e}", op.label());
        } else {
            tracing::debug!("{} refused: {e}", op.label());
        }
    }
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
