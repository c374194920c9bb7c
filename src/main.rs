use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use spotbook::compactor;
use spotbook::{Engine, SystemClock};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("SPOTBOOK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    spotbook::observability::init(metrics_port)?;

    let data_dir = std::env::var("SPOTBOOK_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let compact_threshold: u64 = std::env::var("SPOTBOOK_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let compact_every = std::env::var("SPOTBOOK_COMPACT_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(compactor::CHECK_INTERVAL);

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("bookings.wal");
    let engine = Arc::new(Engine::new(wal_path, Arc::new(SystemClock))?);

    info!("spotbook store open");
    info!("  data_dir: {data_dir}");
    info!("  spots: {}, bookings: {}", engine.spot_count(), engine.booking_count());
    info!("  compact: every {compact_threshold} appends, checked every {compact_every:?}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let compactor_engine = engine.clone();
    let compactor_task = tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, compact_threshold, compact_every).await;
    });

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    compactor_task.abort();
    // Leave a compact log behind so the next start replays quickly.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("spotbook stopped");
    Ok(())
}
