use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotd_query_duration_seconds";

// ── Booking flow ────────────────────────────────────────────────

/// Counter: holds successfully placed.
pub const HOLDS_PLACED_TOTAL: &str = "slotd_holds_placed_total";

/// Counter: holds flipped to expired, by the sweeper or a late confirmation.
pub const HOLDS_EXPIRED_TOTAL: &str = "slotd_holds_expired_total";

/// Counter: bookings created from holds.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "slotd_bookings_confirmed_total";

/// Counter: candidate slots refused. Labels: stage (hold, confirm), reason.
pub const SLOT_REJECTIONS_TOTAL: &str = "slotd_slot_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertResource { .. } => "insert_resource",
        Command::UpdateResource { .. } => "update_resource",
        Command::InsertWorkingHours { .. } => "insert_working_hours",
        Command::DeleteWorkingHours { .. } => "delete_working_hours",
        Command::InsertException { .. } => "insert_exception",
        Command::DeleteException { .. } => "delete_exception",
        Command::InsertExternalEvent { .. } => "insert_external_event",
        Command::DeleteExternalEvent { .. } => "delete_external_event",
        Command::InsertHold { .. } => "insert_hold",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::SelectResources => "select_resources",
        Command::SelectWorkingHours { .. } => "select_working_hours",
        Command::SelectExceptions { .. } => "select_exceptions",
        Command::SelectHolds { .. } => "select_holds",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
    }
}
