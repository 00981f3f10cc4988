use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: appointments booked successfully.
pub const BOOKINGS_TOTAL: &str = "rota_bookings_total";

/// Counter: bookings rejected at insert time (overlap or outside windows).
pub const BOOKING_CONFLICTS_TOTAL: &str = "rota_booking_conflicts_total";

/// Counter: slot enumeration queries served.
pub const SLOT_QUERIES_TOTAL: &str = "rota_slot_queries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "rota_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rota_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rota_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if the
/// port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
