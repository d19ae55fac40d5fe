use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "barberq_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "barberq_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "barberq_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "barberq_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "barberq_connections_rejected_total";

/// Gauge: number of open shops (loaded engines).
pub const SHOPS_ACTIVE: &str = "barberq_shops_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "barberq_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "barberq_wal_flush_batch_size";

/// Counter: WAL rewrites by the background compactor.
pub const WAL_COMPACTIONS_TOTAL: &str = "barberq_wal_compactions_total";

// ── Business metrics ────────────────────────────────────────────

pub const SLOT_LOOKUPS_TOTAL: &str = "barberq_slot_lookups_total";
pub const APPOINTMENTS_BOOKED_TOTAL: &str = "barberq_appointments_booked_total";
/// Labels: status.
pub const APPOINTMENT_TRANSITIONS_TOTAL: &str = "barberq_appointment_transitions_total";
pub const QUEUE_JOINED_TOTAL: &str = "barberq_queue_joined_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
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
        Command::SelectAvailableSlots { .. } => "select_available_slots",
        Command::InsertAppointment(_) => "insert_appointment",
        Command::SetAppointmentStatus { .. } => "set_appointment_status",
        Command::RescheduleAppointment { .. } => "reschedule_appointment",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectAppointmentsOn { .. } => "select_appointments_on",
        Command::SelectAppointment { .. } => "select_appointment",
        Command::InsertQueueEntry { .. } => "insert_queue_entry",
        Command::SelectQueue => "select_queue",
        Command::SelectQueueEntry { .. } => "select_queue_entry",
        Command::SetQueueStatus { .. } => "set_queue_status",
        Command::DeleteQueueEntry { .. } => "delete_queue_entry",
        Command::InsertBarber(_) => "insert_barber",
        Command::SelectBarbers => "select_barbers",
        Command::SelectBarber { .. } => "select_barber",
        Command::DeleteBarber { .. } => "delete_barber",
        Command::InsertService(_) => "insert_service",
        Command::SelectServices => "select_services",
        Command::SelectService { .. } => "select_service",
        Command::UpdateService { .. } => "update_service",
        Command::DeleteService { .. } => "delete_service",
    }
}
