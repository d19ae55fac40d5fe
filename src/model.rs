use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for arrival (`created_at`) stamps.
pub type Ms = i64;

pub const DEFAULT_SLOT_MINUTES: u32 = 30;
pub const DEFAULT_SERVICE_MINUTES: u32 = 30;

pub fn default_day_start() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

pub fn default_day_end() -> NaiveTime {
    NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN)
}

// ── Statuses ──────────────────────────────────────────────────

/// `pending -> {scheduled, canceled, completed}`. Nothing goes back to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Scheduled,
    Canceled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(AppointmentStatus::Pending),
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "canceled" | "cancelled" => Some(AppointmentStatus::Canceled),
            "completed" => Some(AppointmentStatus::Completed),
            _ => None,
        }
    }

    /// Still holds its slot on the barber's day.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Scheduled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Canceled | AppointmentStatus::Completed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QueueStatus {
    #[default]
    Pending,
    Canceled,
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Canceled => "canceled",
            QueueStatus::Completed => "completed",
        }
    }

    /// Lenient: only the exact spellings `canceled` and `completed` are
    /// honoured; anything else (or nothing at all) is `Pending`.
    pub fn coerce(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("canceled") => QueueStatus::Canceled,
            Some("completed") => QueueStatus::Completed,
            _ => QueueStatus::Pending,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Weekdays ──────────────────────────────────────────────────

const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Set of weekdays as a bitmask, bit 0 = Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DaySet(u8);

impl DaySet {
    pub const EMPTY: DaySet = DaySet(0);

    /// Monday through Friday.
    pub fn workweek() -> Self {
        DaySet(0b0001_1111)
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Parse a comma separated list such as `Monday,Tue, friday`.
    pub fn parse(list: &str) -> Option<Self> {
        let mut set = DaySet::EMPTY;
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let day: Weekday = part.parse().ok()?;
            set.insert(day);
        }
        Some(set)
    }
}

impl Default for DaySet {
    fn default() -> Self {
        Self::workweek()
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (i, name) in DAY_NAMES.iter().enumerate() {
            if self.0 & (1 << i) != 0 {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

// ── Entities ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barber {
    pub id: Ulid,
    pub name: String,
    /// Years of experience.
    pub experience: u32,
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    pub slot_minutes: u32,
    /// Stored and reported; slot generation does not consult it.
    pub available_days: DaySet,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub kind: Option<String>,
    pub duration_minutes: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// Contact details copied onto each appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub gender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub customer: Customer,
    pub barber_id: Ulid,
    pub service_id: Option<Ulid>,
    pub time: NaiveDateTime,
    pub status: AppointmentStatus,
    /// Snapshot taken at create/reschedule. Not kept up to date.
    pub position: u32,
    pub created_at: Ms,
}

impl Appointment {
    pub fn date(&self) -> NaiveDate {
        self.time.date()
    }

    /// `HH:MM` label of the slot this appointment sits in.
    pub fn slot_label(&self) -> String {
        self.time.format("%H:%M").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Ulid,
    pub name: String,
    pub status: QueueStatus,
    pub created_at: Ms,
}

// ── Events ────────────────────────────────────────────────────

/// Every state change, as written to the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BarberAdded(Barber),
    /// Also drops the barber's appointments.
    BarberRemoved { id: Ulid },
    ServiceAdded(Service),
    ServiceUpdated(Service),
    /// Also clears the reference on appointments that used it.
    ServiceRemoved { id: Ulid },
    AppointmentBooked(Appointment),
    AppointmentRescheduled {
        id: Ulid,
        time: NaiveDateTime,
        position: u32,
    },
    AppointmentStatusChanged {
        id: Ulid,
        status: AppointmentStatus,
    },
    AppointmentDeleted { id: Ulid },
    QueueJoined(QueueEntry),
    QueueStatusChanged { id: Ulid, status: QueueStatus },
    QueueRemoved { id: Ulid },
}

// ── Query results ─────────────────────────────────────────────

/// Answer to a create: what the caller needs to show the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingReceipt {
    pub id: Ulid,
    /// The timestamp exactly as submitted.
    pub appointment_time: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentInfo {
    pub appointment: Appointment,
    /// Current rank among the day's pending appointments (0 if not pending).
    pub live_position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub entry: QueueEntry,
    pub position: u32,
}

// ── Input parsing ─────────────────────────────────────────────

/// Strict `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// ISO 8601 local timestamp: `YYYY-MM-DDTHH:MM[:SS[.fff]]`, `T` or space separated.
/// No timezone handling.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}
