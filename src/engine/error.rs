use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Barber,
    Service,
    Appointment,
    QueueEntry,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Barber => "barber",
            Entity::Service => "service",
            Entity::Appointment => "appointment",
            Entity::QueueEntry => "queue entry",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Entity, Ulid),
    /// A well-formed date with nothing booked on it.
    NoAppointmentsOn(NaiveDate),
    InvalidDate(String),
    InvalidTimestamp(String),
    InvalidSlotDuration(u32),
    InvalidWorkingHours {
        start: NaiveTime,
        end: NaiveTime,
    },
    NegativePrice(Decimal),
    EmptyField(&'static str),
    FieldTooLong(&'static str),
    InvalidTransition {
        id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Rejected input, as opposed to a missing record or a storage failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidDate(_)
                | EngineError::InvalidTimestamp(_)
                | EngineError::InvalidSlotDuration(_)
                | EngineError::InvalidWorkingHours { .. }
                | EngineError::NegativePrice(_)
                | EngineError::EmptyField(_)
                | EngineError::FieldTooLong(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(..) | EngineError::NoAppointmentsOn(_))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::NoAppointmentsOn(date) => {
                write!(f, "no appointments found for {date}")
            }
            EngineError::InvalidDate(raw) => {
                write!(f, "invalid date format: {raw:?} (expected YYYY-MM-DD)")
            }
            EngineError::InvalidTimestamp(raw) => {
                write!(
                    f,
                    "invalid appointment time: {raw:?} (expected ISO 8601, e.g. 2025-03-12T10:00:00)"
                )
            }
            EngineError::InvalidSlotDuration(minutes) => {
                write!(f, "invalid slot duration: {minutes} minutes")
            }
            EngineError::InvalidWorkingHours { start, end } => write!(
                f,
                "working hours must start before they end: {} - {}",
                start.format("%H:%M"),
                end.format("%H:%M")
            ),
            EngineError::NegativePrice(price) => write!(f, "price must not be negative: {price}"),
            EngineError::EmptyField(field) => write!(f, "{field} is required"),
            EngineError::FieldTooLong(field) => write!(f, "{field} is too long"),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "appointment {id} is {from} and cannot become {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
