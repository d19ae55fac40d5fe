use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::slots::generate_slots;
use super::{Engine, EngineError, Entity};

// ── Availability ──────────────────────────────────────────────

/// Free slots for `barber` on `date`, given the appointments already on that
/// date. Only pending/scheduled appointments of this barber block a slot, and
/// they block it by exact `HH:MM` label: an appointment at 10:10 on a
/// 30-minute grid blocks nothing.
pub fn free_slots<'a>(
    barber: &Barber,
    date: NaiveDate,
    booked: impl IntoIterator<Item = &'a Appointment>,
) -> Result<Vec<String>, EngineError> {
    if barber.slot_minutes == 0 {
        return Err(EngineError::InvalidSlotDuration(barber.slot_minutes));
    }

    let candidates = generate_slots(
        date,
        barber.day_start,
        barber.day_end,
        i64::from(barber.slot_minutes),
    );

    let taken: HashSet<String> = booked
        .into_iter()
        .filter(|a| a.barber_id == barber.id && a.date() == date && a.status.occupies_slot())
        .map(Appointment::slot_label)
        .collect();

    Ok(candidates
        .into_iter()
        .filter(|slot| !taken.contains(slot))
        .collect())
}

impl Engine {
    /// Barber existence is checked before the date is parsed.
    pub fn available_slots(&self, barber_id: Ulid, date: &str) -> Result<Vec<String>, EngineError> {
        let barber = self
            .store
            .barber(&barber_id)
            .ok_or(EngineError::NotFound(Entity::Barber, barber_id))?;
        let date = parse_date(date).ok_or_else(|| EngineError::InvalidDate(date.to_string()))?;

        let booked = self.store.appointments_on(date);
        let free = free_slots(&barber, date, &booked)?;
        metrics::counter!(crate::observability::SLOT_LOOKUPS_TOTAL).increment(1);
        Ok(free)
    }
}
