use chrono::{NaiveDate, NaiveTime, TimeDelta};

/// Candidate slot grid for one working day, as `HH:MM` labels.
///
/// Slots start at `start` and step by `slot_minutes`; a slot is emitted only if
/// it starts strictly before `end`, so a trailing partial slot is dropped.
/// Arithmetic runs on full date-times, so a grid never wraps past midnight.
///
/// Returns an empty grid when `start >= end` or `slot_minutes <= 0`; callers
/// that treat a zero duration as misconfiguration must check it themselves.
pub fn generate_slots(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    slot_minutes: i64,
) -> Vec<String> {
    if slot_minutes <= 0 || start >= end {
        return Vec::new();
    }
    let Some(step) = TimeDelta::try_minutes(slot_minutes) else {
        return Vec::new();
    };

    let end = date.and_time(end);
    let mut current = date.and_time(start);
    let mut slots = Vec::new();
    while current < end {
        slots.push(current.format("%H:%M").to_string());
        match current.checked_add_signed(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    slots
}
