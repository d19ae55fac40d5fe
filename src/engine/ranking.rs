use ulid::Ulid;

use crate::model::*;

// ── Position ranking ──────────────────────────────────────────

/// Something that waits its turn: an appointment in the day's backlog or a
/// walk-in queue entry.
pub trait Waiting {
    fn id(&self) -> Ulid;
    /// Only waiting items are ranked.
    fn is_waiting(&self) -> bool;
    fn arrived_at(&self) -> Ms;

    /// Total order among waiting items: arrival time, then id.
    fn rank_key(&self) -> (Ms, Ulid) {
        (self.arrived_at(), self.id())
    }
}

impl Waiting for Appointment {
    fn id(&self) -> Ulid {
        self.id
    }
    fn is_waiting(&self) -> bool {
        self.status == AppointmentStatus::Pending
    }
    fn arrived_at(&self) -> Ms {
        self.created_at
    }
}

impl Waiting for QueueEntry {
    fn id(&self) -> Ulid {
        self.id
    }
    fn is_waiting(&self) -> bool {
        self.status == QueueStatus::Pending
    }
    fn arrived_at(&self) -> Ms {
        self.created_at
    }
}

/// 1-based rank of `id` among the waiting items, or 0 if it is absent or not
/// waiting. Single pass, no sort.
pub fn position_of<T: Waiting>(items: &[T], id: Ulid) -> u32 {
    let Some(target) = items.iter().find(|i| i.id() == id) else {
        return 0;
    };
    if !target.is_waiting() {
        return 0;
    }
    let key = target.rank_key();
    let ahead = items
        .iter()
        .filter(|i| i.is_waiting() && i.rank_key() < key)
        .count();
    ahead as u32 + 1
}

/// Rank every item at once. Waiting items come first, numbered 1..N in
/// arrival order; everything else follows with rank 0, oldest first.
pub fn rank_all<T: Waiting>(items: Vec<T>) -> Vec<(T, u32)> {
    let (mut waiting, mut rest): (Vec<T>, Vec<T>) = items.into_iter().partition(|i| i.is_waiting());
    waiting.sort_by_key(|i| i.rank_key());
    rest.sort_by_key(|i| i.rank_key());

    let mut ranked = Vec::with_capacity(waiting.len() + rest.len());
    ranked.extend(waiting.into_iter().zip(1u32..));
    ranked.extend(rest.into_iter().map(|i| (i, 0)));
    ranked
}
