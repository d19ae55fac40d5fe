use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// In-memory shop state. Every mutation goes through `apply_event`, so the
/// same code rebuilds state on WAL replay.
///
/// No method holds a map guard while touching another entry of the same map.
pub struct Store {
    barbers: DashMap<Ulid, Barber>,
    services: DashMap<Ulid, Service>,
    appointments: DashMap<Ulid, Appointment>,
    /// Appointment date → appointment ids on that date.
    by_date: DashMap<NaiveDate, Vec<Ulid>>,
    queue: DashMap<Ulid, QueueEntry>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            barbers: DashMap::new(),
            services: DashMap::new(),
            appointments: DashMap::new(),
            by_date: DashMap::new(),
            queue: DashMap::new(),
        }
    }

    // ── Barbers ──────────────────────────────────────────────

    pub fn barber(&self, id: &Ulid) -> Option<Barber> {
        self.barbers.get(id).map(|e| e.value().clone())
    }

    pub fn has_barber(&self, id: &Ulid) -> bool {
        self.barbers.contains_key(id)
    }

    pub fn barber_count(&self) -> usize {
        self.barbers.len()
    }

    pub fn barbers(&self) -> Vec<Barber> {
        let mut all: Vec<Barber> = self.barbers.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| (b.created_at, b.id));
        all
    }

    // ── Services ─────────────────────────────────────────────

    pub fn service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn has_service(&self, id: &Ulid) -> bool {
        self.services.contains_key(id)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Ordered by id, i.e. creation order.
    pub fn services(&self) -> Vec<Service> {
        let mut all: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    // ── Appointments ─────────────────────────────────────────

    pub fn appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    pub fn appointments_on(&self, date: NaiveDate) -> Vec<Appointment> {
        let ids = self
            .by_date
            .get(&date)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.appointment(id)).collect()
    }

    /// Pending appointments on `date`, across all barbers.
    pub fn pending_count_on(&self, date: NaiveDate) -> u32 {
        self.appointments_on(date)
            .iter()
            .filter(|a| a.status == AppointmentStatus::Pending)
            .count() as u32
    }

    fn index_appointment(&self, date: NaiveDate, id: Ulid) {
        self.by_date.entry(date).or_default().push(id);
    }

    fn unindex_appointment(&self, date: NaiveDate, id: &Ulid) {
        let now_empty = match self.by_date.get_mut(&date) {
            Some(mut ids) => {
                ids.retain(|i| i != id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_date.remove_if(&date, |_, ids| ids.is_empty());
        }
    }

    fn drop_appointment(&self, id: &Ulid) {
        if let Some((_, appt)) = self.appointments.remove(id) {
            self.unindex_appointment(appt.date(), id);
        }
    }

    // ── Queue ────────────────────────────────────────────────

    pub fn queue_entry(&self, id: &Ulid) -> Option<QueueEntry> {
        self.queue.get(id).map(|e| e.value().clone())
    }

    pub fn queue_count(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_entries(&self) -> Vec<QueueEntry> {
        self.queue.iter().map(|e| e.value().clone()).collect()
    }

    // ── Event application ────────────────────────────────────

    /// Events naming an id that is no longer present are ignored.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::BarberAdded(barber) => {
                self.barbers.insert(barber.id, barber.clone());
            }
            Event::BarberRemoved { id } => {
                self.barbers.remove(id);
                let owned: Vec<Ulid> = self
                    .appointments
                    .iter()
                    .filter(|e| e.value().barber_id == *id)
                    .map(|e| *e.key())
                    .collect();
                for appt_id in owned {
                    self.drop_appointment(&appt_id);
                }
            }
            Event::ServiceAdded(service) | Event::ServiceUpdated(service) => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceRemoved { id } => {
                self.services.remove(id);
                for mut appt in self.appointments.iter_mut() {
                    if appt.service_id == Some(*id) {
                        appt.service_id = None;
                    }
                }
            }
            Event::AppointmentBooked(appt) => {
                self.drop_appointment(&appt.id);
                self.index_appointment(appt.date(), appt.id);
                self.appointments.insert(appt.id, appt.clone());
            }
            Event::AppointmentRescheduled { id, time, position } => {
                let old_date = match self.appointments.get_mut(id) {
                    Some(mut appt) => {
                        let old = appt.date();
                        appt.time = *time;
                        appt.position = *position;
                        old
                    }
                    None => return,
                };
                if old_date != time.date() {
                    self.unindex_appointment(old_date, id);
                    self.index_appointment(time.date(), *id);
                }
            }
            Event::AppointmentStatusChanged { id, status } => {
                if let Some(mut appt) = self.appointments.get_mut(id) {
                    appt.status = *status;
                }
            }
            Event::AppointmentDeleted { id } => self.drop_appointment(id),
            Event::QueueJoined(entry) => {
                self.queue.insert(entry.id, entry.clone());
            }
            Event::QueueStatusChanged { id, status } => {
                if let Some(mut entry) = self.queue.get_mut(id) {
                    entry.status = *status;
                }
            }
            Event::QueueRemoved { id } => {
                self.queue.remove(id);
            }
        }
    }

    /// Minimal event list that rebuilds the current state. Used for compaction.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.barbers().into_iter().map(Event::BarberAdded));
        events.extend(self.services().into_iter().map(Event::ServiceAdded));

        let mut appts: Vec<Appointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        appts.sort_by_key(|a| a.id);
        events.extend(appts.into_iter().map(Event::AppointmentBooked));

        let mut entries = self.queue_entries();
        entries.sort_by_key(|e| e.id);
        events.extend(entries.into_iter().map(Event::QueueJoined));
        events
    }
}
