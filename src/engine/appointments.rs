use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_APPOINTMENTS_PER_SHOP;
use crate::model::*;

use super::ranking::rank_all;
use super::{now_ms, optional_text, required_text, Engine, EngineError, Entity};

/// A customer's booking as submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub barber_id: Ulid,
    pub customer_name: String,
    pub customer_email: String,
    /// ISO 8601 local time, echoed back unchanged in the receipt.
    pub appointment_time: String,
    /// Service id. Unknown or malformed ids book without a service.
    pub service: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
}

impl Engine {
    pub async fn book_appointment(
        &self,
        req: BookingRequest,
    ) -> Result<BookingReceipt, EngineError> {
        // Same stripe as remove_barber: the barber cannot vanish mid-booking.
        let _guard = self.lock_record(&req.barber_id).await;
        if !self.store.has_barber(&req.barber_id) {
            return Err(EngineError::NotFound(Entity::Barber, req.barber_id));
        }
        let time = parse_timestamp(&req.appointment_time)
            .ok_or_else(|| EngineError::InvalidTimestamp(req.appointment_time.clone()))?;
        let customer = Customer {
            name: required_text("customer name", &req.customer_name)?,
            email: required_text("customer email", &req.customer_email)?,
            phone: optional_text("phone", req.phone)?,
            gender: optional_text("gender", req.gender)?,
        };
        if self.store.appointment_count() >= MAX_APPOINTMENTS_PER_SHOP {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }

        let service_id = req
            .service
            .as_deref()
            .and_then(|raw| Ulid::from_string(raw.trim()).ok())
            .filter(|id| self.store.has_service(id));

        let position = self.store.pending_count_on(time.date()) + 1;
        let appointment = Appointment {
            id: self.next_id(),
            customer,
            barber_id: req.barber_id,
            service_id,
            time,
            status: AppointmentStatus::Pending,
            position,
            created_at: now_ms(),
        };
        let id = appointment.id;
        self.persist_and_apply(Event::AppointmentBooked(appointment)).await?;

        metrics::counter!(crate::observability::APPOINTMENTS_BOOKED_TOTAL).increment(1);
        info!(
            "booked appointment {id} with barber {} at {time} (position {position})",
            req.barber_id
        );
        Ok(BookingReceipt {
            id,
            appointment_time: req.appointment_time,
            position,
        })
    }

    /// Always succeeds on an existing appointment, whatever its status.
    pub async fn cancel_appointment(&self, id: Ulid) -> Result<(), EngineError> {
        self.set_appointment_status(id, AppointmentStatus::Canceled).await
    }

    /// Always succeeds on an existing appointment, whatever its status.
    pub async fn complete_appointment(&self, id: Ulid) -> Result<(), EngineError> {
        self.set_appointment_status(id, AppointmentStatus::Completed).await
    }

    /// Confirm a pending appointment. Canceled or completed ones stay put.
    pub async fn schedule_appointment(&self, id: Ulid) -> Result<(), EngineError> {
        self.set_appointment_status(id, AppointmentStatus::Scheduled).await
    }

    async fn set_appointment_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<(), EngineError> {
        let _guard = self.lock_record(&id).await;
        let current = self
            .store
            .appointment(&id)
            .ok_or(EngineError::NotFound(Entity::Appointment, id))?;
        if status == AppointmentStatus::Scheduled && current.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }
        self.persist_and_apply(Event::AppointmentStatusChanged { id, status }).await?;
        metrics::counter!(
            crate::observability::APPOINTMENT_TRANSITIONS_TOTAL,
            "status" => status.as_str()
        )
        .increment(1);
        info!("appointment {id}: {} -> {status}", current.status);
        Ok(())
    }

    /// Move an appointment to a new time. The position is recounted against
    /// the new date before the move is applied, so the appointment counts
    /// itself only when it is pending and already on that date. Status is
    /// left alone.
    pub async fn reschedule_appointment(
        &self,
        id: Ulid,
        new_time: &str,
    ) -> Result<u32, EngineError> {
        let _guard = self.lock_record(&id).await;
        if self.store.appointment(&id).is_none() {
            return Err(EngineError::NotFound(Entity::Appointment, id));
        }
        let time = parse_timestamp(new_time)
            .ok_or_else(|| EngineError::InvalidTimestamp(new_time.to_string()))?;
        let position = self.store.pending_count_on(time.date()) + 1;
        self.persist_and_apply(Event::AppointmentRescheduled { id, time, position })
            .await?;
        info!("rescheduled appointment {id} to {time} (position {position})");
        Ok(position)
    }

    pub async fn delete_appointment(&self, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.lock_record(&id).await;
        if self.store.appointment(&id).is_none() {
            return Err(EngineError::NotFound(Entity::Appointment, id));
        }
        self.persist_and_apply(Event::AppointmentDeleted { id }).await?;
        info!("deleted appointment {id}");
        Ok(())
    }

    pub fn get_appointment(&self, id: Ulid) -> Result<AppointmentInfo, EngineError> {
        let appointment = self
            .store
            .appointment(&id)
            .ok_or(EngineError::NotFound(Entity::Appointment, id))?;
        let live_position = super::ranking::position_of(
            &self.store.appointments_on(appointment.date()),
            id,
        );
        Ok(AppointmentInfo {
            appointment,
            live_position,
        })
    }

    /// Every appointment on `date`, pending ones first in arrival order.
    /// An empty day is reported as not found.
    pub fn appointments_on(&self, date: &str) -> Result<Vec<AppointmentInfo>, EngineError> {
        let day = parse_date(date).ok_or_else(|| EngineError::InvalidDate(date.to_string()))?;
        let appointments = self.store.appointments_on(day);
        if appointments.is_empty() {
            return Err(EngineError::NoAppointmentsOn(day));
        }
        Ok(rank_all(appointments)
            .into_iter()
            .map(|(appointment, live_position)| AppointmentInfo {
                appointment,
                live_position,
            })
            .collect())
    }
}
