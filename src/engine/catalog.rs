use chrono::NaiveTime;
use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::limits::{MAX_BARBERS_PER_SHOP, MAX_SERVICES_PER_SHOP};
use crate::model::*;

use super::{now_ms, optional_text, required_text, Engine, EngineError, Entity};

/// Unset fields take the shop defaults: 09:00-17:00, 30 minute slots,
/// Monday to Friday, no experience.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewBarber {
    pub name: String,
    pub experience: Option<u32>,
    pub day_start: Option<NaiveTime>,
    pub day_end: Option<NaiveTime>,
    pub slot_minutes: Option<u32>,
    pub available_days: Option<DaySet>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewService {
    pub name: String,
    pub kind: Option<String>,
    pub duration_minutes: Option<u32>,
    pub price: Option<Decimal>,
}

/// Partial update; `None` leaves a field unchanged. `kind: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub kind: Option<Option<String>>,
    pub duration_minutes: Option<u32>,
    pub price: Option<Decimal>,
}

impl ServicePatch {
    pub fn is_empty(&self) -> bool {
        *self == ServicePatch::default()
    }
}

fn check_price(price: Decimal) -> Result<Decimal, EngineError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(EngineError::NegativePrice(price));
    }
    Ok(price)
}

impl Engine {
    // ── Barbers ──────────────────────────────────────────────

    pub async fn add_barber(&self, new: NewBarber) -> Result<Barber, EngineError> {
        let name = required_text("barber name", &new.name)?;
        let day_start = new.day_start.unwrap_or_else(default_day_start);
        let day_end = new.day_end.unwrap_or_else(default_day_end);
        if day_start >= day_end {
            return Err(EngineError::InvalidWorkingHours {
                start: day_start,
                end: day_end,
            });
        }
        let slot_minutes = new.slot_minutes.unwrap_or(DEFAULT_SLOT_MINUTES);
        if slot_minutes == 0 {
            return Err(EngineError::InvalidSlotDuration(slot_minutes));
        }
        if self.store.barber_count() >= MAX_BARBERS_PER_SHOP {
            return Err(EngineError::LimitExceeded("too many barbers"));
        }

        let barber = Barber {
            id: self.next_id(),
            name,
            experience: new.experience.unwrap_or(0),
            day_start,
            day_end,
            slot_minutes,
            available_days: new.available_days.unwrap_or_default(),
            created_at: now_ms(),
        };
        self.persist_and_apply(Event::BarberAdded(barber.clone())).await?;
        info!("added barber {} ({})", barber.id, barber.name);
        Ok(barber)
    }

    pub fn barbers(&self) -> Vec<Barber> {
        self.store.barbers()
    }

    pub fn get_barber(&self, id: Ulid) -> Result<Barber, EngineError> {
        self.store
            .barber(&id)
            .ok_or(EngineError::NotFound(Entity::Barber, id))
    }

    /// Removes the barber together with all of their appointments.
    pub async fn remove_barber(&self, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.lock_record(&id).await;
        if !self.store.has_barber(&id) {
            return Err(EngineError::NotFound(Entity::Barber, id));
        }
        self.persist_and_apply(Event::BarberRemoved { id }).await?;
        info!("removed barber {id}");
        Ok(())
    }

    // ── Services ─────────────────────────────────────────────

    pub async fn add_service(&self, new: NewService) -> Result<Service, EngineError> {
        let name = required_text("service name", &new.name)?;
        let kind = optional_text("service type", new.kind)?;
        let price = check_price(new.price.unwrap_or(Decimal::ZERO))?;
        if self.store.service_count() >= MAX_SERVICES_PER_SHOP {
            return Err(EngineError::LimitExceeded("too many services"));
        }

        let service = Service {
            id: self.next_id(),
            name,
            kind,
            duration_minutes: new.duration_minutes.unwrap_or(DEFAULT_SERVICE_MINUTES),
            price,
        };
        self.persist_and_apply(Event::ServiceAdded(service.clone())).await?;
        info!("added service {} ({})", service.id, service.name);
        Ok(service)
    }

    pub fn services(&self) -> Vec<Service> {
        self.store.services()
    }

    pub fn get_service(&self, id: Ulid) -> Result<Service, EngineError> {
        self.store
            .service(&id)
            .ok_or(EngineError::NotFound(Entity::Service, id))
    }

    pub async fn update_service(
        &self,
        id: Ulid,
        patch: ServicePatch,
    ) -> Result<Service, EngineError> {
        let _guard = self.lock_record(&id).await;
        let mut service = self
            .store
            .service(&id)
            .ok_or(EngineError::NotFound(Entity::Service, id))?;

        if let Some(name) = patch.name {
            service.name = required_text("service name", &name)?;
        }
        if let Some(kind) = patch.kind {
            service.kind = optional_text("service type", kind)?;
        }
        if let Some(minutes) = patch.duration_minutes {
            service.duration_minutes = minutes;
        }
        if let Some(price) = patch.price {
            service.price = check_price(price)?;
        }

        self.persist_and_apply(Event::ServiceUpdated(service.clone())).await?;
        info!("updated service {id}");
        Ok(service)
    }

    /// Appointments that used the service keep their booking, minus the service.
    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let _guard = self.lock_record(&id).await;
        if !self.store.has_service(&id) {
            return Err(EngineError::NotFound(Entity::Service, id));
        }
        self.persist_and_apply(Event::ServiceRemoved { id }).await?;
        info!("removed service {id}");
        Ok(())
    }
}
