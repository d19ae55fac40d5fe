use super::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveTime;
use rust_decimal::Decimal;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("barberq_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name)).unwrap()
}

async fn barber(engine: &Engine, name: &str) -> Barber {
    engine
        .add_barber(NewBarber {
            name: name.into(),
            ..Default::default()
        })
        .await
        .unwrap()
}

fn request(barber_id: Ulid, time: &str) -> BookingRequest {
    BookingRequest {
        barber_id,
        customer_name: "Jordan".into(),
        customer_email: "jordan@example.com".into(),
        appointment_time: time.into(),
        service: None,
        phone: None,
        gender: None,
    }
}

async fn book(engine: &Engine, barber_id: Ulid, time: &str) -> BookingReceipt {
    engine.book_appointment(request(barber_id, time)).await.unwrap()
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn barber_defaults() {
    let engine = engine("barber_defaults.wal");
    let b = barber(&engine, "  Marco ").await;
    assert_eq!(b.name, "Marco");
    assert_eq!(b.experience, 0);
    assert_eq!(b.day_start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    assert_eq!(b.day_end, NaiveTime::from_hms_opt(17, 0, 0).unwrap());
    assert_eq!(b.slot_minutes, 30);
    assert_eq!(b.available_days, DaySet::workweek());
    assert_eq!(engine.get_barber(b.id).unwrap(), b);
}

#[tokio::test]
async fn barber_validation() {
    let engine = engine("barber_validation.wal");
    let err = engine
        .add_barber(NewBarber { name: "   ".into(), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyField(_)));

    let err = engine
        .add_barber(NewBarber {
            name: "Late".into(),
            day_start: NaiveTime::from_hms_opt(18, 0, 0),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidWorkingHours { .. }));

    let err = engine
        .add_barber(NewBarber {
            name: "Zero".into(),
            slot_minutes: Some(0),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSlotDuration(0)));
    assert!(err.is_validation());
    assert!(engine.barbers().is_empty());
}

#[tokio::test]
async fn barbers_listed_in_creation_order() {
    let engine = engine("barbers_order.wal");
    let a = barber(&engine, "A").await;
    let b = barber(&engine, "B").await;
    let c = barber(&engine, "C").await;
    let ids: Vec<Ulid> = engine.barbers().iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![a.id, b.id, c.id]);
}

#[tokio::test]
async fn service_defaults_and_partial_update() {
    let engine = engine("service_update.wal");
    let s = engine
        .add_service(NewService { name: "Beard trim".into(), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(s.duration_minutes, 30);
    assert_eq!(s.price, Decimal::ZERO);
    assert_eq!(s.kind, None);

    let updated = engine
        .update_service(
            s.id,
            ServicePatch {
                price: Some(Decimal::new(1550, 2)),
                kind: Some(Some("grooming".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Beard trim");
    assert_eq!(updated.price, Decimal::new(1550, 2));
    assert_eq!(updated.kind.as_deref(), Some("grooming"));
    assert_eq!(engine.get_service(s.id).unwrap(), updated);

    let cleared = engine
        .update_service(s.id, ServicePatch { kind: Some(None), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(cleared.kind, None);
}

#[tokio::test]
async fn service_rejects_negative_price() {
    let engine = engine("service_negative.wal");
    let err = engine
        .add_service(NewService {
            name: "Shave".into(),
            price: Some(Decimal::new(-1, 0)),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NegativePrice(_)));

    let s = engine
        .add_service(NewService { name: "Shave".into(), ..Default::default() })
        .await
        .unwrap();
    let err = engine
        .update_service(
            s.id,
            ServicePatch {
                price: Some(Decimal::new(-500, 2)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NegativePrice(_)));
    assert_eq!(engine.get_service(s.id).unwrap().price, Decimal::ZERO);
}

#[tokio::test]
async fn update_unknown_service_not_found() {
    let engine = engine("service_unknown.wal");
    let err = engine
        .update_service(
            Ulid::new(),
            ServicePatch {
                duration_minutes: Some(45),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::Service, _)));
}

#[tokio::test]
async fn removing_barber_drops_their_appointments() {
    let engine = engine("barber_cascade.wal");
    let keep = barber(&engine, "Keep").await;
    let gone = barber(&engine, "Gone").await;
    let kept = book(&engine, keep.id, "2025-03-12T09:00:00").await;
    let dropped = book(&engine, gone.id, "2025-03-12T09:30:00").await;

    engine.remove_barber(gone.id).await.unwrap();

    assert!(engine.get_appointment(kept.id).is_ok());
    assert!(matches!(
        engine.get_appointment(dropped.id),
        Err(EngineError::NotFound(Entity::Appointment, _))
    ));
    assert!(matches!(
        engine.remove_barber(gone.id).await,
        Err(EngineError::NotFound(Entity::Barber, _))
    ));
}

#[tokio::test]
async fn removing_service_keeps_appointment() {
    let engine = engine("service_set_null.wal");
    let b = barber(&engine, "Ray").await;
    let s = engine
        .add_service(NewService { name: "Cut".into(), ..Default::default() })
        .await
        .unwrap();
    let mut req = request(b.id, "2025-03-12T09:00:00");
    req.service = Some(s.id.to_string());
    let receipt = engine.book_appointment(req).await.unwrap();
    assert_eq!(
        engine.get_appointment(receipt.id).unwrap().appointment.service_id,
        Some(s.id)
    );

    engine.remove_service(s.id).await.unwrap();
    assert_eq!(engine.get_appointment(receipt.id).unwrap().appointment.service_id, None);
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn full_grid_then_booked_slot_removed() {
    let engine = engine("slots_booked.wal");
    let b = barber(&engine, "Ana").await;

    let free = engine.available_slots(b.id, "2025-03-12").unwrap();
    assert_eq!(free.len(), 16);

    book(&engine, b.id, "2025-03-12T10:00:00").await;
    let free = engine.available_slots(b.id, "2025-03-12").unwrap();
    assert_eq!(free.len(), 15);
    assert!(!free.iter().any(|s| s == "10:00"));
}

#[tokio::test]
async fn canceled_appointment_frees_slot() {
    let engine = engine("slots_canceled.wal");
    let b = barber(&engine, "Ana").await;
    let r = book(&engine, b.id, "2025-03-12T10:00:00").await;
    engine.cancel_appointment(r.id).await.unwrap();

    let free = engine.available_slots(b.id, "2025-03-12").unwrap();
    assert_eq!(free.len(), 16);
    assert!(free.iter().any(|s| s == "10:00"));
}

#[tokio::test]
async fn scheduled_appointment_keeps_slot() {
    let engine = engine("slots_scheduled.wal");
    let b = barber(&engine, "Ana").await;
    let r = book(&engine, b.id, "2025-03-12T10:00:00").await;
    engine.schedule_appointment(r.id).await.unwrap();

    let free = engine.available_slots(b.id, "2025-03-12").unwrap();
    assert_eq!(free.len(), 15);
}

#[tokio::test]
async fn unknown_barber_checked_before_date() {
    let engine = engine("slots_unknown_barber.wal");
    let err = engine.available_slots(Ulid::new(), "not-a-date").unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::Barber, _)));
}

#[tokio::test]
async fn malformed_date_rejected() {
    let engine = engine("slots_bad_date.wal");
    let b = barber(&engine, "Ana").await;
    let err = engine.available_slots(b.id, "12/03/2025").unwrap_err();
    assert!(matches!(err, EngineError::InvalidDate(_)));
}

#[tokio::test]
async fn custom_hours_and_duration() {
    let engine = engine("slots_custom.wal");
    let b = engine
        .add_barber(NewBarber {
            name: "Early".into(),
            day_start: NaiveTime::from_hms_opt(7, 0, 0),
            day_end: NaiveTime::from_hms_opt(9, 0, 0),
            slot_minutes: Some(45),
            ..Default::default()
        })
        .await
        .unwrap();
    let free = engine.available_slots(b.id, "2025-03-15").unwrap();
    assert_eq!(free, vec!["07:00", "07:45", "08:30"]);
}

// ── Appointments ─────────────────────────────────────────

#[tokio::test]
async fn booking_requires_known_barber() {
    let engine = engine("book_unknown_barber.wal");
    let err = engine
        .book_appointment(request(Ulid::new(), "2025-03-12T10:00:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(Entity::Barber, _)));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn booking_rejects_malformed_time() {
    let engine = engine("book_bad_time.wal");
    let b = barber(&engine, "Ana").await;
    let err = engine
        .book_appointment(request(b.id, "tomorrow at ten"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTimestamp(_)));
}

#[tokio::test]
async fn booking_requires_customer_details() {
    let engine = engine("book_customer.wal");
    let b = barber(&engine, "Ana").await;
    let mut req = request(b.id, "2025-03-12T10:00:00");
    req.customer_email = " ".into();
    let err = engine.book_appointment(req).await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyField("customer email")));
}

#[tokio::test]
async fn receipt_echoes_submitted_time() {
    let engine = engine("book_echo.wal");
    let b = barber(&engine, "Ana").await;
    let r = book(&engine, b.id, "2025-03-12T10:00").await;
    assert_eq!(r.appointment_time, "2025-03-12T10:00");
    assert_eq!(r.position, 1);

    let info = engine.get_appointment(r.id).unwrap();
    assert_eq!(info.appointment.status, AppointmentStatus::Pending);
    assert_eq!(info.appointment.slot_label(), "10:00");
}

#[tokio::test]
async fn position_counts_pending_on_date_across_barbers() {
    let engine = engine("book_position.wal");
    let x = barber(&engine, "X").await;
    let y = barber(&engine, "Y").await;
    book(&engine, x.id, "2025-03-12T09:00:00").await;
    book(&engine, y.id, "2025-03-12T11:00:00").await;
    book(&engine, x.id, "2025-03-13T09:00:00").await;

    let r = book(&engine, x.id, "2025-03-12T14:00:00").await;
    assert_eq!(r.position, 3);
}

#[tokio::test]
async fn non_pending_do_not_count_toward_position() {
    let engine = engine("book_position_statuses.wal");
    let b = barber(&engine, "Ana").await;
    let a = book(&engine, b.id, "2025-03-12T09:00:00").await;
    let c = book(&engine, b.id, "2025-03-12T09:30:00").await;
    engine.cancel_appointment(a.id).await.unwrap();
    engine.schedule_appointment(c.id).await.unwrap();

    let r = book(&engine, b.id, "2025-03-12T10:00:00").await;
    assert_eq!(r.position, 1);
}

#[tokio::test]
async fn service_reference_is_lenient() {
    let engine = engine("book_service_lenient.wal");
    let b = barber(&engine, "Ana").await;

    let mut req = request(b.id, "2025-03-12T09:00:00");
    req.service = Some("not-a-ulid".into());
    let r1 = engine.book_appointment(req).await.unwrap();

    let mut req = request(b.id, "2025-03-12T09:30:00");
    req.service = Some(Ulid::new().to_string());
    let r2 = engine.book_appointment(req).await.unwrap();

    assert_eq!(engine.get_appointment(r1.id).unwrap().appointment.service_id, None);
    assert_eq!(engine.get_appointment(r2.id).unwrap().appointment.service_id, None);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let engine = engine("cancel_twice.wal");
    let b = barber(&engine, "Ana").await;
    let r = book(&engine, b.id, "2025-03-12T09:00:00").await;

    engine.cancel_appointment(r.id).await.unwrap();
    engine.cancel_appointment(r.id).await.unwrap();
    assert_eq!(
        engine.get_appointment(r.id).unwrap().appointment.status,
        AppointmentStatus::Canceled
    );
}

#[tokio::test]
async fn complete_is_unconditional() {
    let engine = engine("complete_unconditional.wal");
    let b = barber(&engine, "Ana").await;
    let r = book(&engine, b.id, "2025-03-12T09:00:00").await;
    engine.cancel_appointment(r.id).await.unwrap();
    engine.complete_appointment(r.id).await.unwrap();
    assert_eq!(
        engine.get_appointment(r.id).unwrap().appointment.status,
        AppointmentStatus::Completed
    );
}

#[tokio::test]
async fn status_changes_on_unknown_appointment() {
    let engine = engine("status_unknown.wal");
    let id = Ulid::new();
    for result in [
        engine.cancel_appointment(id).await,
        engine.complete_appointment(id).await,
        engine.schedule_appointment(id).await,
        engine.delete_appointment(id).await,
    ] {
        assert!(matches!(result, Err(EngineError::NotFound(Entity::Appointment, _))));
    }
    assert!(matches!(
        engine.reschedule_appointment(id, "2025-03-12T09:00:00").await,
        Err(EngineError::NotFound(Entity::Appointment, _))
    ));
}

#[tokio::test]
async fn schedule_only_from_live_states() {
    let engine = engine("schedule_transition.wal");
    let b = barber(&engine, "Ana").await;
    let live = book(&engine, b.id, "2025-03-12T09:00:00").await;
    let done = book(&engine, b.id, "2025-03-12T09:30:00").await;

    engine.schedule_appointment(live.id).await.unwrap();
    engine.schedule_appointment(live.id).await.unwrap();
    assert_eq!(
        engine.get_appointment(live.id).unwrap().appointment.status,
        AppointmentStatus::Scheduled
    );

    engine.complete_appointment(done.id).await.unwrap();
    let err = engine.schedule_appointment(done.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: AppointmentStatus::Completed,
            to: AppointmentStatus::Scheduled,
            ..
        }
    ));
}

#[tokio::test]
async fn reschedule_to_empty_date_is_first() {
    let engine = engine("reschedule_empty.wal");
    let b = barber(&engine, "Ana").await;
    book(&engine, b.id, "2025-03-12T09:00:00").await;
    let r = book(&engine, b.id, "2025-03-12T09:30:00").await;
    assert_eq!(r.position, 2);

    let position = engine
        .reschedule_appointment(r.id, "2025-03-20T15:00:00")
        .await
        .unwrap();
    assert_eq!(position, 1);

    let info = engine.get_appointment(r.id).unwrap();
    assert_eq!(info.appointment.position, 1);
    assert_eq!(info.appointment.slot_label(), "15:00");
    assert_eq!(info.appointment.status, AppointmentStatus::Pending);
}

#[tokio::test]
async fn reschedule_to_busy_date_counts_others() {
    let engine = engine("reschedule_busy.wal");
    let b = barber(&engine, "Ana").await;
    book(&engine, b.id, "2025-03-14T09:00:00").await;
    book(&engine, b.id, "2025-03-14T09:30:00").await;
    let r = book(&engine, b.id, "2025-03-12T09:00:00").await;

    let position = engine
        .reschedule_appointment(r.id, "2025-03-14T10:00:00")
        .await
        .unwrap();
    assert_eq!(position, 3);
}

#[tokio::test]
async fn same_day_reschedule_counts_itself() {
    let engine = engine("reschedule_same_day.wal");
    let b = barber(&engine, "Ana").await;
    let first = book(&engine, b.id, "2025-03-12T09:00:00").await;
    book(&engine, b.id, "2025-03-12T09:30:00").await;

    let position = engine
        .reschedule_appointment(first.id, "2025-03-12T16:00:00")
        .await
        .unwrap();
    assert_eq!(position, 3);
}

#[tokio::test]
async fn reschedule_keeps_status_and_moves_slot() {
    let engine = engine("reschedule_status.wal");
    let b = barber(&engine, "Ana").await;
    let r = book(&engine, b.id, "2025-03-12T09:00:00").await;
    engine.schedule_appointment(r.id).await.unwrap();

    engine.reschedule_appointment(r.id, "2025-03-12T11:00:00").await.unwrap();
    assert_eq!(
        engine.get_appointment(r.id).unwrap().appointment.status,
        AppointmentStatus::Scheduled
    );
    let free = engine.available_slots(b.id, "2025-03-12").unwrap();
    assert!(free.iter().any(|s| s == "09:00"));
    assert!(!free.iter().any(|s| s == "11:00"));
}

#[tokio::test]
async fn reschedule_rejects_malformed_time() {
    let engine = engine("reschedule_bad_time.wal");
    let b = barber(&engine, "Ana").await;
    let r = book(&engine, b.id, "2025-03-12T09:00:00").await;
    let err = engine.reschedule_appointment(r.id, "2025-13-40T99:00").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTimestamp(_)));
    assert_eq!(engine.get_appointment(r.id).unwrap().appointment.slot_label(), "09:00");
}

#[tokio::test]
async fn delete_is_hard() {
    let engine = engine("delete_hard.wal");
    let b = barber(&engine, "Ana").await;
    let r = book(&engine, b.id, "2025-03-12T09:00:00").await;
    engine.delete_appointment(r.id).await.unwrap();
    assert!(engine.get_appointment(r.id).is_err());
    assert!(matches!(
        engine.appointments_on("2025-03-12"),
        Err(EngineError::NoAppointmentsOn(_))
    ));
}

#[tokio::test]
async fn listing_by_date() {
    let engine = engine("list_by_date.wal");
    let b = barber(&engine, "Ana").await;

    assert!(matches!(engine.appointments_on("2025/03/12"), Err(EngineError::InvalidDate(_))));
    assert!(matches!(
        engine.appointments_on("2025-03-12"),
        Err(EngineError::NoAppointmentsOn(_))
    ));

    let first = book(&engine, b.id, "2025-03-12T09:00:00").await;
    let second = book(&engine, b.id, "2025-03-12T09:30:00").await;
    book(&engine, b.id, "2025-03-13T09:00:00").await;
    engine.cancel_appointment(first.id).await.unwrap();

    let listed = engine.appointments_on("2025-03-12").unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].appointment.id, second.id);
    assert_eq!(listed[0].appointment.position, 2);
    assert_eq!(listed[0].live_position, 1);
    assert_eq!(listed[1].appointment.id, first.id);
    assert_eq!(listed[1].live_position, 0);
}

// ── Queue ────────────────────────────────────────────────

#[tokio::test]
async fn queue_ranks_by_arrival() {
    let engine = engine("queue_ranks.wal");
    let a = engine.join_queue("A", None).await.unwrap();
    let b = engine.join_queue("B", None).await.unwrap();
    let c = engine.join_queue("C", None).await.unwrap();
    assert_eq!((a.position, b.position, c.position), (1, 2, 3));

    engine.cancel_queue_entry(b.entry.id).await.unwrap();

    let listed: Vec<(String, u32)> = engine
        .list_queue()
        .into_iter()
        .map(|q| (q.entry.name, q.position))
        .collect();
    assert_eq!(
        listed,
        vec![("A".to_string(), 1), ("C".to_string(), 2), ("B".to_string(), 0)]
    );
    assert_eq!(engine.queue_position(c.entry.id).unwrap().position, 2);
    assert_eq!(engine.queue_position(b.entry.id).unwrap().position, 0);
}

#[tokio::test]
async fn queue_name_required_and_trimmed() {
    let engine = engine("queue_name.wal");
    assert!(matches!(
        engine.join_queue("   ", None).await,
        Err(EngineError::EmptyField("name"))
    ));
    let q = engine.join_queue("  Pat  ", None).await.unwrap();
    assert_eq!(q.entry.name, "Pat");
}

#[tokio::test]
async fn queue_status_is_coerced() {
    let engine = engine("queue_coerce.wal");
    let odd = engine.join_queue("Odd", Some("vip")).await.unwrap();
    assert_eq!(odd.entry.status, QueueStatus::Pending);
    assert_eq!(odd.position, 1);

    let done = engine.join_queue("Done", Some("completed")).await.unwrap();
    assert_eq!(done.entry.status, QueueStatus::Completed);
    assert_eq!(done.position, 0);

    let shouted = engine.join_queue("Shouted", Some("CANCELED")).await.unwrap();
    assert_eq!(shouted.entry.status, QueueStatus::Pending);
    let british = engine.join_queue("British", Some("cancelled")).await.unwrap();
    assert_eq!(british.entry.status, QueueStatus::Pending);
    assert_eq!(british.position, 3);
}

#[tokio::test]
async fn queue_complete_and_remove() {
    let engine = engine("queue_remove.wal");
    let a = engine.join_queue("A", None).await.unwrap();
    let b = engine.join_queue("B", None).await.unwrap();

    engine.complete_queue_entry(a.entry.id).await.unwrap();
    assert_eq!(engine.queue_position(b.entry.id).unwrap().position, 1);

    engine.remove_queue_entry(a.entry.id).await.unwrap();
    assert!(matches!(
        engine.queue_position(a.entry.id),
        Err(EngineError::NotFound(Entity::QueueEntry, _))
    ));
    assert_eq!(engine.list_queue().len(), 1);
}

#[tokio::test]
async fn queue_unknown_entry() {
    let engine = engine("queue_unknown.wal");
    let id = Ulid::new();
    assert!(engine.queue_position(id).is_err());
    assert!(engine.cancel_queue_entry(id).await.is_err());
    assert!(engine.complete_queue_entry(id).await.is_err());
    assert!(engine.remove_queue_entry(id).await.is_err());
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let (barber_id, appt_id, queue_id, service_id);
    {
        let engine = Engine::new(path.clone()).unwrap();
        let b = barber(&engine, "Ana").await;
        let s = engine
            .add_service(NewService {
                name: "Cut".into(),
                price: Some(Decimal::new(2000, 2)),
                ..Default::default()
            })
            .await
            .unwrap();
        book(&engine, b.id, "2025-03-12T09:00:00").await;
        let r = book(&engine, b.id, "2025-03-12T09:30:00").await;
        engine.reschedule_appointment(r.id, "2025-03-14T10:00:00").await.unwrap();
        engine.schedule_appointment(r.id).await.unwrap();
        let q = engine.join_queue("Walk-in", None).await.unwrap();
        engine.complete_queue_entry(q.entry.id).await.unwrap();
        barber_id = b.id;
        appt_id = r.id;
        queue_id = q.entry.id;
        service_id = s.id;
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.get_barber(barber_id).unwrap().name, "Ana");
    assert_eq!(engine.get_service(service_id).unwrap().price, Decimal::new(2000, 2));
    let appt = engine.get_appointment(appt_id).unwrap().appointment;
    assert_eq!(appt.status, AppointmentStatus::Scheduled);
    assert_eq!(appt.position, 1);
    assert_eq!(appt.slot_label(), "10:00");
    assert_eq!(engine.appointments_on("2025-03-12").unwrap().len(), 1);
    assert_eq!(
        engine.queue_position(queue_id).unwrap().entry.status,
        QueueStatus::Completed
    );
}

#[tokio::test]
async fn compact_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let appt_id;
    {
        let engine = Engine::new(path.clone()).unwrap();
        let b = barber(&engine, "Ana").await;
        for i in 0..10 {
            let r = book(&engine, b.id, &format!("2025-03-12T{:02}:00:00", 9 + i % 8)).await;
            engine.delete_appointment(r.id).await.unwrap();
        }
        let r = book(&engine, b.id, "2025-03-12T09:00:00").await;
        engine.cancel_appointment(r.id).await.unwrap();
        appt_id = r.id;

        let before = std::fs::metadata(&path).unwrap().len();
        assert!(engine.wal_appends_since_compact().await > 0);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        engine.join_queue("After compaction", None).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.barbers().len(), 1);
    assert_eq!(
        engine.get_appointment(appt_id).unwrap().appointment.status,
        AppointmentStatus::Canceled
    );
    assert_eq!(engine.list_queue().len(), 1);
}

#[tokio::test]
async fn appends_counted_through_channel() {
    let engine = engine("append_counter.wal");
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    engine.join_queue("A", None).await.unwrap();
    engine.join_queue("B", None).await.unwrap();
    engine.join_queue("C", None).await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 3);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test]
async fn concurrent_bookings_all_land() {
    let engine = Arc::new(engine("concurrent_bookings.wal"));
    let barber_id = barber(&engine, "Ana").await.id;

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let time = format!("2025-03-12T{:02}:{:02}:00", 9 + i / 4, (i % 4) * 15);
            engine.book_appointment(request(barber_id, &time)).await
        }));
    }
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert!((1..=32).contains(&receipt.position));
    }

    let listed = engine.appointments_on("2025-03-12").unwrap();
    assert_eq!(listed.len(), 32);
    let ranks: Vec<u32> = listed.iter().map(|a| a.live_position).collect();
    assert_eq!(ranks, (1..=32).collect::<Vec<u32>>());
}

#[tokio::test]
async fn concurrent_queue_joins_get_distinct_ranks() {
    let engine = Arc::new(engine("concurrent_queue.wal"));
    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.join_queue(&format!("walk-in {i}"), None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    let ranks: Vec<u32> = engine.list_queue().iter().map(|q| q.position).collect();
    assert_eq!(ranks, (1..=16).collect::<Vec<u32>>());
}

#[tokio::test]
async fn compaction_during_writes_loses_nothing() {
    let path = test_wal_path("compact_race.wal");
    let expected;
    {
        let engine = Arc::new(Engine::new(path.clone()).unwrap());
        let done = Arc::new(AtomicBool::new(false));
        let compactor = {
            let engine = engine.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut passes = 0u32;
                while !done.load(Ordering::Relaxed) {
                    engine.compact_wal().await.unwrap();
                    passes += 1;
                    tokio::task::yield_now().await;
                }
                passes
            })
        };

        let mut writers = Vec::new();
        for w in 0..8 {
            let engine = engine.clone();
            writers.push(tokio::spawn(async move {
                for i in 0..100 {
                    engine.join_queue(&format!("walk-in {w}-{i}"), None).await.unwrap();
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }
        done.store(true, Ordering::Relaxed);
        assert!(compactor.await.unwrap() > 0);

        expected = engine.list_queue().len();
        assert_eq!(expected, 800);
    }

    let reopened = Engine::new(path).unwrap();
    assert_eq!(reopened.list_queue().len(), expected);
}

#[tokio::test]
async fn bookings_racing_barber_removal_leave_no_orphans() {
    let engine = Arc::new(engine("book_remove_race.wal"));
    for round in 0..20 {
        let barber_id = barber(&engine, &format!("Barber {round}")).await.id;
        let mut bookings = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            bookings.push(tokio::spawn(async move {
                let time = format!("2025-03-12T{:02}:00:00", 9 + i);
                engine.book_appointment(request(barber_id, &time)).await
            }));
        }
        let removal = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.remove_barber(barber_id).await })
        };

        removal.await.unwrap().unwrap();
        for booking in bookings {
            match booking.await.unwrap() {
                Ok(receipt) => assert!(matches!(
                    engine.get_appointment(receipt.id),
                    Err(EngineError::NotFound(Entity::Appointment, _))
                )),
                Err(e) => assert!(matches!(e, EngineError::NotFound(Entity::Barber, _))),
            }
        }
    }
    assert!(engine.barbers().is_empty());
    assert!(matches!(
        engine.appointments_on("2025-03-12"),
        Err(EngineError::NoAppointmentsOn(_))
    ));
}
