use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use slotbook::business::BusinessManager;
use slotbook::engine::{BookingRequest, BusinessProfile, EngineError, EngineSettings};
use slotbook::model::*;
use slotbook::notify::{NotificationKind, NotifyHub, Recipient};

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slotbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn profile() -> BusinessProfile {
    BusinessProfile {
        name: "nab".into(),
        prefix: "NAB".into(),
        admin_email: Some("ops@nab.example".into()),
    }
}

fn request(t: &str, minutes: i64) -> BookingRequest {
    BookingRequest {
        date: NaiveDate::from_ymd_opt(2030, 3, 10).unwrap(),
        time_slot: NaiveTime::parse_from_str(t, "%H:%M").unwrap(),
        duration_minutes: minutes,
        customer: CustomerContact {
            name: "Ravi".into(),
            email: "ravi@example.com".into(),
            phone: Some("+61 400 000 000".into()),
        },
        consultant: None,
        amount: 15_000,
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn draft_to_paid_to_cancelled() {
    let hub = Arc::new(NotifyHub::new());
    let mut rx = hub.subscribe();
    let bm = BusinessManager::new(data_dir(), EngineSettings::default(), hub.clone(), None);
    let engine = bm.open(profile()).unwrap();

    let id = assert_ok!(engine.create(request("10:00", 60)).await);
    assert!(id.starts_with("NAB_") && id.ends_with("_0001"));

    // Draft holds the slot against a second customer.
    assert_err!(engine.create(request("10:30", 30)).await);

    let paid = assert_ok!(engine.mark_payment_completed(&id).await);
    assert_eq!(paid.status, BookingStatus::Pending);
    assert_eq!(paid.payment_status, PaymentStatus::Completed);
    assert!(engine.locks.is_empty());

    let mut recipients = Vec::new();
    for _ in 0..2 {
        let n = rx.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::Confirmation);
        assert_eq!(n.booking.reference_id, id);
        recipients.push(n.recipient);
    }
    recipients.sort_by_key(|r| r.to_string());
    assert_eq!(recipients, vec![Recipient::Admin, Recipient::Customer]);

    // Back-to-back is fine, overlap is not.
    assert_ok!(engine.create(request("11:00", 30)).await);
    match engine.create(request("10:15", 30)).await {
        Err(EngineError::SlotUnavailable(msg)) => assert!(msg.contains(&id)),
        other => panic!("expected SlotUnavailable, got {other:?}"),
    }

    let cancelled = assert_ok!(engine.cancel(&id).await);
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::Cancellation);

    // The interval is free again.
    assert_ok!(engine.create(request("10:00", 30)).await);
}

#[tokio::test]
async fn consultant_pool_and_assignment() {
    let bm = BusinessManager::new(data_dir(), EngineSettings::default(), Arc::new(NotifyHub::new()), None);
    let engine = bm.open(profile()).unwrap();

    let day = NaiveDate::from_ymd_opt(2030, 3, 10).unwrap();
    for (id, name) in [("m1", "Meera"), ("j2", "Jon")] {
        assert_ok!(
            engine
                .upsert_consultant(Consultant {
                    id: id.into(),
                    name: name.into(),
                    email: format!("{id}@nab.example"),
                    status: ConsultantStatus::Active,
                    unavailable_slots: Vec::new(),
                })
                .await
        );
    }
    assert_ok!(
        engine
            .add_unavailable_slot(
                "j2",
                UnavailableSlot {
                    date: day,
                    start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                    reason: Some("training".into()),
                },
            )
            .await
    );

    let free = engine
        .list_available_consultants(day, NaiveTime::from_hms_opt(10, 0, 0).unwrap(), 60)
        .await
        .unwrap();
    let ids: Vec<&str> = free.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["m1"]);

    let with_m1 = BookingRequest {
        consultant: Some("m1".into()),
        ..request("10:00", 60)
    };
    let a = assert_ok!(engine.create(with_m1).await);
    assert_ok!(engine.mark_payment_completed(&a).await);

    // m1 is now busy; the shared pool is unaffected.
    assert!(
        !engine
            .is_consultant_available("m1", day, NaiveTime::from_hms_opt(10, 30, 0).unwrap(), 30)
            .await
            .unwrap()
    );
    let b = assert_ok!(engine.create(request("10:00", 60)).await);
    assert_ok!(engine.mark_payment_completed(&b).await);

    // Neither consultant can take b: m1 is booked, j2 is blocked out.
    assert_err!(engine.assign(&b, "m1").await);
    assert_err!(engine.assign(&b, "j2").await);
    assert_ok!(engine.remove_unavailable_slot("j2", 0).await);
    let assigned = assert_ok!(engine.assign(&b, "j2").await);
    assert_eq!(assigned.assigned_consultant, "j2");
    assert_eq!(assigned.consultant_contact.unwrap().name, "Jon");
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = data_dir();
    let id = {
        let bm = BusinessManager::new(dir.clone(), EngineSettings::default(), Arc::new(NotifyHub::new()), None);
        let engine = bm.open(profile()).unwrap();
        let id = engine.create(request("14:00", 45)).await.unwrap();
        engine.mark_payment_completed(&id).await.unwrap();
        engine.set_status(&id, BookingStatus::Confirmed).await.unwrap();
        id
    };

    let bm = BusinessManager::new(dir, EngineSettings::default(), Arc::new(NotifyHub::new()), None);
    let engine = bm.open(profile()).unwrap();
    let booking = engine.get_booking(&id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentStatus::Completed);
    assert_err!(engine.create(request("14:30", 30)).await);

    let counter = engine.peek_counter().await.unwrap().unwrap();
    assert_eq!(counter.counter, 1);
}

#[tokio::test]
async fn concurrent_creates_one_winner() {
    let bm = BusinessManager::new(data_dir(), EngineSettings::default(), Arc::new(NotifyHub::new()), None);
    let engine = bm.open(profile()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.create(request("16:00", 30)).await }));
    }
    let mut won = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            won += 1;
        }
    }
    assert_eq!(won, 1);
}
