use chrono::{NaiveDate, NaiveDateTime};
use rt_clinic_relay::store::{
    AppointmentStatus, BookingOutcome, BookingStore, CancelOutcome, DbRuntimeSettings, Doctor,
    NewAppointment, NewDoctor, Slot,
};
use std::sync::Arc;
use tempfile::TempDir;

fn open_store() -> (TempDir, BookingStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("clinic.db");
    let store = BookingStore::open(path.to_str().expect("utf-8 path"), DbRuntimeSettings::default())
        .expect("store should open");
    (dir, store)
}

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn doctor(store: &BookingStore, name: &str, specialty: &str) -> Doctor {
    store
        .create_doctor(&NewDoctor {
            name: name.to_string(),
            specialty: specialty.to_string(),
            description: Some("Sees patients on weekdays".to_string()),
            contact_info: Some("555-0100".to_string()),
        })
        .expect("create doctor")
}

fn slot(store: &BookingStore, doctor_id: i64, start: NaiveDateTime) -> Slot {
    store
        .create_slot(doctor_id, start)
        .expect("create slot")
        .expect("doctor exists")
}

fn book(store: &BookingStore, doctor_id: i64, slot_id: i64, name: &str) -> BookingOutcome {
    store
        .book_appointment(&NewAppointment {
            doctor_id,
            slot_id,
            patient_name: name.to_string(),
        })
        .expect("book")
}

#[test]
fn test_book_cancel_rebook_scenario() {
    let (_dir, store) = open_store();
    let d = doctor(&store, "Dr. House", "Diagnostics");
    let s1 = slot(&store, d.id, at(2, 9));

    let BookingOutcome::Booked(a1) = book(&store, d.id, s1.id, "Alice") else {
        panic!("first booking should succeed");
    };
    assert_eq!(a1.status, AppointmentStatus::Booked);
    assert_eq!(a1.patient_name, "Alice");
    assert!(store.list_slots(d.id, None).unwrap().is_empty());

    assert_eq!(book(&store, d.id, s1.id, "Bob"), BookingOutcome::SlotUnavailable);

    assert_eq!(
        store.cancel_appointment(a1.id).unwrap(),
        CancelOutcome::Cancelled { appointment_id: a1.id, slot_id: s1.id }
    );
    assert_eq!(store.list_slots(d.id, None).unwrap().len(), 1);

    let BookingOutcome::Booked(a2) = book(&store, d.id, s1.id, "Bob") else {
        panic!("rebooking a freed slot should succeed");
    };
    assert_eq!(a2.slot_id, s1.id);
    assert_eq!(store.list_appointments().unwrap().len(), 1);
}

#[test]
fn test_booking_requires_matching_doctor() {
    let (_dir, store) = open_store();
    let d1 = doctor(&store, "Dr. One", "Cardiology");
    let d2 = doctor(&store, "Dr. Two", "Dermatology");
    let s = slot(&store, d1.id, at(2, 10));

    assert_eq!(book(&store, d2.id, s.id, "Alice"), BookingOutcome::SlotUnavailable);
    assert_eq!(book(&store, d1.id, 9_999, "Alice"), BookingOutcome::SlotUnavailable);
    // Nothing changed.
    assert_eq!(store.list_slots(d1.id, None).unwrap().len(), 1);
    assert!(store.list_appointments().unwrap().is_empty());
}

#[test]
fn test_cancel_unknown_appointment_changes_nothing() {
    let (_dir, store) = open_store();
    let d = doctor(&store, "Dr. House", "Diagnostics");
    let s = slot(&store, d.id, at(2, 9));
    let BookingOutcome::Booked(a) = book(&store, d.id, s.id, "Alice") else {
        panic!("booking should succeed");
    };

    assert_eq!(store.cancel_appointment(a.id + 100).unwrap(), CancelOutcome::NotFound);
    assert_eq!(store.get_appointment(a.id).unwrap(), Some(a));
    assert!(store.list_slots(d.id, None).unwrap().is_empty());

    // An empty store reports NotFound as well.
    let (_dir2, other) = open_store();
    assert_eq!(other.cancel_appointment(1).unwrap(), CancelOutcome::NotFound);
}

#[test]
fn test_concurrent_bookings_of_one_slot() {
    let (_dir, store) = open_store();
    let d = doctor(&store, "Dr. Popular", "General practice");
    let s = slot(&store, d.id, at(3, 9));
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let (doctor_id, slot_id) = (d.id, s.id);
            std::thread::spawn(move || book(&store, doctor_id, slot_id, &format!("Patient {i}")))
        })
        .collect();

    let outcomes: Vec<BookingOutcome> = handles
        .into_iter()
        .map(|h| h.join().expect("booking thread"))
        .collect();
    let booked = outcomes
        .iter()
        .filter(|o| matches!(o, BookingOutcome::Booked(_)))
        .count();
    assert_eq!(booked, 1);
    assert_eq!(store.list_appointments().unwrap().len(), 1);
}

#[test]
fn test_list_slots_orders_and_filters() {
    let (_dir, store) = open_store();
    let d = doctor(&store, "Dr. Early", "Pediatrics");
    let late = slot(&store, d.id, at(4, 15));
    let early = slot(&store, d.id, at(4, 8));
    let other_day = slot(&store, d.id, at(5, 8));
    let BookingOutcome::Booked(_) = book(&store, d.id, late.id, "Carol") else {
        panic!("booking should succeed");
    };

    let all: Vec<i64> = store.list_slots(d.id, None).unwrap().iter().map(|s| s.id).collect();
    assert_eq!(all, vec![early.id, other_day.id]);

    let day = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap();
    let on_day: Vec<i64> = store.list_slots(d.id, Some(day)).unwrap().iter().map(|s| s.id).collect();
    assert_eq!(on_day, vec![early.id]);
}

#[test]
fn test_doctor_listing_and_cascade_delete() {
    let (_dir, store) = open_store();
    let cardio = doctor(&store, "Dr. Cardioni", "Cardiologist");
    let _peds = doctor(&store, "Dr. Kidd", "Pediatrician");
    let s = slot(&store, cardio.id, at(2, 9));
    let BookingOutcome::Booked(a) = book(&store, cardio.id, s.id, "Alice") else {
        panic!("booking should succeed");
    };

    let found = store.list_doctors(Some("cardio")).unwrap();
    assert_eq!(found, vec![cardio.clone()]);
    assert_eq!(store.list_all_doctors(0, 10).unwrap().len(), 2);
    assert_eq!(store.list_all_doctors(1, 10).unwrap().len(), 1);
    assert_eq!(store.list_all_doctors(0, 1).unwrap().len(), 1);

    assert!(store.delete_doctor(cardio.id).unwrap());
    assert!(!store.delete_doctor(cardio.id).unwrap());
    assert_eq!(store.get_doctor(cardio.id).unwrap(), None);
    assert_eq!(store.get_appointment(a.id).unwrap(), None);
    assert!(store.list_slots(cardio.id, None).unwrap().is_empty());
}

#[test]
fn test_specialty_filter_ignores_case_beyond_ascii() {
    let (_dir, store) = open_store();
    let lead = doctor(&store, "Dr. Vogel", "Ärztliche Leitung");
    let _ent = doctor(&store, "Dr. Ohr", "ENT");
    let derm = doctor(&store, "Dr. Haut", "DERMATOLOGIST");

    assert_eq!(store.list_doctors(Some("ärzt")).unwrap(), vec![lead.clone()]);
    assert_eq!(store.list_doctors(Some("ÄRZTLICHE")).unwrap(), vec![lead]);
    assert_eq!(store.list_doctors(Some("  derma ")).unwrap(), vec![derm]);
    assert!(store.list_doctors(Some("%")).unwrap().is_empty());
    assert_eq!(store.list_doctors(Some("  ")).unwrap().len(), 3);
    assert_eq!(store.list_doctors(None).unwrap().len(), 3);
}

#[test]
fn test_reopen_keeps_data_and_skips_applied_migrations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("clinic.db");
    let path = path.to_str().expect("utf-8 path");

    let first = BookingStore::open(path, DbRuntimeSettings::default()).expect("first open");
    let d = doctor(&first, "Dr. Stay", "Oncology");
    drop(first);

    let second = BookingStore::open(path, DbRuntimeSettings::default()).expect("second open");
    assert_eq!(second.get_doctor(d.id).unwrap(), Some(d));
}

#[tokio::test]
async fn test_run_offloads_blocking_work() {
    let (_dir, store) = open_store();
    let created = store
        .run(|store| {
            store.create_doctor(&NewDoctor {
                name: "Dr. Async".to_string(),
                specialty: "Neurology".to_string(),
                description: None,
                contact_info: None,
            })
        })
        .await
        .expect("create via run");
    let fetched = store
        .run(move |store| store.get_doctor(created.id))
        .await
        .expect("fetch via run");
    assert_eq!(fetched.map(|d| d.name), Some("Dr. Async".to_string()));
}
