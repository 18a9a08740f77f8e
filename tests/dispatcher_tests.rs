use chrono::NaiveDate;
use rt_clinic_relay::store::{BookingStore, DbRuntimeSettings, NewDoctor};
use rt_clinic_relay::tools::ToolDispatcher;
use serde_json::{Value, json};
use tempfile::TempDir;

struct Clinic {
    _dir: TempDir,
    dispatcher: ToolDispatcher,
    doctor_id: i64,
    slot_id: i64,
}

fn clinic() -> Clinic {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("clinic.db");
    let store = BookingStore::open(path.to_str().expect("utf-8 path"), DbRuntimeSettings::default())
        .expect("store should open");

    let cardio = store
        .create_doctor(&NewDoctor {
            name: "Dr. Cardioni".to_string(),
            specialty: "Cardiologist".to_string(),
            description: None,
            contact_info: Some("cardio@rock.example".to_string()),
        })
        .expect("create doctor");
    store
        .create_doctor(&NewDoctor {
            name: "Dr. Kidd".to_string(),
            specialty: "Pediatrician".to_string(),
            description: None,
            contact_info: None,
        })
        .expect("create doctor");
    let nine = NaiveDate::from_ymd_opt(2025, 6, 2)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let slot = store
        .create_slot(cardio.id, nine)
        .expect("create slot")
        .expect("doctor exists");

    Clinic {
        _dir: dir,
        dispatcher: ToolDispatcher::new(store),
        doctor_id: cardio.id,
        slot_id: slot.id,
    }
}

async fn call(dispatcher: &ToolDispatcher, name: &str, arguments: Value) -> Value {
    let outcome = dispatcher.dispatch(name, arguments).await;
    serde_json::from_str(&outcome.to_json_string()).expect("outcome is JSON")
}

#[tokio::test]
async fn test_list_doctors_matches_specialty_substring() {
    let clinic = clinic();
    let result = call(&clinic.dispatcher, "list_doctors", json!({ "specialty": "cardio" })).await;
    assert_eq!(
        result,
        json!([{
            "id": clinic.doctor_id,
            "name": "Dr. Cardioni",
            "specialty": "Cardiologist",
            "contact_info": "cardio@rock.example"
        }])
    );

    let everyone = call(&clinic.dispatcher, "list_doctors", json!({ "specialty": "" })).await;
    assert_eq!(everyone.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_booking_scenario_through_tools() {
    let clinic = clinic();
    let d = &clinic.dispatcher;
    let (doctor_id, slot_id) = (clinic.doctor_id, clinic.slot_id);

    let slots = call(d, "list_slots", json!({ "doctor_id": doctor_id, "date": "2025-06-02" })).await;
    assert_eq!(slots, json!([{ "id": slot_id, "start_time": "2025-06-02 09:00:00" }]));

    let first = call(
        d,
        "book_appointment",
        json!({ "doctor_id": doctor_id, "slot_id": slot_id, "patient_name": "Alice" }),
    )
    .await;
    assert_eq!(first["success"], true);
    assert_eq!(first["doctor_id"], doctor_id);
    assert_eq!(first["slot_id"], slot_id);
    let appointment_id = first["appointment_id"].as_i64().expect("appointment id");

    let second = call(
        d,
        "book_appointment",
        json!({ "doctor_id": doctor_id, "slot_id": slot_id, "patient_name": "Bob" }),
    )
    .await;
    assert_eq!(second, json!({ "success": false, "reason": "Slot not available" }));

    let slots = call(d, "list_slots", json!({ "doctor_id": doctor_id })).await;
    assert_eq!(slots, json!([]));

    let cancelled = call(d, "cancel_appointment", json!({ "appointment_id": appointment_id })).await;
    assert_eq!(cancelled, json!({ "success": true }));

    let rebooked = call(
        d,
        "book_appointment",
        json!({ "doctor_id": doctor_id, "slot_id": slot_id, "patient_name": "Bob" }),
    )
    .await;
    assert_eq!(rebooked["success"], true);
}

#[tokio::test]
async fn test_cancel_unknown_appointment() {
    let clinic = clinic();
    let result = call(&clinic.dispatcher, "cancel_appointment", json!({ "appointment_id": 404 })).await;
    assert_eq!(result, json!({ "success": false, "reason": "Appointment not found" }));
}

#[tokio::test]
async fn test_unknown_tool_is_an_error_payload() {
    let clinic = clinic();
    let result = call(&clinic.dispatcher, "order_pizza", json!({})).await;
    assert_eq!(result, json!({ "error": "unknown tool" }));
}

#[tokio::test]
async fn test_bad_arguments_become_error_payloads() {
    let clinic = clinic();
    let d = &clinic.dispatcher;

    let missing = call(d, "list_doctors", json!({})).await;
    assert!(missing["error"].as_str().unwrap().contains("specialty"));

    let wrong_type = call(d, "list_slots", json!({ "doctor_id": "first" })).await;
    assert!(wrong_type["error"].as_str().unwrap().contains("invalid arguments"));

    let blank_name = call(
        d,
        "book_appointment",
        json!({ "doctor_id": clinic.doctor_id, "slot_id": clinic.slot_id, "patient_name": "  " }),
    )
    .await;
    assert!(blank_name["error"].as_str().unwrap().contains("patient_name"));

    // The slot was not touched by the rejected booking.
    let slots = call(d, "list_slots", json!({ "doctor_id": clinic.doctor_id })).await;
    assert_eq!(slots.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_string_encoded_arguments() {
    let clinic = clinic();
    let arguments = Value::String(format!(
        r#"{{"doctor_id": "{}", "slot_id": {}, "patient_name": " Dana "}}"#,
        clinic.doctor_id, clinic.slot_id
    ));
    let result = call(&clinic.dispatcher, "book_appointment", arguments).await;
    assert_eq!(result["success"], true);
}
