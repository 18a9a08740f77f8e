use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::store::{Doctor, Slot, TIMESTAMP_FORMAT};

pub const SLOT_NOT_AVAILABLE: &str = "Slot not available";
pub const APPOINTMENT_NOT_FOUND: &str = "Appointment not found";
pub const UNKNOWN_TOOL: &str = "unknown tool";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DoctorSummary {
    pub id: i64,
    pub name: String,
    pub specialty: String,
    pub contact_info: Option<String>,
}

impl From<Doctor> for DoctorSummary {
    fn from(doctor: Doctor) -> Self {
        Self {
            id: doctor.id,
            name: doctor.name,
            specialty: doctor.specialty,
            contact_info: doctor.contact_info,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlotSummary {
    pub id: i64,
    pub start_time: String,
}

impl From<Slot> for SlotSummary {
    fn from(slot: Slot) -> Self {
        Self {
            id: slot.id,
            start_time: slot.start_time.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    Cancelled,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingResult {
    Booked {
        appointment_id: i64,
        doctor_id: i64,
        slot_id: i64,
    },
    SlotUnavailable,
}

/// Every result a tool call can produce. Serializes to the payload that is
/// handed back to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Doctors(Vec<DoctorSummary>),
    Slots(Vec<SlotSummary>),
    Cancel(CancelResult),
    Booking(BookingResult),
    Error(String),
}

impl ToolOutcome {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// The outcome as the JSON text carried in a tool-result item.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to serialize tool outcome");
            r#"{"error":"result could not be encoded"}"#.to_string()
        })
    }
}

impl Serialize for ToolOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Doctors(doctors) => doctors.serialize(serializer),
            Self::Slots(slots) => slots.serialize(serializer),
            Self::Cancel(CancelResult::Cancelled) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("success", &true)?;
                map.end()
            }
            Self::Cancel(CancelResult::NotFound) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("success", &false)?;
                map.serialize_entry("reason", APPOINTMENT_NOT_FOUND)?;
                map.end()
            }
            Self::Booking(BookingResult::Booked {
                appointment_id,
                doctor_id,
                slot_id,
            }) => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("appointment_id", appointment_id)?;
                map.serialize_entry("doctor_id", doctor_id)?;
                map.serialize_entry("slot_id", slot_id)?;
                map.end()
            }
            Self::Booking(BookingResult::SlotUnavailable) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("success", &false)?;
                map.serialize_entry("reason", SLOT_NOT_AVAILABLE)?;
                map.end()
            }
            Self::Error(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", message)?;
                map.end()
            }
        }
    }
}
