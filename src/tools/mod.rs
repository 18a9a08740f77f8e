//! Tool Dispatcher: resolves the model's tool invocations against the
//! booking store.
//!
//! [`ToolDispatcher::dispatch`] never fails. Unknown tools, malformed
//! arguments and store faults all come back as [`ToolOutcome::Error`] so the
//! conversation can carry on.

mod args;
mod outcome;

pub use args::{BookAppointmentArgs, CancelAppointmentArgs, ListDoctorsArgs, ListSlotsArgs};
pub use outcome::{
    APPOINTMENT_NOT_FOUND, BookingResult, CancelResult, DoctorSummary, SLOT_NOT_AVAILABLE,
    SlotSummary, ToolOutcome, UNKNOWN_TOOL,
};

use crate::protocol::models::Tool;
use crate::store::{BookingOutcome, BookingStore, CancelOutcome, NewAppointment};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// The tools the relay advertises to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ListDoctors,
    ListSlots,
    CancelAppointment,
    BookAppointment,
}

impl ToolName {
    pub const ALL: [Self; 4] = [
        Self::ListDoctors,
        Self::CancelAppointment,
        Self::ListSlots,
        Self::BookAppointment,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListDoctors => "list_doctors",
            Self::ListSlots => "list_slots",
            Self::CancelAppointment => "cancel_appointment",
            Self::BookAppointment => "book_appointment",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ListDoctors => "Get a list of doctors by specialty.",
            Self::ListSlots => "List available slots for a given doctor and optional date.",
            Self::CancelAppointment => "Cancel an appointment by appointment ID.",
            Self::BookAppointment => "Book an appointment for a user with a doctor at a given slot.",
        }
    }

    fn definition(self) -> Tool {
        let schema = match self {
            Self::ListDoctors => parameters::<ListDoctorsArgs>(),
            Self::ListSlots => parameters::<ListSlotsArgs>(),
            Self::CancelAppointment => parameters::<CancelAppointmentArgs>(),
            Self::BookAppointment => parameters::<BookAppointmentArgs>(),
        };
        Tool::Function {
            name: self.as_str().to_string(),
            description: Some(self.description().to_string()),
            parameters: schema,
        }
    }
}

impl std::str::FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| format!("unknown tool: {s}"))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parameters<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();
    // The realtime API wants a bare object schema.
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

/// Tool schema for `session.update`, generated from the argument types.
#[must_use]
pub fn tool_definitions() -> Vec<Tool> {
    ToolName::ALL.into_iter().map(ToolName::definition).collect()
}

#[derive(Debug, Error)]
enum DispatchError {
    #[error("invalid arguments: {0}")]
    Arguments(String),

    #[error(transparent)]
    Store(#[from] crate::Error),
}

/// Routes tool calls to the booking store. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ToolDispatcher {
    store: BookingStore,
}

impl ToolDispatcher {
    #[must_use]
    pub const fn new(store: BookingStore) -> Self {
        Self { store }
    }

    /// Run one tool call. `arguments` may be a JSON object or a string
    /// holding one.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> ToolOutcome {
        let Ok(tool) = name.parse::<ToolName>() else {
            tracing::warn!(tool = name, "model called an unknown tool");
            return ToolOutcome::error(UNKNOWN_TOOL);
        };

        match self.run(tool, arguments).await {
            Ok(outcome) => {
                tracing::debug!(%tool, "tool call completed");
                outcome
            }
            Err(err) => {
                tracing::warn!(%tool, error = %err, "tool call failed");
                ToolOutcome::error(err.to_string())
            }
        }
    }

    async fn run(&self, tool: ToolName, arguments: Value) -> Result<ToolOutcome, DispatchError> {
        match tool {
            ToolName::ListDoctors => {
                let args: ListDoctorsArgs = decode_arguments(arguments)?;
                let doctors = self
                    .store
                    .run(move |store| store.list_doctors(Some(&args.specialty)))
                    .await?;
                Ok(ToolOutcome::Doctors(doctors.into_iter().map(Into::into).collect()))
            }
            ToolName::ListSlots => {
                let args: ListSlotsArgs = decode_arguments(arguments)?;
                let slots = self
                    .store
                    .run(move |store| store.list_slots(args.doctor_id, args.date))
                    .await?;
                Ok(ToolOutcome::Slots(slots.into_iter().map(Into::into).collect()))
            }
            ToolName::CancelAppointment => {
                let args: CancelAppointmentArgs = decode_arguments(arguments)?;
                let outcome = self
                    .store
                    .run(move |store| store.cancel_appointment(args.appointment_id))
                    .await?;
                Ok(ToolOutcome::Cancel(match outcome {
                    CancelOutcome::Cancelled { .. } => CancelResult::Cancelled,
                    CancelOutcome::NotFound => CancelResult::NotFound,
                }))
            }
            ToolName::BookAppointment => {
                let args: BookAppointmentArgs = decode_arguments(arguments)?;
                let patient_name = args.patient_name.trim().to_string();
                if patient_name.is_empty() {
                    return Err(DispatchError::Arguments("patient_name must not be empty".to_string()));
                }
                tracing::info!(
                    doctor_id = args.doctor_id,
                    slot_id = args.slot_id,
                    patient_name = %patient_name,
                    "booking attempt"
                );
                let request = NewAppointment {
                    doctor_id: args.doctor_id,
                    slot_id: args.slot_id,
                    patient_name,
                };
                let outcome = self
                    .store
                    .run(move |store| store.book_appointment(&request))
                    .await?;
                Ok(ToolOutcome::Booking(match outcome {
                    BookingOutcome::Booked(appointment) => BookingResult::Booked {
                        appointment_id: appointment.id,
                        doctor_id: appointment.doctor_id,
                        slot_id: appointment.slot_id,
                    },
                    BookingOutcome::SlotUnavailable => BookingResult::SlotUnavailable,
                }))
            }
        }
    }
}

fn decode_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, DispatchError> {
    let arguments = match arguments {
        Value::String(text) if text.trim().is_empty() => Value::Object(serde_json::Map::new()),
        Value::String(text) => serde_json::from_str(&text)
            .map_err(|e| DispatchError::Arguments(format!("arguments are not valid JSON: {e}")))?,
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|e| DispatchError::Arguments(e.to_string()))
}
