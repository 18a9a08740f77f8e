//! Typed tool arguments. The same types produce the JSON schema advertised to
//! the model and validate what the model sends back.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ListDoctorsArgs {
    /// Specialty of the doctor, e.g., 'cardiologist', 'pediatrician'.
    pub specialty: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ListSlotsArgs {
    #[serde(deserialize_with = "flexible_id")]
    #[schemars(with = "i64")]
    pub doctor_id: i64,
    /// Date in YYYY-MM-DD format (optional)
    #[serde(default, deserialize_with = "flexible_date")]
    #[schemars(with = "Option<String>")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CancelAppointmentArgs {
    #[serde(deserialize_with = "flexible_id")]
    #[schemars(with = "i64")]
    pub appointment_id: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BookAppointmentArgs {
    #[serde(deserialize_with = "flexible_id")]
    #[schemars(with = "i64")]
    pub doctor_id: i64,
    #[serde(deserialize_with = "flexible_id")]
    #[schemars(with = "i64")]
    pub slot_id: i64,
    pub patient_name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(i64),
    Text(String),
}

/// Ids arrive as JSON integers or, from some models, as numeric strings.
fn flexible_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match IdRepr::deserialize(deserializer) {
        Ok(IdRepr::Number(id)) => Ok(id),
        Ok(IdRepr::Text(text)) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected an integer id, got {text:?}"))),
        Err(_) => Err(de::Error::custom("expected an integer id")),
    }
}

fn flexible_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    parse_date(raw)
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("expected a YYYY-MM-DD date, got {raw:?}")))
}

/// Accepts a bare date or an ISO date-time, keeping only the date.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.date())
}
