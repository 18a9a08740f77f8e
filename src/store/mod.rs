//! Booking store: doctors, their slots, and the appointments that claim them.
//!
//! Backed by SQLite through an `r2d2` pool shared by every call. Each mutating
//! operation runs in its own `IMMEDIATE` transaction, so concurrent sessions
//! are serialized per write and a failed operation leaves no partial state.
//! The slot flip in [`BookingStore::book_appointment`] is a conditional
//! update, which is what makes "at most one booking per slot" hold across
//! connections.

mod migrations;
mod models;
mod pool;

pub use migrations::{MigrationError, run_migrations};
pub use models::{
    Appointment, AppointmentStatus, BookingOutcome, CancelOutcome, Doctor, NewAppointment,
    NewDoctor, Slot, TIMESTAMP_FORMAT, day_bounds,
};
pub use pool::{DbPool, DbRuntimeSettings, create_pool};

use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};

const DOCTOR_COLUMNS: &str = "id, name, specialty, description, contact_info";
const SLOT_COLUMNS: &str = "id, doctor_id, start_time, is_booked";
const APPOINTMENT_COLUMNS: &str = "id, doctor_id, slot_id, patient_name, status, created_at";

/// Handle to the booking database. Cheap to clone; clones share the pool.
#[derive(Clone, Debug)]
pub struct BookingStore {
    pool: DbPool,
}

impl BookingStore {
    /// Open (creating if needed) the database at `path` and apply migrations.
    ///
    /// # Errors
    /// Returns an error if the pool cannot be built or a migration fails.
    #[allow(clippy::result_large_err)]
    pub fn open(path: &str, settings: DbRuntimeSettings) -> Result<Self> {
        let pool = create_pool(path, settings)?;
        let applied = run_migrations(&*pool.get()?)?;
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
        Ok(Self { pool })
    }

    /// Doctors whose specialty contains `specialty`, ignoring case. An empty
    /// or absent filter returns every doctor.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    #[allow(clippy::result_large_err)]
    pub fn list_doctors(&self, specialty: Option<&str>) -> Result<Vec<Doctor>> {
        let conn = self.pool.get()?;
        let filter = specialty.map(str::trim).unwrap_or_default().to_lowercase();
        let mut stmt = conn.prepare(&format!("SELECT {DOCTOR_COLUMNS} FROM doctors ORDER BY id"))?;
        let mut doctors = stmt
            .query_map([], doctor_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // SQLite's lower() folds ASCII only; match with Rust's case folding.
        if !filter.is_empty() {
            doctors.retain(|doctor| doctor.specialty.to_lowercase().contains(&filter));
        }
        Ok(doctors)
    }

    /// Page through all doctors in id order.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    #[allow(clippy::result_large_err)]
    pub fn list_all_doctors(&self, skip: u32, limit: u32) -> Result<Vec<Doctor>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCTOR_COLUMNS} FROM doctors ORDER BY id LIMIT ?1 OFFSET ?2"
        ))?;
        let doctors = stmt
            .query_map(params![limit, skip], doctor_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(doctors)
    }

    /// # Errors
    /// Returns an error if the query fails.
    #[allow(clippy::result_large_err)]
    pub fn get_doctor(&self, doctor_id: i64) -> Result<Option<Doctor>> {
        let conn = self.pool.get()?;
        let doctor = conn
            .query_row(
                &format!("SELECT {DOCTOR_COLUMNS} FROM doctors WHERE id = ?1"),
                [doctor_id],
                doctor_from_row,
            )
            .optional()?;
        Ok(doctor)
    }

    /// # Errors
    /// Returns an error if the insert fails.
    #[allow(clippy::result_large_err)]
    pub fn create_doctor(&self, doctor: &NewDoctor) -> Result<Doctor> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO doctors (name, specialty, description, contact_info) VALUES (?1, ?2, ?3, ?4)",
            params![doctor.name, doctor.specialty, doctor.description, doctor.contact_info],
        )?;
        Ok(Doctor {
            id: conn.last_insert_rowid(),
            name: doctor.name.clone(),
            specialty: doctor.specialty.clone(),
            description: doctor.description.clone(),
            contact_info: doctor.contact_info.clone(),
        })
    }

    /// Delete a doctor together with their slots and appointments. Returns
    /// whether the doctor existed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    #[allow(clippy::result_large_err)]
    pub fn delete_doctor(&self, doctor_id: i64) -> Result<bool> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM appointments WHERE doctor_id = ?1", [doctor_id])?;
        tx.execute("DELETE FROM slots WHERE doctor_id = ?1", [doctor_id])?;
        let removed = tx.execute("DELETE FROM doctors WHERE id = ?1", [doctor_id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Add a free slot for a doctor. Returns `None` when the doctor does not exist.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    #[allow(clippy::result_large_err)]
    pub fn create_slot(&self, doctor_id: i64, start_time: NaiveDateTime) -> Result<Option<Slot>> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM doctors WHERE id = ?1)",
            [doctor_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(None);
        }
        tx.execute(
            "INSERT INTO slots (doctor_id, start_time, is_booked) VALUES (?1, ?2, 0)",
            params![doctor_id, start_time.format(TIMESTAMP_FORMAT).to_string()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Some(Slot {
            id,
            doctor_id,
            start_time,
            is_booked: false,
        }))
    }

    /// Free slots of a doctor in start-time order, optionally restricted to one
    /// calendar day (inclusive of both ends).
    ///
    /// # Errors
    /// Returns an error if the query fails.
    #[allow(clippy::result_large_err)]
    pub fn list_slots(&self, doctor_id: i64, date: Option<NaiveDate>) -> Result<Vec<Slot>> {
        let conn = self.pool.get()?;
        let slots = if let Some(date) = date {
            let (day_start, day_end) = day_bounds(date);
            let mut stmt = conn.prepare(&format!(
                "SELECT {SLOT_COLUMNS} FROM slots
                 WHERE doctor_id = ?1 AND is_booked = 0
                   AND start_time >= ?2 AND start_time <= ?3
                 ORDER BY start_time, id"
            ))?;
            stmt.query_map(params![doctor_id, day_start, day_end], slot_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SLOT_COLUMNS} FROM slots
                 WHERE doctor_id = ?1 AND is_booked = 0
                 ORDER BY start_time, id"
            ))?;
            stmt.query_map([doctor_id], slot_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(slots)
    }

    /// Claim a free slot for a patient. The slot flip and the appointment
    /// insert commit together or not at all.
    ///
    /// # Errors
    /// Returns an error only for storage faults; an unknown, already booked,
    /// or other doctor's slot is [`BookingOutcome::SlotUnavailable`].
    #[allow(clippy::result_large_err)]
    pub fn book_appointment(&self, request: &NewAppointment) -> Result<BookingOutcome> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let claimed = tx.execute(
            "UPDATE slots SET is_booked = 1 WHERE id = ?1 AND doctor_id = ?2 AND is_booked = 0",
            params![request.slot_id, request.doctor_id],
        )?;
        if claimed == 0 {
            tracing::debug!(slot_id = request.slot_id, doctor_id = request.doctor_id, "slot not bookable");
            return Ok(BookingOutcome::SlotUnavailable);
        }

        let created_at = now();
        tx.execute(
            "INSERT INTO appointments (doctor_id, slot_id, patient_name, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                request.doctor_id,
                request.slot_id,
                request.patient_name,
                AppointmentStatus::Booked.as_str(),
                created_at.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!(appointment_id = id, slot_id = request.slot_id, doctor_id = request.doctor_id, "appointment booked");

        Ok(BookingOutcome::Booked(Appointment {
            id,
            doctor_id: request.doctor_id,
            slot_id: request.slot_id,
            patient_name: request.patient_name.clone(),
            status: AppointmentStatus::Booked,
            created_at,
        }))
    }

    /// Remove an appointment and free its slot in one transaction. An unknown
    /// id changes nothing.
    ///
    /// # Errors
    /// Returns an error only for storage faults.
    #[allow(clippy::result_large_err)]
    pub fn cancel_appointment(&self, appointment_id: i64) -> Result<CancelOutcome> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let slot_id: Option<i64> = tx
            .query_row(
                "SELECT slot_id FROM appointments WHERE id = ?1",
                [appointment_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(slot_id) = slot_id else {
            return Ok(CancelOutcome::NotFound);
        };

        tx.execute("DELETE FROM appointments WHERE id = ?1", [appointment_id])?;
        tx.execute("UPDATE slots SET is_booked = 0 WHERE id = ?1", [slot_id])?;
        tx.commit()?;

        tracing::info!(appointment_id, slot_id, "appointment cancelled");

        Ok(CancelOutcome::Cancelled { appointment_id, slot_id })
    }

    /// # Errors
    /// Returns an error if the query fails.
    #[allow(clippy::result_large_err)]
    pub fn list_appointments(&self) -> Result<Vec<Appointment>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments ORDER BY id"
        ))?;
        let appointments = stmt
            .query_map([], appointment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(appointments)
    }

    /// # Errors
    /// Returns an error if the query fails.
    #[allow(clippy::result_large_err)]
    pub fn get_appointment(&self, appointment_id: i64) -> Result<Option<Appointment>> {
        let conn = self.pool.get()?;
        let appointment = conn
            .query_row(
                &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
                [appointment_id],
                appointment_from_row,
            )
            .optional()?;
        Ok(appointment)
    }

    /// Run a blocking store operation off the async runtime.
    ///
    /// # Errors
    /// Returns the operation's error, or [`Error::Join`] if the blocking task
    /// panicked.
    pub async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }
}

fn now() -> NaiveDateTime {
    // Second precision, matching the stored format.
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn doctor_from_row(row: &Row<'_>) -> rusqlite::Result<Doctor> {
    Ok(Doctor {
        id: row.get(0)?,
        name: row.get(1)?,
        specialty: row.get(2)?,
        description: row.get(3)?,
        contact_info: row.get(4)?,
    })
}

fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<Slot> {
    Ok(Slot {
        id: row.get(0)?,
        doctor_id: row.get(1)?,
        start_time: parse_timestamp(row, 2)?,
        is_booked: row.get(3)?,
    })
}

fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    let status: String = row.get(4)?;
    Ok(Appointment {
        id: row.get(0)?,
        doctor_id: row.get(1)?,
        slot_id: row.get(2)?,
        patient_name: row.get(3)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
        })?,
        created_at: parse_timestamp(row, 5)?,
    })
}

impl From<MigrationError> for Error {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::ExecutionFailed { source, .. } | MigrationError::StateQuery(source) => {
                Self::Database(source)
            }
        }
    }
}
