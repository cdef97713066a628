use async_trait::async_trait;
use thiserror::Error;

use frontdesk_core::domain::appointment::{AppointmentId, AppointmentRecord};
use frontdesk_core::domain::patient::PatientId;

pub mod appointment;
pub mod patient;

pub use appointment::{NewAppointment, SqlAppointmentRepository};
pub use patient::{NewInsurance, NewPatientIntake, PatientProfile, SqlPatientRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// The persistence gateway for finalized intake records. The upsert is
/// keyed on the call SID so a retried commit lands on the same row.
#[async_trait]
pub trait PatientRepository: Send + Sync {
    async fn upsert_intake(&self, intake: &NewPatientIntake) -> Result<PatientId, RepositoryError>;
    async fn find_with_insurance(
        &self,
        id: &PatientId,
    ) -> Result<Option<PatientProfile>, RepositoryError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn insert(&self, appointment: &NewAppointment)
        -> Result<AppointmentRecord, RepositoryError>;
    async fn annotate_calendar_link(
        &self,
        id: &AppointmentId,
        link: &str,
    ) -> Result<(), RepositoryError>;
    async fn find_by_id(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<AppointmentRecord>, RepositoryError>;
}
