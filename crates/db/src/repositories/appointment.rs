use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use frontdesk_core::domain::appointment::{AppointmentId, AppointmentRecord};
use frontdesk_core::domain::patient::PatientId;

use super::{AppointmentRepository, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAppointment {
    pub patient_id: PatientId,
    pub appointment_date: String,
    pub appointment_time: String,
    pub reason: Option<String>,
}

pub struct SqlAppointmentRepository {
    pool: DbPool,
}

impl SqlAppointmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AppointmentRecord, RepositoryError> {
    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|error| RepositoryError::Decode(format!("appointments.created_at: {error}")))?
        .with_timezone(&Utc);

    Ok(AppointmentRecord {
        id: AppointmentId(row.get("id")),
        patient_id: PatientId(row.get("patient_id")),
        appointment_date: row.get("appointment_date"),
        appointment_time: row.get("appointment_time"),
        reason: row.get("reason"),
        notes: row.get("notes"),
        created_at,
    })
}

#[async_trait::async_trait]
impl AppointmentRepository for SqlAppointmentRepository {
    async fn insert(
        &self,
        appointment: &NewAppointment,
    ) -> Result<AppointmentRecord, RepositoryError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let row = sqlx::query(
            "INSERT INTO appointments
                 (id, patient_id, appointment_date, appointment_time, reason, notes, created_at)
             VALUES (?, ?, ?, ?, ?, NULL, ?)
             RETURNING id, patient_id, appointment_date, appointment_time, reason, notes, created_at",
        )
        .bind(&id)
        .bind(&appointment.patient_id.0)
        .bind(&appointment.appointment_date)
        .bind(&appointment.appointment_time)
        .bind(&appointment.reason)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        record_from_row(&row)
    }

    async fn annotate_calendar_link(
        &self,
        id: &AppointmentId,
        link: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE appointments SET notes = ? WHERE id = ?")
            .bind(link)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<AppointmentRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, patient_id, appointment_date, appointment_time, reason, notes, created_at
             FROM appointments WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use frontdesk_core::domain::patient::PatientId;

    use super::{NewAppointment, SqlAppointmentRepository};
    use crate::repositories::patient::{NewPatientIntake, SqlPatientRepository};
    use crate::repositories::{AppointmentRepository, PatientRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool_with_schema() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    async fn seeded_patient(pool: &DbPool) -> PatientId {
        let patients = SqlPatientRepository::new(pool.clone());
        patients
            .upsert_intake(&NewPatientIntake {
                call_sid: "CA500".to_string(),
                name: Some("John Smith".to_string()),
                phone: Some("5551112222".to_string()),
                ..NewPatientIntake::default()
            })
            .await
            .expect("seed patient")
    }

    #[tokio::test]
    async fn insert_returns_the_stored_appointment() {
        let pool = pool_with_schema().await;
        let patient_id = seeded_patient(&pool).await;
        let repo = SqlAppointmentRepository::new(pool);

        let record = repo
            .insert(&NewAppointment {
                patient_id: patient_id.clone(),
                appointment_date: "2026-08-20".to_string(),
                appointment_time: "10:30".to_string(),
                reason: Some("back pain follow-up".to_string()),
            })
            .await
            .expect("insert appointment");

        assert_eq!(record.patient_id, patient_id);
        assert_eq!(record.appointment_date, "2026-08-20");
        assert!(record.notes.is_none());
    }

    #[tokio::test]
    async fn calendar_link_annotation_is_visible_on_lookup() {
        let pool = pool_with_schema().await;
        let patient_id = seeded_patient(&pool).await;
        let repo = SqlAppointmentRepository::new(pool);

        let record = repo
            .insert(&NewAppointment {
                patient_id,
                appointment_date: "2026-08-20".to_string(),
                appointment_time: "10:30".to_string(),
                reason: None,
            })
            .await
            .expect("insert appointment");

        repo.annotate_calendar_link(&record.id, "https://calendar.google.com/event?eid=abc")
            .await
            .expect("annotate");

        let found = repo.find_by_id(&record.id).await.expect("lookup").expect("present");
        assert_eq!(found.notes.as_deref(), Some("https://calendar.google.com/event?eid=abc"));
    }

    #[tokio::test]
    async fn appointments_require_an_existing_patient() {
        let pool = pool_with_schema().await;
        let repo = SqlAppointmentRepository::new(pool);

        let result = repo
            .insert(&NewAppointment {
                patient_id: PatientId("pat-404".to_string()),
                appointment_date: "2026-08-20".to_string(),
                appointment_time: "10:30".to_string(),
                reason: None,
            })
            .await;

        assert!(result.is_err(), "foreign key violation should surface as an error");
    }
}
