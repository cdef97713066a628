use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use frontdesk_core::domain::patient::{InsuranceRecord, PatientId, PatientRecord};

use super::{PatientRepository, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewInsurance {
    pub provider: Option<String>,
    pub member_id: Option<String>,
}

/// Finalized intake payload handed over by the conversation engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewPatientIntake {
    pub call_sid: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<String>,
    pub insurance: Option<NewInsurance>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PatientProfile {
    pub patient: PatientRecord,
    pub insurance: Option<InsuranceRecord>,
}

pub struct SqlPatientRepository {
    pool: DbPool,
}

impl SqlPatientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl PatientRepository for SqlPatientRepository {
    /// Store patient and insurance in one transaction. Retries of the same
    /// call land on the existing row via the unique call_sid constraint;
    /// COALESCE keeps already-committed values over later ones, matching
    /// the engine's first-write-wins fields.
    async fn upsert_intake(&self, intake: &NewPatientIntake) -> Result<PatientId, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let candidate_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let patient_id: String = sqlx::query_scalar(
            "INSERT INTO patients (id, name, phone, email, date_of_birth, call_sid, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(call_sid) DO UPDATE SET
                 name = COALESCE(patients.name, excluded.name),
                 phone = COALESCE(patients.phone, excluded.phone),
                 email = COALESCE(patients.email, excluded.email),
                 date_of_birth = COALESCE(patients.date_of_birth, excluded.date_of_birth)
             RETURNING id",
        )
        .bind(&candidate_id)
        .bind(&intake.name)
        .bind(&intake.phone)
        .bind(&intake.email)
        .bind(&intake.date_of_birth)
        .bind(&intake.call_sid)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(insurance) = &intake.insurance {
            sqlx::query(
                "INSERT INTO insurance (patient_id, provider, member_id)
                 VALUES (?, ?, ?)
                 ON CONFLICT(patient_id) DO UPDATE SET
                     provider = COALESCE(insurance.provider, excluded.provider),
                     member_id = COALESCE(insurance.member_id, excluded.member_id)",
            )
            .bind(&patient_id)
            .bind(&insurance.provider)
            .bind(&insurance.member_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(PatientId(patient_id))
    }

    async fn find_with_insurance(
        &self,
        id: &PatientId,
    ) -> Result<Option<PatientProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT p.id, p.name, p.phone, p.email, p.date_of_birth, p.call_sid, p.created_at,
                    i.provider, i.member_id
             FROM patients p
             LEFT JOIN insurance i ON i.patient_id = p.id
             WHERE p.id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let created_at: String = row.get("created_at");
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|error| RepositoryError::Decode(format!("patients.created_at: {error}")))?
            .with_timezone(&Utc);

        let patient = PatientRecord {
            id: PatientId(row.get("id")),
            name: row.get("name"),
            phone: row.get("phone"),
            email: row.get("email"),
            date_of_birth: row.get("date_of_birth"),
            call_sid: row.get("call_sid"),
            created_at,
        };

        let provider: Option<String> = row.get("provider");
        let member_id: Option<String> = row.get("member_id");
        let insurance = if provider.is_some() || member_id.is_some() {
            Some(InsuranceRecord { patient_id: patient.id.clone(), provider, member_id })
        } else {
            None
        };

        Ok(Some(PatientProfile { patient, insurance }))
    }
}

#[cfg(test)]
mod tests {
    use frontdesk_core::domain::patient::PatientId;

    use super::{NewInsurance, NewPatientIntake, SqlPatientRepository};
    use crate::repositories::PatientRepository;
    use crate::{connect_with_settings, migrations};

    async fn repository() -> SqlPatientRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlPatientRepository::new(pool)
    }

    fn intake(call_sid: &str) -> NewPatientIntake {
        NewPatientIntake {
            call_sid: call_sid.to_string(),
            name: Some("John Smith".to_string()),
            phone: Some("5551112222".to_string()),
            email: Some("john@example.com".to_string()),
            date_of_birth: Some("1/1/1990".to_string()),
            insurance: Some(NewInsurance {
                provider: Some("Cigna".to_string()),
                member_id: Some("CIG98765".to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn upsert_stores_patient_and_insurance_together() {
        let repo = repository().await;

        let id = repo.upsert_intake(&intake("CA100")).await.expect("upsert");
        let profile = repo.find_with_insurance(&id).await.expect("lookup").expect("present");

        assert_eq!(profile.patient.name.as_deref(), Some("John Smith"));
        assert_eq!(profile.patient.call_sid, "CA100");
        let insurance = profile.insurance.expect("insurance row");
        assert_eq!(insurance.provider.as_deref(), Some("Cigna"));
        assert_eq!(insurance.member_id.as_deref(), Some("CIG98765"));
    }

    #[tokio::test]
    async fn repeated_upserts_for_one_call_share_a_row() {
        let repo = repository().await;

        let first = repo.upsert_intake(&intake("CA200")).await.expect("first upsert");
        let second = repo.upsert_intake(&intake("CA200")).await.expect("second upsert");
        assert_eq!(first, second);

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM patients WHERE call_sid = 'CA200'")
                .fetch_one(repo.pool())
                .await
                .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn committed_values_survive_a_later_conflicting_upsert() {
        let repo = repository().await;

        let id = repo.upsert_intake(&intake("CA300")).await.expect("first upsert");

        let mut retry = intake("CA300");
        retry.name = Some("Somebody Else".to_string());
        repo.upsert_intake(&retry).await.expect("retry upsert");

        let profile = repo.find_with_insurance(&id).await.expect("lookup").expect("present");
        assert_eq!(profile.patient.name.as_deref(), Some("John Smith"));
    }

    #[tokio::test]
    async fn intake_without_insurance_leaves_no_insurance_row() {
        let repo = repository().await;

        let mut bare = intake("CA400");
        bare.insurance = None;
        let id = repo.upsert_intake(&bare).await.expect("upsert");

        let profile = repo.find_with_insurance(&id).await.expect("lookup").expect("present");
        assert!(profile.insurance.is_none());
    }

    #[tokio::test]
    async fn lookup_misses_return_none() {
        let repo = repository().await;
        let missing = repo.find_with_insurance(&PatientId("pat-404".to_string())).await.expect("lookup");
        assert!(missing.is_none());
    }
}
