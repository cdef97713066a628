use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use frontdesk_agent::{
    AnthropicTurnClient, GatewayError, InMemorySessionStore, PersistenceGateway, SessionStore,
    TurnError, TurnOrchestrator,
};
use frontdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use frontdesk_core::domain::patient::PatientId;
use frontdesk_core::intake::fields::PatientFields;
use frontdesk_db::repositories::{
    NewInsurance, NewPatientIntake, PatientRepository, SqlPatientRepository,
};
use frontdesk_db::{connect_with_settings, migrations, DbPool};
use frontdesk_notify::{
    CalendarBooker, GoogleCalendarClient, NoopCalendar, SmsSender, TwilioSmsClient,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub session_store: Arc<dyn SessionStore>,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub calendar: Arc<dyn CalendarBooker>,
    pub sms: Arc<dyn SmsSender>,
    pub started_at: Instant,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("turn generation client setup failed: {0}")]
    Llm(#[source] TurnError),
}

/// Bridges the engine's persistence hand-off onto the patient repository.
pub struct SqlPersistenceGateway {
    patients: SqlPatientRepository,
}

impl SqlPersistenceGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { patients: SqlPatientRepository::new(pool) }
    }
}

#[async_trait]
impl PersistenceGateway for SqlPersistenceGateway {
    async fn store_intake(
        &self,
        call_sid: &str,
        fields: &PatientFields,
    ) -> Result<PatientId, GatewayError> {
        let insurance = if fields.insurance.provider.is_some()
            || fields.insurance.member_id.is_some()
        {
            Some(NewInsurance {
                provider: fields.insurance.provider.clone(),
                member_id: fields.insurance.member_id.clone(),
            })
        } else {
            None
        };

        self.patients
            .upsert_intake(&NewPatientIntake {
                call_sid: call_sid.to_string(),
                name: fields.name.clone(),
                phone: fields.phone.clone(),
                email: fields.email.clone(),
                date_of_birth: fields.date_of_birth.clone(),
                insurance,
            })
            .await
            .map_err(|error| GatewayError::Unavailable(error.to_string()))
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let generator = AnthropicTurnClient::new(&config.llm).map_err(BootstrapError::Llm)?;
    let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let gateway = Arc::new(SqlPersistenceGateway::new(db_pool.clone()));

    let orchestrator = Arc::new(TurnOrchestrator::new(
        Arc::clone(&session_store),
        Arc::new(generator),
        gateway,
        config.practice.name.clone(),
    ));

    let calendar: Arc<dyn CalendarBooker> = match GoogleCalendarClient::from_config(&config.google)
    {
        Some(client) => Arc::new(client),
        None => {
            warn!(
                event_name = "system.bootstrap.calendar_disabled",
                correlation_id = "bootstrap",
                "google credentials absent; calendar booking disabled"
            );
            Arc::new(NoopCalendar)
        }
    };
    let sms: Arc<dyn SmsSender> = Arc::new(TwilioSmsClient::new(&config.twilio));

    Ok(Application {
        config,
        db_pool,
        session_store,
        orchestrator,
        calendar,
        sms,
        started_at: Instant::now(),
    })
}

/// Periodically drops sessions for calls that went quiet without
/// completing, so the table cannot grow without bound.
pub fn spawn_session_sweeper(store: Arc<dyn SessionStore>, idle_timeout: Duration) {
    tokio::spawn(async move {
        let sweep_every = (idle_timeout / 4).max(Duration::from_secs(30));
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            let evicted = store.evict_idle(idle_timeout).await;
            if evicted > 0 {
                debug!(
                    event_name = "system.sessions.evicted",
                    evicted,
                    idle_timeout_secs = idle_timeout.as_secs(),
                    "idle call sessions evicted"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use frontdesk_agent::PersistenceGateway;
    use frontdesk_core::config::{ConfigOverrides, LoadOptions};
    use frontdesk_core::intake::fields::{Field, PatientFields};
    use frontdesk_db::repositories::{PatientRepository, SqlPatientRepository};
    use frontdesk_db::{connect_with_settings, migrations};

    use super::{bootstrap, SqlPersistenceGateway};

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                llm_api_key: Some("sk-ant-test".to_string()),
                twilio_account_sid: Some("ACtest0000000000".to_string()),
                twilio_auth_token: Some("token-test".to_string()),
                twilio_from_number: Some("+15550001111".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_twilio_credentials() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_api_key: Some("sk-ant-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("twilio.account_sid"));
    }

    #[tokio::test]
    async fn bootstrap_prepares_schema_and_engine() {
        let app = bootstrap(valid_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('patients', 'insurance', 'appointments')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected intake tables to be available after bootstrap");
        assert_eq!(table_count, 3, "bootstrap should expose the intake schema");

        assert!(!app.session_store.exists("CA-none").await);
        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn gateway_maps_engine_fields_onto_the_repository() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let mut fields = PatientFields::default();
        fields.fill(Field::Name, "John Smith");
        fields.fill(Field::Phone, "5551112222");
        fields.fill(Field::InsuranceProvider, "Cigna");

        let gateway = SqlPersistenceGateway::new(pool.clone());
        let patient_id = gateway.store_intake("CA-gw", &fields).await.expect("store");

        let profile = SqlPatientRepository::new(pool)
            .find_with_insurance(&patient_id)
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(profile.patient.name.as_deref(), Some("John Smith"));
        assert_eq!(profile.patient.call_sid, "CA-gw");
        assert_eq!(profile.insurance.expect("insurance").provider.as_deref(), Some("Cigna"));
    }

    #[tokio::test]
    async fn gateway_retries_are_idempotent_per_call() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let mut fields = PatientFields::default();
        fields.fill(Field::Name, "John Smith");

        let gateway = SqlPersistenceGateway::new(pool.clone());
        let first = gateway.store_intake("CA-dup", &fields).await.expect("first");
        let second = gateway.store_intake("CA-dup", &fields).await.expect("second");
        assert_eq!(first, second);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 1);
    }
}
