use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use frontdesk_core::domain::patient::PatientId;
use frontdesk_core::intake::extract::FieldExtractor;
use frontdesk_core::intake::fields::{Field, PatientFields};
use frontdesk_core::intake::session::Message;

use crate::llm::{TurnContext, TurnGenerator};
use crate::store::SessionStore;

/// Scripted reply used whenever the turn generator fails; the call keeps
/// going and the next utterance retries with unchanged context.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I'm having a little trouble hearing you. Could you please repeat that?";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("persistence gateway failure: {0}")]
    Unavailable(String),
}

/// Durable storage for a finalized intake. Implementations must commit
/// patient and insurance together and be safe to call again for the same
/// call SID after a failed or uncertain commit.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn store_intake(
        &self,
        call_sid: &str,
        fields: &PatientFields,
    ) -> Result<PatientId, GatewayError>;
}

/// Drives one call turn end to end: extraction, stage resolution, reply
/// generation, and the one-shot persistence hand-off at the terminal stage.
pub struct TurnOrchestrator {
    store: Arc<dyn SessionStore>,
    generator: Arc<dyn TurnGenerator>,
    gateway: Arc<dyn PersistenceGateway>,
    extractor: FieldExtractor,
    practice_name: String,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        generator: Arc<dyn TurnGenerator>,
        gateway: Arc<dyn PersistenceGateway>,
        practice_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            generator,
            gateway,
            extractor: FieldExtractor::new(),
            practice_name: practice_name.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Process one caller utterance and produce the assistant's reply.
    ///
    /// `caller_phone` is the transport's caller-ID line, used to backfill
    /// the phone field when the caller has not spoken a number yet.
    pub async fn handle_utterance(
        &self,
        call_sid: &str,
        utterance: &str,
        caller_phone: Option<&str>,
    ) -> String {
        let shared = self.store.get_or_create(call_sid).await;
        let mut session = shared.lock().await;

        let prompted_stage = session.stage;
        session.fields = self.extractor.extract(utterance, prompted_stage, &session.fields);

        if session.fields.phone.is_none() {
            if let Some(caller) = caller_phone {
                let digits: String = caller.chars().filter(char::is_ascii_digit).collect();
                if !digits.is_empty() {
                    session.fields.fill(Field::Phone, digits);
                }
            }
        }

        let stage = session.refresh_stage();
        info!(
            event_name = "intake.turn.received",
            call_sid = %call_sid,
            stage = %stage,
            history_len = session.messages.len(),
            "processing caller utterance"
        );

        let context = TurnContext {
            practice_name: self.practice_name.clone(),
            stage,
            fields: session.fields.clone(),
            missing: session.fields.missing(),
        };
        let mut prospective_history = session.messages.clone();
        prospective_history.push(Message::user(utterance));

        let reply = match self.generator.next_reply(&context, &prospective_history).await {
            Ok(reply) => reply,
            Err(error) => {
                // Failed attempts leave no trace in the history, so the
                // next turn replays an identical context.
                warn!(
                    event_name = "intake.turn.generator_failed",
                    call_sid = %call_sid,
                    stage = %stage,
                    error = %error,
                    "turn generation failed; returning scripted fallback"
                );
                return FALLBACK_REPLY.to_string();
            }
        };

        session.record_exchange(utterance, reply.clone());

        if stage.is_terminal() && !session.persisted {
            match self.gateway.store_intake(call_sid, &session.fields).await {
                Ok(patient_id) => {
                    info!(
                        event_name = "intake.persist.committed",
                        call_sid = %call_sid,
                        patient_id = %patient_id,
                        "finalized patient record stored"
                    );
                    session.mark_persisted(patient_id);
                }
                Err(error) => {
                    // Left unpersisted on purpose: the next terminal-stage
                    // turn retries, and the gateway upsert absorbs the
                    // duplicate attempt.
                    warn!(
                        event_name = "intake.persist.failed",
                        call_sid = %call_sid,
                        error = %error,
                        "patient record persistence failed; will retry next turn"
                    );
                }
            }
        }

        reply
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use frontdesk_core::domain::patient::PatientId;
    use frontdesk_core::intake::fields::PatientFields;
    use frontdesk_core::intake::session::Message;
    use frontdesk_core::intake::stage::Stage;

    use crate::llm::{TurnContext, TurnError, TurnGenerator};
    use crate::store::{InMemorySessionStore, SessionStore};

    use super::{GatewayError, PersistenceGateway, TurnOrchestrator, FALLBACK_REPLY};

    #[derive(Default)]
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<Result<String, TurnError>>>,
        seen_stages: Mutex<Vec<Stage>>,
    }

    impl ScriptedGenerator {
        fn with_replies(replies: Vec<Result<String, TurnError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), seen_stages: Mutex::new(Vec::new()) }
        }

        fn always_ok() -> Self {
            Self::default()
        }

        async fn seen_stages(&self) -> Vec<Stage> {
            self.seen_stages.lock().await.clone()
        }
    }

    #[async_trait]
    impl TurnGenerator for ScriptedGenerator {
        async fn next_reply(
            &self,
            context: &TurnContext,
            _history: &[Message],
        ) -> Result<String, TurnError> {
            self.seen_stages.lock().await.push(context.stage);
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(format!("asking about {}", context.stage)))
        }
    }

    #[derive(Default)]
    struct CountingGateway {
        outcomes: Mutex<VecDeque<Result<PatientId, GatewayError>>>,
        attempts: Mutex<u32>,
        last_fields: Mutex<Option<PatientFields>>,
    }

    impl CountingGateway {
        fn with_outcomes(outcomes: Vec<Result<PatientId, GatewayError>>) -> Self {
            Self { outcomes: Mutex::new(outcomes.into()), ..Self::default() }
        }

        async fn attempts(&self) -> u32 {
            *self.attempts.lock().await
        }
    }

    #[async_trait]
    impl PersistenceGateway for CountingGateway {
        async fn store_intake(
            &self,
            _call_sid: &str,
            fields: &PatientFields,
        ) -> Result<PatientId, GatewayError> {
            *self.attempts.lock().await += 1;
            *self.last_fields.lock().await = Some(fields.clone());
            self.outcomes
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(PatientId("pat-1".to_string())))
        }
    }

    fn orchestrator(
        generator: Arc<ScriptedGenerator>,
        gateway: Arc<CountingGateway>,
    ) -> TurnOrchestrator {
        TurnOrchestrator::new(
            Arc::new(InMemorySessionStore::new()),
            generator,
            gateway,
            "Harmony Chiropractic Center",
        )
    }

    const INTAKE_SCRIPT: [(&str, Stage); 7] = [
        ("John Smith", Stage::Phone),
        ("555-111-2222", Stage::Email),
        ("john@example.com", Stage::DateOfBirth),
        ("my birthday is 1/1/1990", Stage::Reason),
        ("back pain", Stage::InsuranceProvider),
        ("I have Cigna", Stage::InsuranceMemberId),
        ("member id CIG98765", Stage::Scheduling),
    ];

    #[tokio::test]
    async fn full_intake_walks_every_stage_and_persists_once() {
        let generator = Arc::new(ScriptedGenerator::always_ok());
        let gateway = Arc::new(CountingGateway::default());
        let orchestrator = orchestrator(Arc::clone(&generator), Arc::clone(&gateway));

        for (utterance, expected_stage) in INTAKE_SCRIPT {
            orchestrator.handle_utterance("CA-e2e", utterance, None).await;
            let session = orchestrator.store().get_or_create("CA-e2e").await;
            assert_eq!(session.lock().await.stage, expected_stage, "after {utterance:?}");
        }

        assert_eq!(gateway.attempts().await, 1);
        let stored = gateway.last_fields.lock().await.clone().expect("gateway saw the intake");
        assert_eq!(stored.name.as_deref(), Some("John Smith"));
        assert_eq!(stored.insurance.provider.as_deref(), Some("Cigna"));

        let session = orchestrator.store().get_or_create("CA-e2e").await;
        let session = session.lock().await;
        assert!(session.persisted);
        assert_eq!(session.patient_id, Some(PatientId("pat-1".to_string())));
        assert_eq!(session.fields.phone.as_deref(), Some("5551112222"));
        assert_eq!(session.fields.insurance.member_id.as_deref(), Some("CIG98765"));
        assert_eq!(session.messages.len(), INTAKE_SCRIPT.len() * 2);
    }

    #[tokio::test]
    async fn terminal_turns_after_persistence_do_not_reinvoke_the_gateway() {
        let generator = Arc::new(ScriptedGenerator::always_ok());
        let gateway = Arc::new(CountingGateway::default());
        let orchestrator = orchestrator(Arc::clone(&generator), Arc::clone(&gateway));

        for (utterance, _) in INTAKE_SCRIPT {
            orchestrator.handle_utterance("CA-once", utterance, None).await;
        }
        for follow_up in ["next tuesday works", "morning please", "thanks"] {
            orchestrator.handle_utterance("CA-once", follow_up, None).await;
        }

        assert_eq!(gateway.attempts().await, 1);
    }

    #[tokio::test]
    async fn failed_persistence_is_retried_on_the_next_terminal_turn() {
        let generator = Arc::new(ScriptedGenerator::always_ok());
        let gateway = Arc::new(CountingGateway::with_outcomes(vec![
            Err(GatewayError::Unavailable("database locked".to_string())),
            Ok(PatientId("pat-2".to_string())),
        ]));
        let orchestrator = orchestrator(Arc::clone(&generator), Arc::clone(&gateway));

        for (utterance, _) in INTAKE_SCRIPT {
            orchestrator.handle_utterance("CA-retry", utterance, None).await;
        }

        {
            let session = orchestrator.store().get_or_create("CA-retry").await;
            assert!(!session.lock().await.persisted, "first commit attempt failed");
        }

        orchestrator.handle_utterance("CA-retry", "did that go through?", None).await;
        orchestrator.handle_utterance("CA-retry", "hello?", None).await;

        assert_eq!(gateway.attempts().await, 2, "no attempts once persisted");
        let session = orchestrator.store().get_or_create("CA-retry").await;
        let session = session.lock().await;
        assert!(session.persisted);
        assert_eq!(session.patient_id, Some(PatientId("pat-2".to_string())));
    }

    #[tokio::test]
    async fn generator_failure_yields_fallback_and_leaves_history_untouched() {
        let generator = Arc::new(ScriptedGenerator::with_replies(vec![
            Ok("Thanks John! What's the best phone number?".to_string()),
            Err(TurnError::Transport("connection reset".to_string())),
            Ok("Got it. And your email?".to_string()),
        ]));
        let gateway = Arc::new(CountingGateway::default());
        let orchestrator = orchestrator(Arc::clone(&generator), Arc::clone(&gateway));

        orchestrator.handle_utterance("CA-fail", "John Smith", None).await;
        let reply = orchestrator.handle_utterance("CA-fail", "555-111-2222", None).await;
        assert_eq!(reply, FALLBACK_REPLY);

        {
            let session = orchestrator.store().get_or_create("CA-fail").await;
            let session = session.lock().await;
            assert_eq!(session.messages.len(), 2, "failed turn must not be recorded");
            // extraction already happened; the retry only redoes the reply
            assert_eq!(session.fields.phone.as_deref(), Some("5551112222"));
        }

        let retried = orchestrator.handle_utterance("CA-fail", "555-111-2222", None).await;
        assert_eq!(retried, "Got it. And your email?");
        let session = orchestrator.store().get_or_create("CA-fail").await;
        assert_eq!(session.lock().await.messages.len(), 4);
    }

    #[tokio::test]
    async fn caller_id_backfills_phone_and_skips_the_phone_stage() {
        let generator = Arc::new(ScriptedGenerator::always_ok());
        let gateway = Arc::new(CountingGateway::default());
        let orchestrator = orchestrator(Arc::clone(&generator), Arc::clone(&gateway));

        orchestrator.handle_utterance("CA-cid", "John Smith", Some("+1 (555) 111-2222")).await;

        let session = orchestrator.store().get_or_create("CA-cid").await;
        let session = session.lock().await;
        assert_eq!(session.fields.phone.as_deref(), Some("15551112222"));
        assert_eq!(session.stage, Stage::Email, "phone stage is already satisfied");
    }

    #[tokio::test]
    async fn spoken_numbers_win_over_caller_id_only_when_spoken_first() {
        let generator = Arc::new(ScriptedGenerator::always_ok());
        let gateway = Arc::new(CountingGateway::default());
        let orchestrator = orchestrator(Arc::clone(&generator), Arc::clone(&gateway));

        orchestrator
            .handle_utterance("CA-mix", "John Smith, reach me at 555-999-8888", Some("+15551112222"))
            .await;

        let session = orchestrator.store().get_or_create("CA-mix").await;
        assert_eq!(session.lock().await.fields.phone.as_deref(), Some("5559998888"));
    }

    #[tokio::test]
    async fn generator_sees_the_freshly_resolved_stage() {
        let generator = Arc::new(ScriptedGenerator::always_ok());
        let gateway = Arc::new(CountingGateway::default());
        let orchestrator = orchestrator(Arc::clone(&generator), Arc::clone(&gateway));

        orchestrator.handle_utterance("CA-stage", "John Smith", None).await;
        orchestrator.handle_utterance("CA-stage", "555-111-2222", None).await;

        assert_eq!(generator.seen_stages().await, vec![Stage::Phone, Stage::Email]);
    }
}
