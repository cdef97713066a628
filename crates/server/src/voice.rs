//! Twilio voice webhook routes - the per-call conversation loop.
//!
//! Twilio posts here once when a call starts and once per speech turn.
//! Every response carries another `<Gather>` pointing back at
//! `/voice/process`, which keeps the loop going until the caller hangs up.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Form, Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use frontdesk_agent::TurnOrchestrator;

use crate::twiml::TwimlBuilder;

const PROCESS_ACTION: &str = "/voice/process";

#[derive(Clone)]
pub struct VoiceState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub practice_name: String,
}

pub fn router(state: VoiceState) -> Router {
    Router::new()
        .route("/voice/incoming", post(handle_incoming_call))
        .route("/voice/process", post(handle_utterance))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IncomingCallRequest {
    pub call_sid: Option<String>,
    pub from: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UtteranceRequest {
    pub call_sid: Option<String>,
    pub speech_result: Option<String>,
    pub from: Option<String>,
}

fn twiml_response(twiml: String) -> impl IntoResponse {
    (StatusCode::OK, [("Content-Type", "application/xml")], twiml)
}

pub async fn handle_incoming_call(
    State(state): State<VoiceState>,
    Form(request): Form<IncomingCallRequest>,
) -> impl IntoResponse {
    info!(
        event_name = "voice.call.started",
        call_sid = request.call_sid.as_deref().unwrap_or("unknown"),
        caller = request.from.as_deref().unwrap_or("unknown"),
        "incoming call"
    );

    let greeting = format!(
        "Hello! Thank you for calling {}. May I have your full name, please?",
        state.practice_name
    );
    twiml_response(TwimlBuilder::new().gather_speech(PROCESS_ACTION, &greeting).build())
}

pub async fn handle_utterance(
    State(state): State<VoiceState>,
    Form(request): Form<UtteranceRequest>,
) -> axum::response::Response {
    let Some(call_sid) = request.call_sid.filter(|sid| !sid.trim().is_empty()) else {
        warn!(event_name = "voice.turn.rejected", "utterance without CallSid");
        return (StatusCode::BAD_REQUEST, "missing required field: CallSid").into_response();
    };

    let speech = request.speech_result.unwrap_or_default();
    let reply = state
        .orchestrator
        .handle_utterance(&call_sid, &speech, request.from.as_deref())
        .await;

    twiml_response(TwimlBuilder::new().gather_speech(PROCESS_ACTION, &reply).build())
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{extract::State, http::StatusCode, Form};

    use frontdesk_agent::{
        GatewayError, InMemorySessionStore, PersistenceGateway, TurnContext, TurnError,
        TurnGenerator, TurnOrchestrator,
    };
    use frontdesk_core::domain::patient::PatientId;
    use frontdesk_core::intake::fields::PatientFields;
    use frontdesk_core::intake::session::Message;

    use super::{
        handle_incoming_call, handle_utterance, IncomingCallRequest, UtteranceRequest, VoiceState,
    };

    struct EchoGenerator;

    #[async_trait]
    impl TurnGenerator for EchoGenerator {
        async fn next_reply(
            &self,
            context: &TurnContext,
            _history: &[Message],
        ) -> Result<String, TurnError> {
            Ok(format!("now asking about {}", context.stage))
        }
    }

    struct NoopGateway;

    #[async_trait]
    impl PersistenceGateway for NoopGateway {
        async fn store_intake(
            &self,
            _call_sid: &str,
            _fields: &PatientFields,
        ) -> Result<PatientId, GatewayError> {
            Ok(PatientId("pat-test".to_string()))
        }
    }

    fn state() -> VoiceState {
        VoiceState {
            orchestrator: Arc::new(TurnOrchestrator::new(
                Arc::new(InMemorySessionStore::new()),
                Arc::new(EchoGenerator),
                Arc::new(NoopGateway),
                "Harmony Chiropractic Center",
            )),
            practice_name: "Harmony Chiropractic Center".to_string(),
        }
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn incoming_call_greets_and_gathers() {
        let response = handle_incoming_call(
            State(state()),
            Form(IncomingCallRequest {
                call_sid: Some("CA1".to_string()),
                from: Some("+15551112222".to_string()),
            }),
        )
        .await;

        let response = axum::response::IntoResponse::into_response(response);
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("Thank you for calling Harmony Chiropractic Center"));
        assert!(body.contains("May I have your full name, please?"));
        assert!(body.contains("action=\"/voice/process\""));
    }

    #[tokio::test]
    async fn utterances_loop_back_through_the_process_action() {
        let state = state();
        let response = handle_utterance(
            State(state.clone()),
            Form(UtteranceRequest {
                call_sid: Some("CA2".to_string()),
                speech_result: Some("John Smith".to_string()),
                from: None,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("now asking about phone"));
        assert!(body.contains("action=\"/voice/process\""));
    }

    #[tokio::test]
    async fn missing_call_sid_is_rejected_with_explanation() {
        let response = handle_utterance(
            State(state()),
            Form(UtteranceRequest {
                call_sid: None,
                speech_result: Some("hello".to_string()),
                from: None,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_text(response).await;
        assert!(body.contains("CallSid"));
    }

    #[tokio::test]
    async fn empty_speech_still_keeps_the_loop_alive() {
        let response = handle_utterance(
            State(state()),
            Form(UtteranceRequest {
                call_sid: Some("CA3".to_string()),
                speech_result: None,
                from: None,
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        // nothing extracted, so the conversation is still at the name stage
        assert!(body.contains("now asking about name"));
    }
}
