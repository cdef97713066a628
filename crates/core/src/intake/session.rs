use serde::{Deserialize, Serialize};

use crate::domain::patient::PatientId;
use crate::intake::fields::PatientFields;
use crate::intake::stage::Stage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn of the call transcript. The full history is replayed to the
/// turn generator on every exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

/// Per-call conversation state, keyed by the telephony call SID.
///
/// `stage` is derived from `fields` and refreshed after every extraction
/// pass; `persisted` flips to true exactly once, after the patient record
/// has durably committed.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationSession {
    pub call_sid: String,
    pub messages: Vec<Message>,
    pub fields: PatientFields,
    pub stage: Stage,
    pub persisted: bool,
    pub patient_id: Option<PatientId>,
}

impl ConversationSession {
    pub fn new(call_sid: impl Into<String>) -> Self {
        let fields = PatientFields::default();
        let stage = Stage::resolve(&fields);
        Self {
            call_sid: call_sid.into(),
            messages: Vec::new(),
            fields,
            stage,
            persisted: false,
            patient_id: None,
        }
    }

    pub fn refresh_stage(&mut self) -> Stage {
        self.stage = Stage::resolve(&self.fields);
        self.stage
    }

    pub fn record_exchange(&mut self, utterance: impl Into<String>, reply: impl Into<String>) {
        self.messages.push(Message::user(utterance));
        self.messages.push(Message::assistant(reply));
    }

    pub fn mark_persisted(&mut self, patient_id: PatientId) {
        self.persisted = true;
        self.patient_id = Some(patient_id);
    }
}

#[cfg(test)]
mod tests {
    use super::ConversationSession;
    use crate::domain::patient::PatientId;
    use crate::intake::fields::Field;
    use crate::intake::stage::Stage;

    #[test]
    fn new_sessions_start_at_the_name_stage() {
        let session = ConversationSession::new("CA123");
        assert_eq!(session.stage, Stage::Name);
        assert!(session.messages.is_empty());
        assert!(!session.persisted);
    }

    #[test]
    fn refresh_stage_tracks_field_progress() {
        let mut session = ConversationSession::new("CA123");
        session.fields.fill(Field::Name, "John Smith");
        assert_eq!(session.refresh_stage(), Stage::Phone);
    }

    #[test]
    fn record_exchange_appends_user_then_assistant() {
        let mut session = ConversationSession::new("CA123");
        session.record_exchange("John Smith", "Thanks John, what is your phone number?");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].content, "John Smith");
    }

    #[test]
    fn mark_persisted_records_the_patient_id() {
        let mut session = ConversationSession::new("CA123");
        session.mark_persisted(PatientId("pat-1".to_string()));
        assert!(session.persisted);
        assert_eq!(session.patient_id, Some(PatientId("pat-1".to_string())));
    }
}
