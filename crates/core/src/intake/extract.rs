use std::sync::OnceLock;

use regex::Regex;

use crate::intake::fields::{Field, PatientFields};
use crate::intake::stage::Stage;

/// Canonical insurance provider names, keyed by the substring callers
/// actually say. Table order is the priority order: when an utterance
/// mentions more than one key, the earliest table entry wins.
const PROVIDER_TABLE: [(&str, &str); 5] = [
    ("blue cross", "Blue Cross Blue Shield"),
    ("aetna", "Aetna"),
    ("cigna", "Cigna"),
    ("united", "United Healthcare"),
    ("humana", "Humana"),
];

fn phone_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b").expect("valid phone pattern")
    })
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9][A-Za-z0-9._%+-]*@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("valid email pattern")
    })
}

fn date_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").expect("valid date pattern"))
}

fn member_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Za-z0-9]{6,15}\b").expect("valid member id pattern"))
}

/// Pulls structured intake fields out of a raw speech transcript.
///
/// Extraction is pure and deterministic: the same utterance, stage, and
/// prior fields always produce the same result. Every rule is
/// set-only-if-unset, so a field captured on an earlier turn survives any
/// later utterance that happens to match the same pattern.
#[derive(Clone, Debug, Default)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Apply every extraction rule to `utterance` on top of `current`.
    ///
    /// `stage` is the stage that was being prompted for when the caller
    /// spoke: the name and reason fields have no reliable pattern, so they
    /// are captured verbatim from the utterance while their stage is
    /// active.
    pub fn extract(&self, utterance: &str, stage: Stage, current: &PatientFields) -> PatientFields {
        let mut fields = current.clone();
        let trimmed = utterance.trim();
        if trimmed.is_empty() {
            return fields;
        }
        let lowered = utterance.to_lowercase();

        match stage.prompted_field() {
            Some(field @ (Field::Name | Field::Reason)) => {
                fields.fill(field, trimmed);
            }
            _ => {}
        }

        if let Some(candidate) = phone_pattern().find(utterance) {
            let digits: String =
                candidate.as_str().chars().filter(char::is_ascii_digit).collect();
            fields.fill(Field::Phone, digits);
        }

        if let Some(candidate) = email_pattern().find(utterance) {
            fields.fill(Field::Email, candidate.as_str());
        }

        if lowered.contains("birth") {
            if let Some(candidate) = date_pattern().find(utterance) {
                fields.fill(Field::DateOfBirth, candidate.as_str());
            }
        }

        if let Some(provider) = match_provider(&lowered) {
            fields.fill(Field::InsuranceProvider, provider);
        }

        if lowered.contains("member") || lowered.contains("id") {
            if let Some(candidate) = first_member_id_candidate(utterance) {
                fields.fill(Field::InsuranceMemberId, candidate.to_uppercase());
            }
        }

        fields
    }
}

fn match_provider(lowered_utterance: &str) -> Option<&'static str> {
    PROVIDER_TABLE
        .iter()
        .find(|(key, _)| lowered_utterance.contains(key))
        .map(|(_, canonical)| *canonical)
}

// Member ids carry at least one digit; plain words like "member" or
// "insurance" would otherwise satisfy the 6-15 alphanumeric shape.
fn first_member_id_candidate(utterance: &str) -> Option<&str> {
    member_id_pattern()
        .find_iter(utterance)
        .map(|candidate| candidate.as_str())
        .find(|token| token.chars().any(|ch| ch.is_ascii_digit()))
}
