use serde::{Deserialize, Serialize};

use crate::intake::fields::{Field, PatientFields};

/// The next intake field the assistant needs to collect, or `Scheduling`
/// once everything required is on hand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Name,
    Phone,
    Email,
    DateOfBirth,
    Reason,
    InsuranceProvider,
    InsuranceMemberId,
    Scheduling,
}

impl Stage {
    /// Derive the stage from the fields collected so far. Fields are checked
    /// in a fixed order and the first missing one wins; when none is missing
    /// the intake is complete and the call moves to scheduling.
    pub fn resolve(fields: &PatientFields) -> Self {
        for field in crate::intake::fields::REQUIRED_FIELDS {
            if fields.get(field).is_none() {
                return Self::from_field(field);
            }
        }
        Self::Scheduling
    }

    fn from_field(field: Field) -> Self {
        match field {
            Field::Name => Self::Name,
            Field::Phone => Self::Phone,
            Field::Email => Self::Email,
            Field::DateOfBirth => Self::DateOfBirth,
            Field::Reason => Self::Reason,
            Field::InsuranceProvider => Self::InsuranceProvider,
            Field::InsuranceMemberId => Self::InsuranceMemberId,
        }
    }

    /// The field this stage prompts the caller for, if any.
    pub fn prompted_field(&self) -> Option<Field> {
        match self {
            Self::Name => Some(Field::Name),
            Self::Phone => Some(Field::Phone),
            Self::Email => Some(Field::Email),
            Self::DateOfBirth => Some(Field::DateOfBirth),
            Self::Reason => Some(Field::Reason),
            Self::InsuranceProvider => Some(Field::InsuranceProvider),
            Self::InsuranceMemberId => Some(Field::InsuranceMemberId),
            Self::Scheduling => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Scheduling)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::DateOfBirth => "date_of_birth",
            Self::Reason => "reason",
            Self::InsuranceProvider => "insurance_provider",
            Self::InsuranceMemberId => "insurance_member_id",
            Self::Scheduling => "scheduling",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
