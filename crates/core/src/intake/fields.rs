use serde::{Deserialize, Serialize};

/// Insurance details collected during a call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceFields {
    pub provider: Option<String>,
    pub member_id: Option<String>,
}

/// Patient details accumulated over a call.
///
/// Writes go through [`PatientFields::fill`]; a field that already holds a
/// value is never overwritten, so the filled set only grows across turns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientFields {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<String>,
    pub reason: Option<String>,
    pub insurance: InsuranceFields,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Name,
    Phone,
    Email,
    DateOfBirth,
    Reason,
    InsuranceProvider,
    InsuranceMemberId,
}

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::DateOfBirth => "date_of_birth",
            Self::Reason => "reason",
            Self::InsuranceProvider => "insurance_provider",
            Self::InsuranceMemberId => "insurance_member_id",
        }
    }
}

pub const REQUIRED_FIELDS: [Field; 7] = [
    Field::Name,
    Field::Phone,
    Field::Email,
    Field::DateOfBirth,
    Field::Reason,
    Field::InsuranceProvider,
    Field::InsuranceMemberId,
];

impl PatientFields {
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::Name => self.name.as_deref(),
            Field::Phone => self.phone.as_deref(),
            Field::Email => self.email.as_deref(),
            Field::DateOfBirth => self.date_of_birth.as_deref(),
            Field::Reason => self.reason.as_deref(),
            Field::InsuranceProvider => self.insurance.provider.as_deref(),
            Field::InsuranceMemberId => self.insurance.member_id.as_deref(),
        }
    }

    /// First-write-wins setter. Returns true when the value was stored,
    /// false when the field already held a value and the write was dropped.
    pub fn fill(&mut self, field: Field, value: impl Into<String>) -> bool {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Phone => &mut self.phone,
            Field::Email => &mut self.email,
            Field::DateOfBirth => &mut self.date_of_birth,
            Field::Reason => &mut self.reason,
            Field::InsuranceProvider => &mut self.insurance.provider,
            Field::InsuranceMemberId => &mut self.insurance.member_id,
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(value.into());
        true
    }

    pub fn missing(&self) -> Vec<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .filter(|field| self.get(**field).is_none())
            .map(Field::key)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        REQUIRED_FIELDS.iter().all(|field| self.get(*field).is_some())
    }
}
