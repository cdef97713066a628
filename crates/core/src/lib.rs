pub mod config;
pub mod domain;
pub mod errors;
pub mod intake;

pub use domain::appointment::{AppointmentId, AppointmentRecord};
pub use domain::patient::{InsuranceRecord, PatientId, PatientRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use intake::extract::FieldExtractor;
pub use intake::fields::{InsuranceFields, PatientFields};
pub use intake::session::{ConversationSession, Message, MessageRole};
pub use intake::stage::Stage;
