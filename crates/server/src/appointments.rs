//! Appointment confirmation and patient lookup endpoints.
//!
//! Confirmation is fire-after-persist: the appointment row commits first,
//! then calendar booking and the SMS confirmation run best-effort. A dead
//! calendar or SMS sender degrades the response (null link), it never
//! fails it.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use frontdesk_core::domain::appointment::AppointmentId;
use frontdesk_core::domain::patient::PatientId;
use frontdesk_db::repositories::{
    AppointmentRepository, NewAppointment, PatientProfile, PatientRepository,
    SqlAppointmentRepository, SqlPatientRepository,
};
use frontdesk_db::DbPool;
use frontdesk_notify::{CalendarBooker, CalendarEvent, SmsSender};

const APPOINTMENT_MINUTES: i64 = 30;

#[derive(Clone)]
pub struct AppointmentsState {
    pub db_pool: DbPool,
    pub calendar: Arc<dyn CalendarBooker>,
    pub sms: Arc<dyn SmsSender>,
    pub practice_name: String,
    pub time_zone: String,
}

pub fn router(state: AppointmentsState) -> Router {
    Router::new()
        .route("/appointments/confirm", post(confirm_appointment))
        .route("/patients/{id}", get(get_patient))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub patient_id: String,
    pub date: String,
    pub time: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub success: bool,
    pub appointment_id: String,
    pub calendar_event_link: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.into() }))
}

fn db_error(error: frontdesk_db::repositories::RepositoryError) -> (StatusCode, Json<ApiError>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: error.to_string() }))
}

pub async fn confirm_appointment(
    State(state): State<AppointmentsState>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, (StatusCode, Json<ApiError>)> {
    let patient_id = body.patient_id.trim();
    if patient_id.is_empty() || body.date.trim().is_empty() || body.time.trim().is_empty() {
        return Err(bad_request("patient_id, date, and time are required"));
    }

    let Some(start) = parse_slot(&body.date, &body.time) else {
        return Err(bad_request("date must be YYYY-MM-DD and time must be HH:MM"));
    };

    let patients = SqlPatientRepository::new(state.db_pool.clone());
    let profile = patients
        .find_with_insurance(&PatientId(patient_id.to_string()))
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiError { error: format!("patient {patient_id} not found") }),
            )
        })?;

    let appointments = SqlAppointmentRepository::new(state.db_pool.clone());
    let record = appointments
        .insert(&NewAppointment {
            patient_id: profile.patient.id.clone(),
            appointment_date: body.date.trim().to_string(),
            appointment_time: body.time.trim().to_string(),
            reason: body.reason.clone(),
        })
        .await
        .map_err(db_error)?;

    info!(
        event_name = "appointments.confirmed",
        appointment_id = %record.id,
        patient_id = %profile.patient.id,
        "appointment row committed"
    );

    let calendar_event_link =
        book_calendar_event(&state, &profile, &record.id, start, body.reason.as_deref()).await;

    send_confirmation_sms(&state, &profile, &body.date, &body.time).await;

    Ok(Json(ConfirmResponse {
        success: true,
        appointment_id: record.id.0,
        calendar_event_link,
    }))
}

pub async fn get_patient(
    State(state): State<AppointmentsState>,
    Path(id): Path<String>,
) -> Result<Json<PatientProfile>, (StatusCode, Json<ApiError>)> {
    let patients = SqlPatientRepository::new(state.db_pool.clone());
    let profile = patients
        .find_with_insurance(&PatientId(id.clone()))
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            (StatusCode::NOT_FOUND, Json(ApiError { error: format!("patient {id} not found") }))
        })?;

    Ok(Json(profile))
}

fn parse_slot(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M").ok()?;
    Some(date.and_time(time))
}

async fn book_calendar_event(
    state: &AppointmentsState,
    profile: &PatientProfile,
    appointment_id: &AppointmentId,
    start: NaiveDateTime,
    reason: Option<&str>,
) -> Option<String> {
    let patient_name = profile.patient.name.as_deref().unwrap_or("Patient");
    let event = CalendarEvent {
        summary: format!("Appointment: {patient_name}"),
        description: reason.map(str::to_owned),
        start_date_time: start.format("%Y-%m-%dT%H:%M:%S").to_string(),
        end_date_time: (start + Duration::minutes(APPOINTMENT_MINUTES))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string(),
        time_zone: state.time_zone.clone(),
    };

    match state.calendar.book(&event).await {
        Ok(booked) => {
            if let Some(link) = &booked.html_link {
                let appointments = SqlAppointmentRepository::new(state.db_pool.clone());
                if let Err(error) = appointments.annotate_calendar_link(appointment_id, link).await
                {
                    warn!(
                        event_name = "appointments.calendar_annotation_failed",
                        appointment_id = %appointment_id,
                        error = %error,
                        "calendar link could not be recorded"
                    );
                }
            }
            booked.html_link
        }
        Err(error) => {
            // Best-effort: the confirmation stands, the link is just absent.
            warn!(
                event_name = "appointments.calendar_booking_failed",
                appointment_id = %appointment_id,
                error = %error,
                "calendar booking failed"
            );
            None
        }
    }
}

async fn send_confirmation_sms(
    state: &AppointmentsState,
    profile: &PatientProfile,
    date: &str,
    time: &str,
) {
    let Some(phone) = profile.patient.phone.as_deref() else {
        warn!(
            event_name = "appointments.sms_skipped",
            patient_id = %profile.patient.id,
            "patient has no phone on file"
        );
        return;
    };

    let to = e164(phone);
    let patient_name = profile.patient.name.as_deref().unwrap_or("there");
    let message = format!(
        "Hi {patient_name}, your appointment at {} is confirmed for {date} at {time}. \
         Reply to this message with any questions.",
        state.practice_name
    );

    if let Err(error) = state.sms.send(&to, &message).await {
        warn!(
            event_name = "appointments.sms_failed",
            patient_id = %profile.patient.id,
            error = %error,
            "confirmation sms failed"
        );
    }
}

// Stored phone numbers are bare 10-digit strings; Twilio wants E.164.
fn e164(phone: &str) -> String {
    if phone.starts_with('+') {
        phone.to_string()
    } else if phone.len() == 10 {
        format!("+1{phone}")
    } else {
        format!("+{phone}")
    }
}
