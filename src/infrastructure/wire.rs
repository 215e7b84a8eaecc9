use crate::domain::models::{
    Appointment, AppointmentStatus, AvailabilityBlock, ConflictInterval, ContactDetails,
    PriceFields, validate_day_key,
};
use crate::domain::schedule::AvailabilityMap;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifiers arrive as JSON numbers or strings depending on the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IdRepr {
    Number(i64),
    Text(String),
}

impl IdRepr {
    pub fn from_ref(value: &str) -> Self {
        let value = value.trim();
        match value.parse::<i64>() {
            Ok(number) => Self::Number(number),
            Err(_) => Self::Text(value.to_string()),
        }
    }

    pub fn normalized(&self) -> Option<String> {
        match self {
            Self::Number(number) => Some(number.to_string()),
            Self::Text(text) => Some(text.trim().to_string()).filter(|value| !value.is_empty()),
        }
    }
}

/// Decimal fields are serialized either as numbers or as strings like "40.00".
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NumberRepr {
    Number(f64),
    Text(String),
}

impl NumberRepr {
    fn as_f64(&self, field_name: &str) -> Result<f64, InfraError> {
        match self {
            Self::Number(number) => Ok(*number),
            Self::Text(text) => text.trim().parse::<f64>().map_err(|error| {
                InfraError::InvalidPayload(format!("invalid {field_name} '{text}': {error}"))
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct PricePayload {
    #[serde(default)]
    pub original_price: Option<NumberRepr>,
    #[serde(default)]
    pub final_price: Option<NumberRepr>,
    #[serde(default)]
    pub discount_percentage: Option<NumberRepr>,
    #[serde(default)]
    pub nearby_appointments: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimeBlockPayload {
    #[serde(default)]
    pub id: Option<IdRepr>,
    pub start: String,
    pub end: String,
    #[serde(flatten)]
    pub pricing: PricePayload,
}

pub type AvailabilityPayload = BTreeMap<String, Vec<TimeBlockPayload>>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SaveBlockPayload {
    pub id: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ReferencePayload {
    Id(IdRepr),
    Object(ReferenceObject),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReferenceObject {
    pub id: IdRepr,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<Box<ReferencePayload>>,
}

impl ReferencePayload {
    fn id(&self) -> Option<String> {
        match self {
            Self::Id(id) => id.normalized(),
            Self::Object(object) => object.id.normalized(),
        }
    }

    fn provider_id(&self) -> Option<String> {
        match self {
            Self::Id(_) => None,
            Self::Object(object) => object.provider.as_ref().and_then(|provider| provider.id()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppointmentPayload {
    pub id: IdRepr,
    pub service: ReferencePayload,
    #[serde(default)]
    pub consumer: Option<ReferencePayload>,
    #[serde(default)]
    pub provider: Option<ReferencePayload>,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub pricing: PricePayload,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppointmentRequestPayload {
    pub service: IdRepr,
    pub start_time: String,
    pub end_time: String,
    pub status: AppointmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub client_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
}

/// Body of `PUT appointments/{id}/`. `notes: Some("")` clears the notes.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReschedulePayload {
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusUpdatePayload {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StatusUpdateResponse {
    pub id: IdRepr,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct ConflictAppointmentPayload {
    #[serde(default)]
    id: Option<IdRepr>,
    start_time: String,
    end_time: String,
    #[serde(default)]
    service: Option<ReferencePayload>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    conflict_appointments: Vec<ConflictAppointmentPayload>,
}

pub fn encode_booking_request(
    service_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    status: AppointmentStatus,
    contact: &ContactDetails,
) -> AppointmentRequestPayload {
    AppointmentRequestPayload {
        service: IdRepr::from_ref(service_id),
        start_time: start.to_rfc3339(),
        end_time: end.to_rfc3339(),
        status,
        notes: non_empty(contact.notes.as_deref()),
        client_email: contact.email.trim().to_string(),
        client_phone: non_empty(contact.phone.as_deref()),
        client_address: non_empty(contact.address.as_deref()),
    }
}

pub fn encode_reschedule(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    notes: Option<&str>,
) -> ReschedulePayload {
    ReschedulePayload {
        start_time: start.to_rfc3339(),
        end_time: end.to_rfc3339(),
        notes: notes.map(|notes| notes.trim().to_string()),
    }
}

pub fn encode_availability(availability: &AvailabilityMap) -> BTreeMap<String, Vec<SaveBlockPayload>> {
    availability
        .iter()
        .map(|(day, blocks)| {
            let blocks = blocks
                .iter()
                .map(|block| SaveBlockPayload {
                    id: block.id.clone(),
                    start: block.start.to_rfc3339(),
                    end: block.end.to_rfc3339(),
                })
                .collect();
            (day.clone(), blocks)
        })
        .collect()
}

pub fn decode_availability(
    payload: AvailabilityPayload,
    time_zone: Tz,
) -> Result<AvailabilityMap, InfraError> {
    let mut availability = AvailabilityMap::new();
    for (day, blocks) in payload {
        let day = day.trim().to_string();
        validate_day_key(&day, "availability day").map_err(InfraError::InvalidPayload)?;
        let decoded = blocks
            .into_iter()
            .enumerate()
            .map(|(index, block)| decode_block(&day, index, block, time_zone))
            .collect::<Result<Vec<_>, _>>()?;
        availability.insert(day, decoded);
    }
    Ok(availability)
}

fn decode_block(
    day: &str,
    index: usize,
    payload: TimeBlockPayload,
    time_zone: Tz,
) -> Result<AvailabilityBlock, InfraError> {
    let id = payload
        .id
        .as_ref()
        .and_then(IdRepr::normalized)
        .unwrap_or_else(|| format!("{day}-{index}"));
    let block = AvailabilityBlock {
        id,
        day: day.to_string(),
        start: parse_instant(&payload.start, "block.start", time_zone)?,
        end: parse_instant(&payload.end, "block.end", time_zone)?,
        pricing: decode_pricing(&payload.pricing)?,
    };
    block.validate().map_err(InfraError::InvalidPayload)?;
    Ok(block)
}

pub fn decode_appointment(
    payload: AppointmentPayload,
    time_zone: Tz,
) -> Result<Appointment, InfraError> {
    let id = payload
        .id
        .normalized()
        .ok_or_else(|| InfraError::InvalidPayload("appointment id must not be empty".to_string()))?;
    let service_id = payload.service.id().ok_or_else(|| {
        InfraError::InvalidPayload(format!("appointment {id} has no service id"))
    })?;
    let status = AppointmentStatus::parse(&payload.status).ok_or_else(|| {
        InfraError::InvalidPayload(format!(
            "appointment {id} has unknown status '{}'",
            payload.status
        ))
    })?;
    let provider_ref = payload
        .service
        .provider_id()
        .or_else(|| payload.provider.as_ref().and_then(ReferencePayload::id));
    let created_at = payload
        .created_at
        .as_deref()
        .map(|value| parse_instant(value, "appointment.created_at", time_zone))
        .transpose()?;

    let appointment = Appointment {
        consumer_ref: payload.consumer.as_ref().and_then(ReferencePayload::id),
        provider_ref,
        service_id,
        start: parse_instant(&payload.start_time, "appointment.start_time", time_zone)?,
        end: parse_instant(&payload.end_time, "appointment.end_time", time_zone)?,
        status,
        notes: non_empty(payload.notes.as_deref()),
        created_at,
        pricing: decode_pricing(&payload.pricing)?,
        id,
    };
    appointment.validate().map_err(InfraError::InvalidPayload)?;
    Ok(appointment)
}

pub fn decode_appointments(
    payloads: Vec<AppointmentPayload>,
    time_zone: Tz,
) -> Result<Vec<Appointment>, InfraError> {
    payloads
        .into_iter()
        .map(|payload| decode_appointment(payload, time_zone))
        .collect()
}

pub fn decode_status_update(
    response: &StatusUpdateResponse,
) -> Result<(String, AppointmentStatus), InfraError> {
    let id = response.id.normalized().ok_or_else(|| {
        InfraError::InvalidPayload("status update response has empty id".to_string())
    })?;
    let status = AppointmentStatus::parse(&response.status).ok_or_else(|| {
        InfraError::InvalidPayload(format!(
            "status update response has unknown status '{}'",
            response.status
        ))
    })?;
    Ok((id, status))
}

/// Server-provided `error` message, falling back to the raw body.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error.or(parsed.detail))
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.trim().to_string())
}

/// Conflicting bookings listed in a 409 body, in server order.
pub fn decode_conflicts(body: &str, time_zone: Tz) -> Result<Vec<ConflictInterval>, InfraError> {
    let parsed: ErrorBody = serde_json::from_str(body).map_err(|error| {
        InfraError::InvalidPayload(format!("invalid conflict payload: {error}; body={body}"))
    })?;
    parsed
        .conflict_appointments
        .into_iter()
        .map(|conflict| -> Result<ConflictInterval, InfraError> {
            Ok(ConflictInterval {
                appointment_id: conflict.id.as_ref().and_then(IdRepr::normalized),
                start: parse_instant(&conflict.start_time, "conflict.start_time", time_zone)?,
                end: parse_instant(&conflict.end_time, "conflict.end_time", time_zone)?,
                service: conflict.service.as_ref().and_then(|service| match service {
                    ReferencePayload::Object(object) => object
                        .name
                        .clone()
                        .or_else(|| object.id.normalized()),
                    ReferencePayload::Id(id) => id.normalized(),
                }),
            })
        })
        .collect()
}

fn decode_pricing(payload: &PricePayload) -> Result<Option<PriceFields>, InfraError> {
    let Some(original_price) = payload.original_price.as_ref() else {
        return Ok(None);
    };
    Ok(Some(PriceFields {
        original_price: original_price.as_f64("original_price")?,
        final_price: payload
            .final_price
            .as_ref()
            .map(|value| value.as_f64("final_price"))
            .transpose()?,
        discount_percentage: payload
            .discount_percentage
            .as_ref()
            .map(|value| value.as_f64("discount_percentage"))
            .transpose()?,
        nearby_appointments: payload.nearby_appointments,
    }))
}

/// RFC 3339 instants pass through; offset-less timestamps are read as
/// provider-local wall time.
fn parse_instant(value: &str, field_name: &str, time_zone: Tz) -> Result<DateTime<Utc>, InfraError> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        .map_err(|error| {
            InfraError::InvalidPayload(format!("invalid {field_name} '{value}': {error}"))
        })?;
    time_zone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            InfraError::InvalidPayload(format!(
                "{field_name} '{value}' does not exist in {time_zone}"
            ))
        })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
