use crate::domain::models::{
    Appointment, AppointmentStatus, ContactDetails, SessionContext,
};
use crate::domain::schedule::AvailabilityMap;
use crate::infrastructure::config::SchedulingConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::wire::{
    self, AppointmentPayload, AvailabilityPayload, StatusUpdatePayload, StatusUpdateResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationParams {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_miles: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub service_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub contact: ContactDetails,
}

/// New times for an existing appointment. `notes: None` leaves the notes alone.
#[derive(Debug, Clone, PartialEq)]
pub struct RescheduleRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub notes: Option<String>,
}

#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    async fn provider_availability(
        &self,
        session: &SessionContext,
        provider_id: &str,
    ) -> Result<AvailabilityMap, InfraError>;

    async fn service_availability(
        &self,
        session: &SessionContext,
        service_id: &str,
        location: Option<LocationParams>,
    ) -> Result<AvailabilityMap, InfraError>;

    /// Replaces the provider's whole availability and returns what the server kept.
    async fn save_availability(
        &self,
        session: &SessionContext,
        provider_id: &str,
        availability: &AvailabilityMap,
    ) -> Result<AvailabilityMap, InfraError>;

    async fn list_appointments(
        &self,
        session: &SessionContext,
    ) -> Result<Vec<Appointment>, InfraError>;

    async fn create_appointment(
        &self,
        session: &SessionContext,
        request: &BookingRequest,
    ) -> Result<Appointment, InfraError>;

    /// Returns the status the server reports after the update.
    async fn update_appointment_status(
        &self,
        session: &SessionContext,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<AppointmentStatus, InfraError>;

    /// Moves an appointment; the server answers 409 when the new times clash.
    async fn reschedule_appointment(
        &self,
        session: &SessionContext,
        appointment_id: &str,
        request: &RescheduleRequest,
    ) -> Result<Appointment, InfraError>;

    async fn delete_appointment(
        &self,
        session: &SessionContext,
        appointment_id: &str,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestMarketplaceClient {
    client: Client,
    base_url: Url,
    time_zone: Tz,
}

impl ReqwestMarketplaceClient {
    pub fn new(base_url: Url, time_zone: Tz) -> Self {
        Self {
            client: Client::new(),
            base_url,
            time_zone,
        }
    }

    pub fn from_config(config: &SchedulingConfig) -> Result<Self, InfraError> {
        Self::new(config.api_base_url.clone(), config.time_zone).with_timeout(config.request_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, InfraError> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))?;
        Ok(self)
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidPayload(format!("{field} must not be empty")));
        }
        Ok(())
    }

    /// `base/<segments>/` with the trailing slash the API routes expect.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("marketplace api base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment.trim());
            }
            path.push("");
        }
        Ok(url)
    }

    fn authorize(request: RequestBuilder, session: &SessionContext) -> RequestBuilder {
        match session.auth_token() {
            Some(token) => request.header(AUTHORIZATION, format!("Token {token}")),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        session: &SessionContext,
        action: &str,
    ) -> Result<(StatusCode, String), InfraError> {
        let response = Self::authorize(request, session)
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading response while {action}: {error}")))?;

        tracing::debug!(action, status = status.as_u16(), "marketplace api response");
        Ok((status, body))
    }

    fn http_error(status: StatusCode, body: &str) -> InfraError {
        let message = wire::error_message(body);
        let message = if message.is_empty() {
            format!("http {}", status.as_u16())
        } else {
            message
        };
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => InfraError::Unauthorized {
                status: status.as_u16(),
                message,
            },
            _ => InfraError::Http {
                status: status.as_u16(),
                message,
            },
        }
    }

    fn conflict_error(&self, body: &str) -> InfraError {
        let conflicts = wire::decode_conflicts(body, self.time_zone).unwrap_or_else(|error| {
            tracing::warn!(%error, "conflict response without readable intervals");
            Vec::new()
        });
        InfraError::Conflict {
            conflicts,
            message: wire::error_message(body),
        }
    }

    fn parse_body<T: DeserializeOwned>(body: &str, what: &str) -> Result<T, InfraError> {
        serde_json::from_str(body).map_err(|error| {
            InfraError::InvalidPayload(format!("invalid {what} payload: {error}; body={body}"))
        })
    }

    async fn fetch_availability(
        &self,
        session: &SessionContext,
        request: RequestBuilder,
        action: &str,
    ) -> Result<AvailabilityMap, InfraError> {
        let (status, body) = self.send(request, session, action).await?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        let payload: AvailabilityPayload = Self::parse_body(&body, "availability")?;
        wire::decode_availability(payload, self.time_zone)
    }
}

#[async_trait]
impl MarketplaceClient for ReqwestMarketplaceClient {
    async fn provider_availability(
        &self,
        session: &SessionContext,
        provider_id: &str,
    ) -> Result<AvailabilityMap, InfraError> {
        Self::ensure_non_empty(provider_id, "provider id")?;

        let endpoint = self.endpoint(&["providers", provider_id, "availability"])?;
        self.fetch_availability(
            session,
            self.client.get(endpoint),
            "loading provider availability",
        )
        .await
    }

    async fn service_availability(
        &self,
        session: &SessionContext,
        service_id: &str,
        location: Option<LocationParams>,
    ) -> Result<AvailabilityMap, InfraError> {
        Self::ensure_non_empty(service_id, "service id")?;

        let endpoint = self.endpoint(&["services", service_id, "availability"])?;
        let mut request = self.client.get(endpoint);
        if let Some(location) = location {
            request = request.query(&[
                ("lat", location.latitude.to_string()),
                ("lng", location.longitude.to_string()),
            ]);
            if let Some(radius) = location.radius_miles {
                request = request.query(&[("radius", radius.to_string())]);
            }
        }
        self.fetch_availability(session, request, "loading service availability")
            .await
    }

    async fn save_availability(
        &self,
        session: &SessionContext,
        provider_id: &str,
        availability: &AvailabilityMap,
    ) -> Result<AvailabilityMap, InfraError> {
        Self::ensure_non_empty(provider_id, "provider id")?;

        let endpoint = self.endpoint(&["providers", provider_id, "availability"])?;
        let request = self
            .client
            .post(endpoint)
            .json(&wire::encode_availability(availability));
        self.fetch_availability(session, request, "saving provider availability")
            .await
    }

    async fn list_appointments(
        &self,
        session: &SessionContext,
    ) -> Result<Vec<Appointment>, InfraError> {
        let endpoint = self.endpoint(&["appointments"])?;
        let (status, body) = self
            .send(self.client.get(endpoint), session, "listing appointments")
            .await?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        let payloads: Vec<AppointmentPayload> = Self::parse_body(&body, "appointment list")?;
        wire::decode_appointments(payloads, self.time_zone)
    }

    async fn create_appointment(
        &self,
        session: &SessionContext,
        request: &BookingRequest,
    ) -> Result<Appointment, InfraError> {
        Self::ensure_non_empty(&request.service_id, "service id")?;

        let endpoint = self.endpoint(&["appointments"])?;
        let payload = wire::encode_booking_request(
            &request.service_id,
            request.start,
            request.end,
            request.status,
            &request.contact,
        );
        let (status, body) = self
            .send(
                self.client.post(endpoint).json(&payload),
                session,
                "creating appointment",
            )
            .await?;

        if status == StatusCode::CONFLICT {
            return Err(self.conflict_error(&body));
        }
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let payload: AppointmentPayload = Self::parse_body(&body, "appointment create")?;
        wire::decode_appointment(payload, self.time_zone)
    }

    async fn update_appointment_status(
        &self,
        session: &SessionContext,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<AppointmentStatus, InfraError> {
        Self::ensure_non_empty(appointment_id, "appointment id")?;

        let endpoint = self.endpoint(&["appointments", appointment_id, "status"])?;
        let (http_status, body) = self
            .send(
                self.client
                    .patch(endpoint)
                    .json(&StatusUpdatePayload { status }),
                session,
                "updating appointment status",
            )
            .await?;
        if !http_status.is_success() {
            return Err(Self::http_error(http_status, &body));
        }

        let response: StatusUpdateResponse = Self::parse_body(&body, "status update")?;
        let (echoed_id, echoed_status) = wire::decode_status_update(&response)?;
        if echoed_id != appointment_id.trim() {
            return Err(InfraError::InvalidPayload(format!(
                "status update for {appointment_id} answered for {echoed_id}"
            )));
        }
        Ok(echoed_status)
    }

    async fn reschedule_appointment(
        &self,
        session: &SessionContext,
        appointment_id: &str,
        request: &RescheduleRequest,
    ) -> Result<Appointment, InfraError> {
        Self::ensure_non_empty(appointment_id, "appointment id")?;

        let endpoint = self.endpoint(&["appointments", appointment_id])?;
        let payload = wire::encode_reschedule(request.start, request.end, request.notes.as_deref());
        let (status, body) = self
            .send(
                self.client.put(endpoint).json(&payload),
                session,
                "rescheduling appointment",
            )
            .await?;

        if status == StatusCode::CONFLICT {
            return Err(self.conflict_error(&body));
        }
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let payload: AppointmentPayload = Self::parse_body(&body, "appointment update")?;
        let appointment = wire::decode_appointment(payload, self.time_zone)?;
        if appointment.id != appointment_id.trim() {
            return Err(InfraError::InvalidPayload(format!(
                "reschedule of {appointment_id} answered for {}",
                appointment.id
            )));
        }
        Ok(appointment)
    }

    async fn delete_appointment(
        &self,
        session: &SessionContext,
        appointment_id: &str,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(appointment_id, "appointment id")?;

        let endpoint = self.endpoint(&["appointments", appointment_id])?;
        let (status, body) = self
            .send(self.client.delete(endpoint), session, "deleting appointment")
            .await?;
        // The body of a successful delete carries nothing we use.
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        Ok(())
    }
}
