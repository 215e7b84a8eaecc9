use crate::domain::models::{Appointment, AppointmentStatus, AvailabilityBlock, SessionContext};
use crate::domain::schedule::AvailabilityMap;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::marketplace_client::{
    BookingRequest, LocationParams, MarketplaceClient, RescheduleRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

type Scripted<T> = Mutex<VecDeque<(StdDuration, Result<T, InfraError>)>>;

/// Scripted marketplace: each call pops the next queued response (after its
/// delay) or falls back to an empty success.
#[derive(Default)]
pub struct FakeMarketplaceClient {
    availability: Scripted<AvailabilityMap>,
    saves: Scripted<AvailabilityMap>,
    appointments: Scripted<Vec<Appointment>>,
    creates: Scripted<Appointment>,
    status_updates: Scripted<AppointmentStatus>,
    reschedules: Scripted<Appointment>,
    deletes: Scripted<()>,
    calls: Mutex<Vec<String>>,
    booking_requests: Mutex<Vec<BookingRequest>>,
}

impl FakeMarketplaceClient {
    pub fn push_availability(&self, result: Result<AvailabilityMap, InfraError>) {
        self.push_availability_after(StdDuration::ZERO, result);
    }

    pub fn push_availability_after(
        &self,
        delay: StdDuration,
        result: Result<AvailabilityMap, InfraError>,
    ) {
        push(&self.availability, delay, result);
    }

    pub fn push_save(&self, result: Result<AvailabilityMap, InfraError>) {
        push(&self.saves, StdDuration::ZERO, result);
    }

    pub fn push_appointments(&self, result: Result<Vec<Appointment>, InfraError>) {
        self.push_appointments_after(StdDuration::ZERO, result);
    }

    pub fn push_appointments_after(
        &self,
        delay: StdDuration,
        result: Result<Vec<Appointment>, InfraError>,
    ) {
        push(&self.appointments, delay, result);
    }

    pub fn push_create(&self, result: Result<Appointment, InfraError>) {
        push(&self.creates, StdDuration::ZERO, result);
    }

    pub fn push_status_update(&self, result: Result<AppointmentStatus, InfraError>) {
        push(&self.status_updates, StdDuration::ZERO, result);
    }

    pub fn push_reschedule(&self, result: Result<Appointment, InfraError>) {
        push(&self.reschedules, StdDuration::ZERO, result);
    }

    pub fn push_delete(&self, result: Result<(), InfraError>) {
        push(&self.deletes, StdDuration::ZERO, result);
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().expect("call log lock poisoned").clone()
    }

    pub fn calls(&self, name: &str) -> usize {
        self.call_log().iter().filter(|call| call.as_str() == name).count()
    }

    pub fn booking_requests(&self) -> Vec<BookingRequest> {
        self.booking_requests
            .lock()
            .expect("booking request lock poisoned")
            .clone()
    }

    fn record(&self, name: &str) {
        self.calls
            .lock()
            .expect("call log lock poisoned")
            .push(name.to_string());
    }
}

fn push<T>(queue: &Scripted<T>, delay: StdDuration, result: Result<T, InfraError>) {
    queue
        .lock()
        .expect("script lock poisoned")
        .push_back((delay, result));
}

async fn next<T>(queue: &Scripted<T>, fallback: impl FnOnce() -> Result<T, InfraError>) -> Result<T, InfraError> {
    let scripted = queue.lock().expect("script lock poisoned").pop_front();
    match scripted {
        Some((delay, result)) => {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        None => fallback(),
    }
}

#[async_trait]
impl MarketplaceClient for FakeMarketplaceClient {
    async fn provider_availability(
        &self,
        _session: &SessionContext,
        _provider_id: &str,
    ) -> Result<AvailabilityMap, InfraError> {
        self.record("availability");
        next(&self.availability, || Ok(AvailabilityMap::new())).await
    }

    async fn service_availability(
        &self,
        _session: &SessionContext,
        _service_id: &str,
        _location: Option<LocationParams>,
    ) -> Result<AvailabilityMap, InfraError> {
        self.record("availability");
        next(&self.availability, || Ok(AvailabilityMap::new())).await
    }

    async fn save_availability(
        &self,
        _session: &SessionContext,
        _provider_id: &str,
        availability: &AvailabilityMap,
    ) -> Result<AvailabilityMap, InfraError> {
        self.record("save_availability");
        let echo = availability.clone();
        next(&self.saves, || Ok(echo)).await
    }

    async fn list_appointments(
        &self,
        _session: &SessionContext,
    ) -> Result<Vec<Appointment>, InfraError> {
        self.record("appointments");
        next(&self.appointments, || Ok(Vec::new())).await
    }

    async fn create_appointment(
        &self,
        _session: &SessionContext,
        request: &BookingRequest,
    ) -> Result<Appointment, InfraError> {
        self.record("create_appointment");
        self.booking_requests
            .lock()
            .expect("booking request lock poisoned")
            .push(request.clone());
        let request = request.clone();
        next(&self.creates, move || {
            Ok(Appointment {
                id: "created-1".to_string(),
                service_id: request.service_id,
                consumer_ref: None,
                provider_ref: None,
                start: request.start,
                end: request.end,
                status: request.status,
                notes: request.contact.notes,
                created_at: None,
                pricing: None,
            })
        })
        .await
    }

    async fn update_appointment_status(
        &self,
        _session: &SessionContext,
        _appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<AppointmentStatus, InfraError> {
        self.record("update_status");
        next(&self.status_updates, move || Ok(status)).await
    }

    async fn reschedule_appointment(
        &self,
        _session: &SessionContext,
        appointment_id: &str,
        request: &RescheduleRequest,
    ) -> Result<Appointment, InfraError> {
        self.record("reschedule");
        let id = appointment_id.to_string();
        let request = request.clone();
        next(&self.reschedules, move || {
            Ok(Appointment {
                id,
                service_id: "7".to_string(),
                consumer_ref: None,
                provider_ref: None,
                start: request.start,
                end: request.end,
                status: AppointmentStatus::Confirmed,
                notes: request.notes,
                created_at: None,
                pricing: None,
            })
        })
        .await
    }

    async fn delete_appointment(
        &self,
        _session: &SessionContext,
        _appointment_id: &str,
    ) -> Result<(), InfraError> {
        self.record("delete_appointment");
        next(&self.deletes, || Ok(())).await
    }
}

pub fn fixed_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid datetime")
        .with_timezone(&Utc)
}

pub fn block(id: &str, day: &str, start: &str, end: &str) -> AvailabilityBlock {
    AvailabilityBlock {
        id: id.to_string(),
        day: day.to_string(),
        start: fixed_time(start),
        end: fixed_time(end),
        pricing: None,
    }
}

pub fn appointment(id: &str, start: &str, minutes: i64, status: AppointmentStatus) -> Appointment {
    let start = fixed_time(start);
    Appointment {
        id: id.to_string(),
        service_id: "7".to_string(),
        consumer_ref: Some("11".to_string()),
        provider_ref: Some("3".to_string()),
        start,
        end: start + Duration::minutes(minutes),
        status,
        notes: None,
        created_at: None,
        pricing: None,
    }
}

pub fn network_error() -> InfraError {
    InfraError::Network("network error while listing appointments: connection reset".to_string())
}
