use crate::application::errors::BookingError;
use crate::domain::models::{
    Appointment, AppointmentStatus, BookableSlot, ContactDetails, SessionContext,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::marketplace_client::{
    BookingRequest, MarketplaceClient, RescheduleRequest,
};
use chrono::{DateTime, Utc};
use crate::infrastructure::schedule_store::ScheduleStore;
use std::sync::Arc;

/// Pessimistic booking: the store only learns about a new, moved or deleted
/// appointment once the server has accepted the change.
pub struct BookingService<C>
where
    C: MarketplaceClient,
{
    client: Arc<C>,
    store: Arc<ScheduleStore>,
    initial_status: AppointmentStatus,
}

impl<C> BookingService<C>
where
    C: MarketplaceClient,
{
    pub fn new(client: Arc<C>, store: Arc<ScheduleStore>) -> Self {
        Self {
            client,
            store,
            initial_status: AppointmentStatus::Pending,
        }
    }

    pub fn with_initial_status(mut self, initial_status: AppointmentStatus) -> Self {
        self.initial_status = initial_status;
        self
    }

    pub async fn book(
        &self,
        session: &SessionContext,
        service_id: &str,
        slot: &BookableSlot,
        contact: &ContactDetails,
    ) -> Result<Appointment, BookingError> {
        let service_id = service_id.trim();
        if service_id.is_empty() {
            return Err(BookingError::Validation(
                "service id must not be empty".to_string(),
            ));
        }
        contact.validate().map_err(BookingError::Validation)?;
        if slot.start >= slot.end {
            return Err(BookingError::Validation(
                "slot end must be after slot start".to_string(),
            ));
        }

        let request = BookingRequest {
            service_id: service_id.to_string(),
            start: slot.start,
            end: slot.end,
            status: self.initial_status,
            contact: contact.clone(),
        };

        match self.client.create_appointment(session, &request).await {
            Ok(appointment) => {
                self.store.upsert_appointment(appointment.clone())?;
                tracing::info!(
                    appointment_id = %appointment.id,
                    service_id,
                    start = %appointment.start,
                    status = %appointment.status,
                    "appointment booked"
                );
                Ok(appointment)
            }
            Err(InfraError::Conflict { conflicts, message }) => {
                tracing::warn!(
                    service_id,
                    start = %slot.start,
                    end = %slot.end,
                    conflicts = conflicts.len(),
                    %message,
                    "booking rejected by server conflict check"
                );
                Err(BookingError::Conflict { conflicts })
            }
            Err(error) => {
                tracing::warn!(service_id, %error, "booking failed");
                Err(BookingError::Remote(error))
            }
        }
    }

    /// Moves an appointment to `[start, end)`. References the server leaves
    /// out of its answer are kept from the stored copy.
    pub async fn reschedule(
        &self,
        session: &SessionContext,
        appointment_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        let appointment_id = appointment_id.trim();
        if appointment_id.is_empty() {
            return Err(BookingError::Validation(
                "appointment id must not be empty".to_string(),
            ));
        }
        if start >= end {
            return Err(BookingError::Validation(
                "end time must be after start time".to_string(),
            ));
        }

        let request = RescheduleRequest {
            start,
            end,
            notes: notes.map(str::to_string),
        };
        match self
            .client
            .reschedule_appointment(session, appointment_id, &request)
            .await
        {
            Ok(mut appointment) => {
                if let Some(stored) = self.store.appointment(appointment_id)? {
                    appointment.consumer_ref = appointment.consumer_ref.or(stored.consumer_ref);
                    appointment.provider_ref = appointment.provider_ref.or(stored.provider_ref);
                    appointment.created_at = appointment.created_at.or(stored.created_at);
                    appointment.pricing = appointment.pricing.or(stored.pricing);
                }
                self.store.upsert_appointment(appointment.clone())?;
                tracing::info!(
                    appointment_id,
                    start = %appointment.start,
                    end = %appointment.end,
                    "appointment rescheduled"
                );
                Ok(appointment)
            }
            Err(InfraError::Conflict { conflicts, message }) => {
                tracing::warn!(
                    appointment_id,
                    start = %start,
                    end = %end,
                    conflicts = conflicts.len(),
                    %message,
                    "reschedule rejected by server conflict check"
                );
                Err(BookingError::Conflict { conflicts })
            }
            Err(error) => {
                tracing::warn!(appointment_id, %error, "reschedule failed");
                Err(BookingError::Remote(error))
            }
        }
    }

    pub async fn delete(
        &self,
        session: &SessionContext,
        appointment_id: &str,
    ) -> Result<(), BookingError> {
        let appointment_id = appointment_id.trim();
        if appointment_id.is_empty() {
            return Err(BookingError::Validation(
                "appointment id must not be empty".to_string(),
            ));
        }

        match self.client.delete_appointment(session, appointment_id).await {
            Ok(()) => {
                self.store.remove_appointment(appointment_id)?;
                tracing::info!(appointment_id, "appointment deleted");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(appointment_id, %error, "deleting appointment failed");
                Err(BookingError::Remote(error))
            }
        }
    }
}
