use crate::application::booking::BookingService;
use crate::application::errors::{BookingError, TransitionError, ViewError};
use crate::application::status_transition::StatusTransitionService;
use crate::application::sync_coordinator::{
    Invalidation, InvalidationBus, RefreshReport, ScheduleEvent, SyncCoordinator, ViewId,
    ViewScope,
};
use crate::domain::models::{
    ActorRole, Appointment, AppointmentStatus, AvailabilityBlock, BookableSlot, ContactDetails,
    SessionContext, day_key_of,
};
use crate::domain::projection::{DayProjection, partition_slots, project};
use crate::domain::schedule::{AvailabilityMap, ReplaceMode, ScheduleError};
use crate::infrastructure::config::{
    SchedulingConfig, ensure_default_config, load_config_with_env,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::marketplace_client::{MarketplaceClient, ReqwestMarketplaceClient};
use crate::infrastructure::schedule_store::ScheduleStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};

/// One mounted calendar: its own store and coordinator, acting for one session.
pub struct SchedulingView<C>
where
    C: MarketplaceClient + 'static,
{
    id: ViewId,
    session: SessionContext,
    buffer_minutes: u32,
    days_to_show: u32,
    client: Arc<C>,
    store: Arc<ScheduleStore>,
    coordinator: SyncCoordinator<C>,
    booking: BookingService<C>,
    transitions: StatusTransitionService<C>,
    bus: Option<InvalidationBus>,
    followers: Mutex<Vec<AbortHandle>>,
}

impl SchedulingView<ReqwestMarketplaceClient> {
    /// Reads (or creates) `scheduling.json` under `config_dir`, applies
    /// `SLOTSYNC_*` overrides and connects to the configured API.
    pub fn open(
        config_dir: &Path,
        scope: ViewScope,
        session: SessionContext,
    ) -> Result<Self, InfraError> {
        ensure_default_config(config_dir)?;
        let config = load_config_with_env(config_dir)?;
        let client = Arc::new(ReqwestMarketplaceClient::from_config(&config)?);
        Ok(Self::new(client, scope, session, &config))
    }
}

impl<C> SchedulingView<C>
where
    C: MarketplaceClient + 'static,
{
    pub fn new(
        client: Arc<C>,
        scope: ViewScope,
        session: SessionContext,
        config: &SchedulingConfig,
    ) -> Self {
        let store = Arc::new(ScheduleStore::new(config.time_zone));
        let coordinator = SyncCoordinator::with_retry_policy(
            Arc::clone(&client),
            Arc::clone(&store),
            scope,
            config.retry.clone(),
        );
        let booking = BookingService::new(Arc::clone(&client), Arc::clone(&store))
            .with_initial_status(config.initial_booking_status);
        let transitions = StatusTransitionService::new(Arc::clone(&client), Arc::clone(&store));

        Self {
            id: ViewId::next(),
            session,
            buffer_minutes: config.buffer_minutes,
            days_to_show: config.days_to_show,
            client,
            store,
            coordinator,
            booking,
            transitions,
            bus: None,
            followers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_bus(mut self, bus: InvalidationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn store(&self) -> Arc<ScheduleStore> {
        Arc::clone(&self.store)
    }

    pub fn coordinator(&self) -> &SyncCoordinator<C> {
        &self.coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleEvent> {
        self.coordinator.subscribe()
    }

    pub async fn refresh(&self, force: bool) -> Result<RefreshReport, ScheduleError> {
        self.coordinator.refresh(&self.session, force).await
    }

    /// Starts refreshing this view on invalidations from sibling views.
    /// `None` when the view was built without a bus. The task is aborted when
    /// the view is dropped.
    pub fn follow(&self) -> Option<JoinHandle<()>> {
        let bus = self.bus.as_ref()?;
        let handle = self.coordinator.follow(bus, self.id, self.session.clone());
        match self.followers.lock() {
            Ok(mut followers) => followers.push(handle.abort_handle()),
            Err(poisoned) => poisoned.into_inner().push(handle.abort_handle()),
        }
        Some(handle)
    }

    pub fn projection(&self, day: &str) -> Result<DayProjection, ScheduleError> {
        let schedule = self.store.projection_input(day, self.buffer_minutes)?;
        Ok(project(
            day,
            &schedule.blocks,
            &schedule.appointments,
            self.buffer_minutes,
        ))
    }

    pub fn projections(&self, from: NaiveDate, days: u32) -> Result<Vec<DayProjection>, ScheduleError> {
        day_range(from, days)
            .iter()
            .map(|day| self.projection(day))
            .collect()
    }

    /// The configured window of days starting at `today`.
    pub fn visible_days(&self, today: NaiveDate) -> Vec<String> {
        day_range(today, self.days_to_show)
    }

    /// Free time of `day` cut into service-length candidates.
    pub fn bookable_slots(
        &self,
        day: &str,
        service_duration_minutes: u32,
    ) -> Result<Vec<BookableSlot>, ScheduleError> {
        let projection = self.projection(day)?;
        Ok(partition_slots(
            &projection.slots,
            service_duration_minutes,
            self.buffer_minutes,
        ))
    }

    pub fn add_block(
        &self,
        day: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AvailabilityBlock, ViewError> {
        self.ensure_provider("editing availability")?;
        let block = self.store.add_block(day, start, end)?;
        self.coordinator.notify(ScheduleEvent::AvailabilityEdited {
            day: block.day.clone(),
        });
        Ok(block)
    }

    pub fn remove_block(&self, day: &str, block_id: &str) -> Result<bool, ViewError> {
        self.ensure_provider("editing availability")?;
        let removed = self.store.remove_block(day, block_id)?;
        if removed {
            self.coordinator.notify(ScheduleEvent::AvailabilityEdited {
                day: day.trim().to_string(),
            });
        }
        Ok(removed)
    }

    /// Sends the whole local availability; the server replaces everything it
    /// had for this provider and echoes the result back.
    pub async fn save_availability(&self) -> Result<AvailabilityMap, ViewError> {
        let ViewScope::Provider { provider_id } = self.coordinator.scope() else {
            return Err(ViewError::ProviderOnly("saving availability"));
        };
        self.ensure_provider("saving availability")?;

        let payload = self.store.availability_payload()?;
        let result = self
            .client
            .save_availability(&self.session, provider_id, &payload)
            .await;
        let saved = match result {
            Ok(saved) => {
                self.store.replace_all(saved.clone(), ReplaceMode::Full)?;
                tracing::info!(
                    provider_id = %provider_id,
                    days = saved.len(),
                    "availability saved"
                );
                Ok(saved)
            }
            Err(error) => {
                tracing::warn!(provider_id = %provider_id, %error, "saving availability failed");
                Err(ViewError::Remote(error))
            }
        };
        self.reconcile("availability saved").await;
        saved
    }

    pub async fn book(
        &self,
        service_id: &str,
        slot: &BookableSlot,
        contact: &ContactDetails,
    ) -> Result<Appointment, BookingError> {
        let result = self
            .booking
            .book(&self.session, service_id, slot, contact)
            .await;
        match &result {
            Err(BookingError::Validation(_)) => {}
            Ok(appointment) => {
                self.coordinator.notify(ScheduleEvent::AppointmentChanged {
                    appointment_id: appointment.id.clone(),
                    status: appointment.status,
                });
                self.reconcile("appointment booked").await;
            }
            Err(_) => self.reconcile("booking attempt").await,
        }
        result
    }

    pub async fn transition(
        &self,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<Appointment, TransitionError> {
        let result = self
            .transitions
            .transition(&self.session, appointment_id, status)
            .await;
        match &result {
            Ok(appointment) => {
                self.coordinator.notify(ScheduleEvent::AppointmentChanged {
                    appointment_id: appointment.id.clone(),
                    status: appointment.status,
                });
                self.reconcile("appointment status changed").await;
            }
            Err(TransitionError::Remote(_)) => {
                self.reconcile("appointment status change failed").await
            }
            Err(_) => {}
        }
        result
    }

    /// Moves an appointment. Like booking, the store changes only once the
    /// server accepts; a clash comes back as `BookingError::Conflict`.
    pub async fn reschedule(
        &self,
        appointment_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        let result = self
            .booking
            .reschedule(&self.session, appointment_id, start, end, notes)
            .await;
        match &result {
            Err(BookingError::Validation(_)) => {}
            Ok(appointment) => {
                self.coordinator.notify(ScheduleEvent::AppointmentChanged {
                    appointment_id: appointment.id.clone(),
                    status: appointment.status,
                });
                self.reconcile("appointment rescheduled").await;
            }
            Err(_) => self.reconcile("reschedule attempt").await,
        }
        result
    }

    pub async fn delete_appointment(&self, appointment_id: &str) -> Result<(), BookingError> {
        let result = self.booking.delete(&self.session, appointment_id).await;
        match &result {
            Err(BookingError::Validation(_)) => {}
            Ok(()) => self.reconcile("appointment deleted").await,
            Err(_) => self.reconcile("delete attempt").await,
        }
        result
    }

    fn ensure_provider(&self, action: &'static str) -> Result<(), ViewError> {
        if self.coordinator.scope().is_provider() && self.session.role == ActorRole::Provider {
            Ok(())
        } else {
            Err(ViewError::ProviderOnly(action))
        }
    }

    /// Forced refresh of this view, then a notice to every sibling view.
    async fn reconcile(&self, reason: &str) {
        match self.coordinator.refresh(&self.session, true).await {
            Ok(report) if report.has_failures() => tracing::warn!(
                view = self.id.value(),
                reason,
                ?report,
                "refresh after mutation was incomplete"
            ),
            Ok(_) => {}
            Err(error) => tracing::warn!(view = self.id.value(), reason, %error, "refresh after mutation failed"),
        }
        if let Some(bus) = &self.bus {
            let receivers = bus.publish(Invalidation {
                origin: Some(self.id),
                reason: reason.to_string(),
            });
            tracing::debug!(view = self.id.value(), reason, receivers, "invalidation published");
        }
    }
}

impl<C> Drop for SchedulingView<C>
where
    C: MarketplaceClient + 'static,
{
    fn drop(&mut self) {
        let followers = match self.followers.get_mut() {
            Ok(followers) => followers,
            Err(poisoned) => poisoned.into_inner(),
        };
        for follower in followers.drain(..) {
            follower.abort();
        }
    }
}

fn day_range(from: NaiveDate, days: u32) -> Vec<String> {
    (0..i64::from(days))
        .map(|offset| day_key_of(from + Duration::days(offset)))
        .collect()
}
