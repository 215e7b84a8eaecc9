use crate::domain::models::{Appointment, AppointmentStatus, SessionContext};
use crate::domain::schedule::{AvailabilityMap, ReplaceMode, ScheduleError};
use crate::infrastructure::config::RetryPolicy;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::marketplace_client::{LocationParams, MarketplaceClient};
use crate::infrastructure::schedule_store::ScheduleStore;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const INVALIDATION_CHANNEL_CAPACITY: usize = 32;

static NEXT_VIEW_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(u64);

impl ViewId {
    pub fn next() -> Self {
        Self(NEXT_VIEW_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewScope {
    Provider {
        provider_id: String,
    },
    Consumer {
        service_id: String,
        location: Option<LocationParams>,
    },
}

impl ViewScope {
    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }

    /// The appointment list endpoint already filters by role; a provider view
    /// additionally drops bookings that name a different provider.
    fn keep(&self, appointment: &Appointment) -> bool {
        match self {
            Self::Provider { provider_id } => appointment
                .provider_ref
                .as_deref()
                .is_none_or(|provider| provider == provider_id),
            Self::Consumer { .. } => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Already fresh, nothing fetched.
    Skipped,
    Loaded { items: usize },
    Failed { status: Option<u16>, message: String },
    /// Superseded by a newer refresh; the result was dropped.
    Stale,
    /// Local availability edits are waiting to be saved, so server
    /// availability was left out until they are.
    Deferred,
}

impl FetchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub generation: u64,
    pub appointments: FetchOutcome,
    pub availability: FetchOutcome,
}

impl RefreshReport {
    pub fn has_failures(&self) -> bool {
        self.appointments.is_failed() || self.availability.is_failed()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleEvent {
    AppointmentsReplaced { generation: u64, count: usize },
    AvailabilityReplaced { generation: u64, days: usize },
    AvailabilityEdited { day: String },
    AppointmentChanged {
        appointment_id: String,
        status: AppointmentStatus,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invalidation {
    pub origin: Option<ViewId>,
    pub reason: String,
}

/// Fan-out of "schedule changed remotely" notices between mounted views.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<Invalidation>,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Returns how many views received the notice.
    pub fn publish(&self, invalidation: Invalidation) -> usize {
        self.sender.send(invalidation).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Appointments,
    Availability,
}

impl Resource {
    fn as_str(self) -> &'static str {
        match self {
            Self::Appointments => "appointments",
            Self::Availability => "availability",
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct InFlight {
    generation: u64,
    task: SharedFetch,
}

#[derive(Default)]
struct CoordinatorState {
    generation: u64,
    appointments_fresh: bool,
    availability_fresh: bool,
    appointments_in_flight: Option<InFlight>,
    availability_in_flight: Option<InFlight>,
}

impl CoordinatorState {
    fn is_fresh(&self, resource: Resource) -> bool {
        match resource {
            Resource::Appointments => self.appointments_fresh,
            Resource::Availability => self.availability_fresh,
        }
    }

    fn mark_fresh(&mut self, resource: Resource) {
        match resource {
            Resource::Appointments => self.appointments_fresh = true,
            Resource::Availability => self.availability_fresh = true,
        }
    }

    fn in_flight(&mut self, resource: Resource) -> &mut Option<InFlight> {
        match resource {
            Resource::Appointments => &mut self.appointments_in_flight,
            Resource::Availability => &mut self.availability_in_flight,
        }
    }
}

struct CoordinatorInner<C>
where
    C: MarketplaceClient + 'static,
{
    client: Arc<C>,
    store: Arc<ScheduleStore>,
    scope: ViewScope,
    retry_policy: RetryPolicy,
    state: Mutex<CoordinatorState>,
    events: broadcast::Sender<ScheduleEvent>,
}

impl<C> CoordinatorInner<C>
where
    C: MarketplaceClient + 'static,
{
    fn lock(&self) -> Result<MutexGuard<'_, CoordinatorState>, ScheduleError> {
        self.state
            .lock()
            .map_err(|error| ScheduleError::LockPoisoned(format!("sync state: {error}")))
    }

    async fn with_retry<T, F, Fut>(&self, resource: Resource, mut operation: F) -> Result<T, InfraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.retry_policy.delay_for(attempt);
                    tracing::debug!(
                        resource = resource.as_str(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "retrying fetch"
                    );
                    sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn fetch_appointments(&self, session: &SessionContext) -> Result<Vec<Appointment>, InfraError> {
        let appointments = self
            .with_retry(Resource::Appointments, || self.client.list_appointments(session))
            .await?;
        Ok(appointments
            .into_iter()
            .filter(|appointment| self.scope.keep(appointment))
            .collect())
    }

    async fn fetch_availability(&self, session: &SessionContext) -> Result<AvailabilityMap, InfraError> {
        match &self.scope {
            ViewScope::Provider { provider_id } => {
                self.with_retry(Resource::Availability, || {
                    self.client.provider_availability(session, provider_id)
                })
                .await
            }
            ViewScope::Consumer {
                service_id,
                location,
            } => {
                self.with_retry(Resource::Availability, || {
                    self.client
                        .service_availability(session, service_id, *location)
                })
                .await
            }
        }
    }

    /// Installs a finished fetch unless a newer refresh has started since.
    fn install<T>(
        &self,
        resource: Resource,
        generation: u64,
        result: Result<T, InfraError>,
        apply: impl FnOnce(T) -> Result<Option<(usize, ScheduleEvent)>, ScheduleError>,
    ) -> FetchOutcome {
        let mut state = match self.lock() {
            Ok(state) => state,
            Err(error) => {
                return FetchOutcome::Failed {
                    status: None,
                    message: error.to_string(),
                };
            }
        };
        let slot = state.in_flight(resource);
        if slot.as_ref().is_some_and(|in_flight| in_flight.generation == generation) {
            *slot = None;
        }
        if generation < state.generation {
            tracing::debug!(
                resource = resource.as_str(),
                generation,
                current = state.generation,
                "discarding stale fetch result"
            );
            return FetchOutcome::Stale;
        }

        match result.map_err(|error| (error.status(), error.to_string())).and_then(|value| {
            apply(value).map_err(|error| (None, error.to_string()))
        }) {
            Ok(None) => {
                tracing::debug!(
                    resource = resource.as_str(),
                    generation,
                    "unsaved local edits; fetched data not installed"
                );
                FetchOutcome::Deferred
            }
            Ok(Some((items, event))) => {
                state.mark_fresh(resource);
                let _ = self.events.send(event);
                tracing::debug!(resource = resource.as_str(), generation, items, "schedule data installed");
                FetchOutcome::Loaded { items }
            }
            Err((status, message)) => {
                tracing::warn!(
                    resource = resource.as_str(),
                    generation,
                    status,
                    %message,
                    "fetch failed; keeping previous data"
                );
                FetchOutcome::Failed { status, message }
            }
        }
    }
}

/// Keeps one view's store in step with the server.
pub struct SyncCoordinator<C>
where
    C: MarketplaceClient + 'static,
{
    inner: Arc<CoordinatorInner<C>>,
}

impl<C> Clone for SyncCoordinator<C>
where
    C: MarketplaceClient + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> SyncCoordinator<C>
where
    C: MarketplaceClient + 'static,
{
    pub fn new(client: Arc<C>, store: Arc<ScheduleStore>, scope: ViewScope) -> Self {
        Self::with_retry_policy(client, store, scope, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        client: Arc<C>,
        store: Arc<ScheduleStore>,
        scope: ViewScope,
        retry_policy: RetryPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CoordinatorInner {
                client,
                store,
                scope,
                retry_policy,
                state: Mutex::new(CoordinatorState::default()),
                events,
            }),
        }
    }

    pub fn scope(&self) -> &ViewScope {
        &self.inner.scope
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleEvent> {
        self.inner.events.subscribe()
    }

    pub fn notify(&self, event: ScheduleEvent) {
        let _ = self.inner.events.send(event);
    }

    pub fn generation(&self) -> Result<u64, ScheduleError> {
        Ok(self.inner.lock()?.generation)
    }

    pub fn is_fresh(&self) -> Result<bool, ScheduleError> {
        let state = self.inner.lock()?;
        Ok(state.appointments_fresh && state.availability_fresh)
    }

    /// Loads whatever is not fresh yet. With `force`, drops freshness, starts
    /// a new generation and replaces availability wholesale.
    pub async fn refresh(
        &self,
        session: &SessionContext,
        force: bool,
    ) -> Result<RefreshReport, ScheduleError> {
        let generation = {
            let mut state = self.inner.lock()?;
            if force {
                state.appointments_fresh = false;
                state.availability_fresh = false;
                state.generation += 1;
            } else if state.appointments_fresh && state.availability_fresh {
                return Ok(RefreshReport {
                    generation: state.generation,
                    appointments: FetchOutcome::Skipped,
                    availability: FetchOutcome::Skipped,
                });
            }
            state.generation
        };
        let mode = if force {
            ReplaceMode::Full
        } else {
            ReplaceMode::Merge
        };

        let appointments = self
            .run(Resource::Appointments, session, generation, force, mode)
            .await?;
        let availability = self
            .run(Resource::Availability, session, generation, force, mode)
            .await?;

        Ok(RefreshReport {
            generation,
            appointments,
            availability,
        })
    }

    /// Refreshes this view whenever another view publishes an invalidation.
    /// Runs until the bus closes or the returned handle is aborted.
    pub fn follow(
        &self,
        bus: &InvalidationBus,
        view_id: ViewId,
        session: SessionContext,
    ) -> JoinHandle<()> {
        let mut receiver = bus.subscribe();
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                let reason = match receiver.recv().await {
                    Ok(invalidation) if invalidation.origin == Some(view_id) => continue,
                    Ok(invalidation) => invalidation.reason,
                    Err(RecvError::Lagged(skipped)) => format!("{skipped} missed invalidations"),
                    Err(RecvError::Closed) => break,
                };
                match coordinator.refresh(&session, true).await {
                    Ok(report) => tracing::debug!(
                        view = view_id.value(),
                        %reason,
                        generation = report.generation,
                        "view refreshed after invalidation"
                    ),
                    Err(error) => {
                        tracing::warn!(view = view_id.value(), %error, "invalidation refresh failed")
                    }
                }
            }
        })
    }

    async fn run(
        &self,
        resource: Resource,
        session: &SessionContext,
        generation: u64,
        force: bool,
        mode: ReplaceMode,
    ) -> Result<FetchOutcome, ScheduleError> {
        let task = {
            let mut state = self.inner.lock()?;
            if generation < state.generation {
                return Ok(FetchOutcome::Stale);
            }
            if !force && state.is_fresh(resource) {
                return Ok(FetchOutcome::Skipped);
            }
            if resource == Resource::Availability && self.inner.store.has_unsaved_availability()? {
                tracing::debug!(generation, "keeping unsaved availability edits; fetch deferred");
                return Ok(FetchOutcome::Deferred);
            }
            let joined = state
                .in_flight(resource)
                .as_ref()
                .filter(|in_flight| in_flight.generation == generation)
                .map(|in_flight| in_flight.task.clone());
            match joined {
                Some(task) => task,
                None => {
                    let task = self.spawn_fetch(resource, session.clone(), generation, mode);
                    *state.in_flight(resource) = Some(InFlight {
                        generation,
                        task: task.clone(),
                    });
                    task
                }
            }
        };
        Ok(task.await)
    }

    fn spawn_fetch(
        &self,
        resource: Resource,
        session: SessionContext,
        generation: u64,
        mode: ReplaceMode,
    ) -> SharedFetch {
        let inner = Arc::clone(&self.inner);
        async move {
            match resource {
                Resource::Appointments => {
                    let result = inner.fetch_appointments(&session).await;
                    let store = Arc::clone(&inner.store);
                    inner.install(resource, generation, result, move |appointments| {
                        let count = appointments.len();
                        store.replace_appointments(appointments)?;
                        Ok(Some((count, ScheduleEvent::AppointmentsReplaced { generation, count })))
                    })
                }
                Resource::Availability => {
                    let result = inner.fetch_availability(&session).await;
                    let store = Arc::clone(&inner.store);
                    inner.install(resource, generation, result, move |availability| {
                        let days = availability.len();
                        let blocks: usize = availability.values().map(Vec::len).sum();
                        if !store.install_availability(availability, mode)? {
                            return Ok(None);
                        }
                        Ok(Some((blocks, ScheduleEvent::AvailabilityReplaced { generation, days })))
                    })
                }
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{
        FakeMarketplaceClient, appointment, block, fixed_time, network_error,
    };
    use std::time::Duration;

    const DAY: &str = "2026-02-16";
    const NEXT_DAY: &str = "2026-02-17";

    fn provider_coordinator(
        client: &Arc<FakeMarketplaceClient>,
    ) -> (SyncCoordinator<FakeMarketplaceClient>, Arc<ScheduleStore>) {
        let store = Arc::new(ScheduleStore::new(chrono_tz::UTC));
        let coordinator = SyncCoordinator::with_retry_policy(
            Arc::clone(client),
            Arc::clone(&store),
            ViewScope::Provider {
                provider_id: "3".to_string(),
            },
            RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
            },
        );
        (coordinator, store)
    }

    fn availability_for(day: &str) -> AvailabilityMap {
        AvailabilityMap::from([(
            day.to_string(),
            vec![block(
                "b1",
                day,
                &format!("{day}T09:00:00Z"),
                &format!("{day}T12:00:00Z"),
            )],
        )])
    }

    #[tokio::test]
    async fn non_forced_refresh_after_load_makes_no_calls() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let (coordinator, _store) = provider_coordinator(&client);
        let session = SessionContext::provider("t");

        coordinator.refresh(&session, false).await.expect("initial load");
        let report = coordinator.refresh(&session, false).await.expect("second refresh");

        assert_eq!(report.appointments, FetchOutcome::Skipped);
        assert_eq!(report.availability, FetchOutcome::Skipped);
        assert_eq!(client.call_log(), vec!["appointments", "availability"]);
        assert!(coordinator.is_fresh().expect("freshness"));
    }

    #[tokio::test]
    async fn forced_refresh_fetches_appointments_first_and_replaces_fully() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let (coordinator, store) = provider_coordinator(&client);
        let session = SessionContext::provider("t");
        client.push_availability(Ok(availability_for(DAY)));
        client.push_availability(Ok(availability_for(NEXT_DAY)));

        coordinator.refresh(&session, false).await.expect("initial load");
        let report = coordinator.refresh(&session, true).await.expect("forced refresh");

        assert_eq!(report.generation, 1);
        assert_eq!(
            client.call_log(),
            vec!["appointments", "availability", "appointments", "availability"]
        );
        assert_eq!(store.days().expect("days"), vec![NEXT_DAY.to_string()]);
    }

    #[tokio::test]
    async fn initial_load_merges_into_existing_days() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let (coordinator, store) = provider_coordinator(&client);
        store
            .replace_day(DAY, availability_for(DAY).remove(DAY).unwrap_or_default())
            .expect("seed day");
        client.push_availability(Ok(availability_for(NEXT_DAY)));

        coordinator
            .refresh(&SessionContext::provider("t"), false)
            .await
            .expect("initial load");

        assert_eq!(
            store.days().expect("days"),
            vec![DAY.to_string(), NEXT_DAY.to_string()]
        );
    }

    #[tokio::test]
    async fn appointments_failure_still_loads_availability() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let (coordinator, store) = provider_coordinator(&client);
        let session = SessionContext::provider("t");
        client.push_appointments(Err(network_error()));
        client.push_availability(Ok(availability_for(DAY)));

        let report = coordinator.refresh(&session, false).await.expect("refresh");

        assert!(report.appointments.is_failed());
        assert_eq!(report.availability, FetchOutcome::Loaded { items: 1 });
        assert_eq!(store.day(DAY).expect("day").blocks.len(), 1);

        let retry = coordinator.refresh(&session, false).await.expect("retry refresh");
        assert_eq!(retry.appointments, FetchOutcome::Loaded { items: 0 });
        assert_eq!(retry.availability, FetchOutcome::Skipped);
        assert_eq!(client.calls("availability"), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_fetch() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let (coordinator, store) = provider_coordinator(&client);
        let session = SessionContext::provider("t");
        client.push_appointments_after(
            Duration::from_millis(30),
            Ok(vec![appointment("1", "2026-02-16T10:00:00Z", 30, AppointmentStatus::Confirmed)]),
        );
        client.push_availability_after(Duration::from_millis(30), Ok(availability_for(DAY)));

        let (first, second) = tokio::join!(
            coordinator.refresh(&session, false),
            coordinator.refresh(&session, false),
        );

        let first = first.expect("first refresh");
        let second = second.expect("second refresh");
        assert_eq!(first.appointments, FetchOutcome::Loaded { items: 1 });
        assert_eq!(second.appointments, FetchOutcome::Loaded { items: 1 });
        assert_eq!(client.calls("appointments"), 1);
        assert_eq!(client.calls("availability"), 1);
        assert_eq!(store.appointments().expect("appointments").len(), 1);
    }

    #[tokio::test]
    async fn superseded_generation_is_discarded() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let (coordinator, store) = provider_coordinator(&client);
        let session = SessionContext::provider("t");
        client.push_appointments_after(
            Duration::from_millis(60),
            Ok(vec![appointment("old", "2026-02-16T09:00:00Z", 30, AppointmentStatus::Pending)]),
        );
        client.push_appointments(Ok(vec![appointment(
            "new",
            "2026-02-16T11:00:00Z",
            30,
            AppointmentStatus::Pending,
        )]));

        let (slow, fast) = tokio::join!(coordinator.refresh(&session, true), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coordinator.refresh(&session, true).await
        });

        let slow = slow.expect("slow refresh");
        let fast = fast.expect("fast refresh");
        assert_eq!(slow.appointments, FetchOutcome::Stale);
        assert_eq!(slow.availability, FetchOutcome::Stale);
        assert_eq!(fast.appointments, FetchOutcome::Loaded { items: 1 });
        assert!(store.appointment("old").expect("read").is_none());
        assert!(store.appointment("new").expect("read").is_some());
        assert_eq!(client.calls("availability"), 1);
    }

    #[tokio::test]
    async fn network_errors_are_retried_with_backoff() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let store = Arc::new(ScheduleStore::new(chrono_tz::UTC));
        let coordinator = SyncCoordinator::with_retry_policy(
            Arc::clone(&client),
            store,
            ViewScope::Consumer {
                service_id: "7".to_string(),
                location: None,
            },
            RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
            },
        );
        client.push_appointments(Err(network_error()));

        let report = coordinator
            .refresh(&SessionContext::consumer("t"), false)
            .await
            .expect("refresh");

        assert_eq!(report.appointments, FetchOutcome::Loaded { items: 0 });
        assert_eq!(client.calls("appointments"), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let store = Arc::new(ScheduleStore::new(chrono_tz::UTC));
        let coordinator = SyncCoordinator::new(
            Arc::clone(&client),
            store,
            ViewScope::Provider {
                provider_id: "3".to_string(),
            },
        );
        client.push_appointments(Err(InfraError::Unauthorized {
            status: 401,
            message: "Invalid token.".to_string(),
        }));

        let report = coordinator
            .refresh(&SessionContext::provider("stale"), false)
            .await
            .expect("refresh");

        assert_eq!(
            report.appointments,
            FetchOutcome::Failed {
                status: Some(401),
                message: "not authorized (http 401): Invalid token.".to_string(),
            }
        );
        assert_eq!(client.calls("appointments"), 1);
    }

    #[tokio::test]
    async fn provider_scope_drops_other_providers_bookings() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let (coordinator, store) = provider_coordinator(&client);
        let mut foreign = appointment("2", "2026-02-16T11:00:00Z", 30, AppointmentStatus::Pending);
        foreign.provider_ref = Some("99".to_string());
        client.push_appointments(Ok(vec![
            appointment("1", "2026-02-16T10:00:00Z", 30, AppointmentStatus::Pending),
            foreign,
        ]));

        coordinator
            .refresh(&SessionContext::provider("t"), false)
            .await
            .expect("refresh");

        let ids = store
            .appointments()
            .expect("appointments")
            .into_iter()
            .map(|appointment| appointment.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn follow_refreshes_on_foreign_invalidations_only() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let (coordinator, _store) = provider_coordinator(&client);
        let bus = InvalidationBus::new();
        let view_id = ViewId::next();
        let mut events = coordinator.subscribe();
        let follower = coordinator.follow(&bus, view_id, SessionContext::provider("t"));

        bus.publish(Invalidation {
            origin: Some(view_id),
            reason: "own booking".to_string(),
        });
        bus.publish(Invalidation {
            origin: Some(ViewId::next()),
            reason: "sibling booking".to_string(),
        });

        let first = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("refresh in time")
            .expect("schedule event");
        let second = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("refresh in time")
            .expect("schedule event");

        assert!(matches!(first, ScheduleEvent::AppointmentsReplaced { generation: 1, .. }));
        assert!(matches!(second, ScheduleEvent::AvailabilityReplaced { generation: 1, .. }));
        assert_eq!(client.calls("appointments"), 1);
        follower.abort();
    }

    #[tokio::test]
    async fn sibling_invalidation_keeps_unsaved_block_edits() {
        let client = Arc::new(FakeMarketplaceClient::default());
        let (coordinator, store) = provider_coordinator(&client);
        let bus = InvalidationBus::new();
        let local = store
            .add_block(
                DAY,
                fixed_time("2026-02-16T09:00:00Z"),
                fixed_time("2026-02-16T12:00:00Z"),
            )
            .expect("local block");
        let mut events = coordinator.subscribe();
        let follower = coordinator.follow(&bus, ViewId::next(), SessionContext::provider("t"));

        bus.publish(Invalidation {
            origin: None,
            reason: "parent refresh".to_string(),
        });
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("refresh in time")
            .expect("schedule event");
        let report = coordinator
            .refresh(&SessionContext::provider("t"), true)
            .await
            .expect("forced refresh");

        assert!(matches!(event, ScheduleEvent::AppointmentsReplaced { .. }));
        assert_eq!(report.availability, FetchOutcome::Deferred);
        assert_eq!(store.day(DAY).expect("day").blocks, vec![local]);
        assert!(store.has_unsaved_availability().expect("flag"));
        assert_eq!(client.calls("availability"), 0);
        follower.abort();
    }
}
