//! Client-side scheduling and reconciliation for a service-booking marketplace.
//!
//! A [`SchedulingView`] owns one schedule store and keeps it in step with the
//! marketplace API: it projects bookable time out of provider availability,
//! books appointments, drives status transitions and refreshes sibling views
//! through an [`InvalidationBus`].

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::errors::{BookingError, TransitionError, ViewError};
pub use application::scheduling_view::SchedulingView;
pub use application::sync_coordinator::{
    FetchOutcome, Invalidation, InvalidationBus, RefreshReport, ScheduleEvent, SyncCoordinator,
    ViewId, ViewScope,
};
pub use domain::models::{
    ActorRole, Appointment, AppointmentStatus, AvailabilityBlock, BookableSlot, ContactDetails,
    ConflictInterval, PriceFields, SessionContext,
};
pub use domain::projection::{DayProjection, partition_slots, project};
pub use domain::schedule::{AvailabilityMap, ReplaceMode, ScheduleError};
pub use infrastructure::config::{RetryPolicy, SchedulingConfig};
pub use infrastructure::error::InfraError;
pub use infrastructure::marketplace_client::{
    LocationParams, MarketplaceClient, RescheduleRequest, ReqwestMarketplaceClient,
};
pub use infrastructure::schedule_store::ScheduleStore;
