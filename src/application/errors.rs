use crate::domain::models::{ActorRole, AppointmentStatus, ConflictInterval};
use crate::domain::schedule::ScheduleError;
use crate::infrastructure::error::InfraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid booking request: {0}")]
    Validation(String),
    #[error("requested time conflicts with {} existing appointment(s)", .conflicts.len())]
    Conflict { conflicts: Vec<ConflictInterval> },
    #[error("schedule error: {0}")]
    Store(#[from] ScheduleError),
    #[error(transparent)]
    Remote(InfraError),
}

impl From<InfraError> for BookingError {
    fn from(error: InfraError) -> Self {
        match error {
            InfraError::Conflict { conflicts, .. } => Self::Conflict { conflicts },
            other => Self::Remote(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("appointment not found: {0}")]
    NotFound(String),
    #[error("cannot change appointment status from {from} to {to}")]
    Illegal {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("a {} may not set an appointment to {to}", .role.as_str())]
    NotPermitted { role: ActorRole, to: AppointmentStatus },
    #[error("schedule error: {0}")]
    Store(#[from] ScheduleError),
    #[error(transparent)]
    Remote(#[from] InfraError),
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("{0} is only available to provider views")]
    ProviderOnly(&'static str),
    #[error("schedule error: {0}")]
    Store(#[from] ScheduleError),
    #[error(transparent)]
    Remote(#[from] InfraError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn infra_conflict_becomes_booking_conflict() {
        let start = DateTime::parse_from_rfc3339("2026-02-16T10:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        let conflict = ConflictInterval {
            appointment_id: Some("5".to_string()),
            start,
            end: start + chrono::Duration::minutes(30),
            service: None,
        };
        let error = BookingError::from(InfraError::Conflict {
            conflicts: vec![conflict.clone()],
            message: "overlap".to_string(),
        });

        match error {
            BookingError::Conflict { conflicts } => assert_eq!(conflicts, vec![conflict]),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn other_infra_errors_stay_remote() {
        let error = BookingError::from(InfraError::Http {
            status: 500,
            message: "boom".to_string(),
        });
        assert!(matches!(error, BookingError::Remote(InfraError::Http { status: 500, .. })));
    }
}
