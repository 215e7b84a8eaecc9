use crate::application::errors::TransitionError;
use crate::domain::models::{Appointment, AppointmentStatus, SessionContext};
use crate::infrastructure::marketplace_client::MarketplaceClient;
use crate::infrastructure::schedule_store::ScheduleStore;
use std::sync::Arc;

/// Optimistic status changes with rollback. Calls for different appointments
/// may run concurrently; calls for the same appointment are not serialized,
/// so the last server response wins.
pub struct StatusTransitionService<C>
where
    C: MarketplaceClient,
{
    client: Arc<C>,
    store: Arc<ScheduleStore>,
}

impl<C> StatusTransitionService<C>
where
    C: MarketplaceClient,
{
    pub fn new(client: Arc<C>, store: Arc<ScheduleStore>) -> Self {
        Self { client, store }
    }

    pub async fn transition(
        &self,
        session: &SessionContext,
        appointment_id: &str,
        next: AppointmentStatus,
    ) -> Result<Appointment, TransitionError> {
        let appointment_id = appointment_id.trim();
        let current = self
            .store
            .appointment(appointment_id)?
            .ok_or_else(|| TransitionError::NotFound(appointment_id.to_string()))?;
        if !current.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: current.status,
                to: next,
            });
        }
        if !current.status.permits(next, session.role) {
            return Err(TransitionError::NotPermitted {
                role: session.role,
                to: next,
            });
        }

        let undo = self.store.apply_status(appointment_id, next)?;
        match self
            .client
            .update_appointment_status(session, appointment_id, next)
            .await
        {
            Ok(echoed) => {
                if echoed != next {
                    tracing::warn!(
                        appointment_id,
                        requested = %next,
                        echoed = %echoed,
                        "server settled on a different status"
                    );
                }
                tracing::info!(
                    appointment_id,
                    from = %current.status,
                    to = %echoed,
                    "appointment status updated"
                );
                self.settle(current, echoed)
            }
            Err(error) => {
                tracing::warn!(
                    appointment_id,
                    restored = %undo.previous_status(),
                    %error,
                    "status update failed; rolling back"
                );
                self.store.restore(undo)?;
                Err(TransitionError::Remote(error))
            }
        }
    }

    fn settle(
        &self,
        before: Appointment,
        echoed: AppointmentStatus,
    ) -> Result<Appointment, TransitionError> {
        match self.store.appointment(&before.id)? {
            Some(mut stored) => {
                if stored.status != echoed {
                    stored.status = echoed;
                    self.store.upsert_appointment(stored.clone())?;
                }
                Ok(stored)
            }
            // A refresh replaced the list mid-flight; the next refresh reconciles.
            None => Ok(Appointment {
                status: echoed,
                ..before
            }),
        }
    }
}
