use crate::domain::models::{Appointment, AppointmentStatus, AvailabilityBlock};
use crate::domain::schedule::{
    AvailabilityMap, DaySchedule, ReplaceMode, ScheduleError, ScheduleIndex, StatusUndo,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::{Mutex, MutexGuard};

/// Shareable schedule for one mounted view. Every operation is a short
/// critical section over the in-memory index.
#[derive(Debug)]
pub struct ScheduleStore {
    index: Mutex<ScheduleIndex>,
}

impl ScheduleStore {
    pub fn new(time_zone: Tz) -> Self {
        Self {
            index: Mutex::new(ScheduleIndex::new(time_zone)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ScheduleIndex>, ScheduleError> {
        self.index
            .lock()
            .map_err(|error| ScheduleError::LockPoisoned(error.to_string()))
    }

    pub fn time_zone(&self) -> Result<Tz, ScheduleError> {
        Ok(self.lock()?.time_zone())
    }

    pub fn snapshot(&self) -> Result<ScheduleIndex, ScheduleError> {
        Ok(self.lock()?.clone())
    }

    pub fn day(&self, day: &str) -> Result<DaySchedule, ScheduleError> {
        Ok(self.lock()?.day(day))
    }

    pub fn days(&self) -> Result<Vec<String>, ScheduleError> {
        Ok(self.lock()?.days())
    }

    pub fn appointment(&self, appointment_id: &str) -> Result<Option<Appointment>, ScheduleError> {
        Ok(self.lock()?.appointment(appointment_id.trim()).cloned())
    }

    pub fn appointments(&self) -> Result<Vec<Appointment>, ScheduleError> {
        Ok(self.lock()?.appointments())
    }

    pub fn availability_payload(&self) -> Result<AvailabilityMap, ScheduleError> {
        Ok(self.lock()?.availability_payload())
    }

    pub fn has_unsaved_availability(&self) -> Result<bool, ScheduleError> {
        Ok(self.lock()?.has_unsaved_availability())
    }

    pub fn add_block(
        &self,
        day: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AvailabilityBlock, ScheduleError> {
        self.lock()?.add_block(day, start, end)
    }

    pub fn remove_block(&self, day: &str, block_id: &str) -> Result<bool, ScheduleError> {
        Ok(self.lock()?.remove_block(day, block_id))
    }

    pub fn replace_day(&self, day: &str, blocks: Vec<AvailabilityBlock>) -> Result<(), ScheduleError> {
        self.lock()?.replace_day(day, blocks);
        Ok(())
    }

    pub fn install_availability(
        &self,
        availability: AvailabilityMap,
        mode: ReplaceMode,
    ) -> Result<bool, ScheduleError> {
        Ok(self.lock()?.install_availability(availability, mode))
    }

    pub fn projection_input(&self, day: &str, buffer_minutes: u32) -> Result<DaySchedule, ScheduleError> {
        Ok(self.lock()?.projection_input(day, buffer_minutes))
    }

    pub fn replace_all(&self, availability: AvailabilityMap, mode: ReplaceMode) -> Result<(), ScheduleError> {
        self.lock()?.replace_all(availability, mode);
        Ok(())
    }

    pub fn upsert_appointment(&self, appointment: Appointment) -> Result<(), ScheduleError> {
        self.lock()?.upsert_appointment(appointment);
        Ok(())
    }

    pub fn remove_appointment(&self, appointment_id: &str) -> Result<Option<Appointment>, ScheduleError> {
        Ok(self.lock()?.remove_appointment(appointment_id.trim()))
    }

    pub fn replace_appointments(&self, appointments: Vec<Appointment>) -> Result<(), ScheduleError> {
        self.lock()?.replace_appointments(appointments);
        Ok(())
    }

    pub fn apply_status(
        &self,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<StatusUndo, ScheduleError> {
        self.lock()?.apply_status(appointment_id.trim(), status)
    }

    pub fn restore(&self, undo: StatusUndo) -> Result<(), ScheduleError> {
        self.lock()?.restore(undo);
        Ok(())
    }
}
