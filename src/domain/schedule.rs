use crate::domain::models::{
    Appointment, AppointmentStatus, AvailabilityBlock, day_key, day_key_of, validate_day_key,
};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_BLOCK_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_block_id() -> String {
    let sequence = NEXT_BLOCK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("block-{}-{sequence}", Utc::now().timestamp_micros())
}

pub type AvailabilityMap = BTreeMap<String, Vec<AvailabilityBlock>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("invalid day key: {0}")]
    InvalidDay(String),
    #[error("end time must be after start time ({start} - {end})")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error(
        "time block overlaps existing availability {} ({} - {})",
        .existing.id,
        .existing.start,
        .existing.end
    )]
    Overlap { existing: AvailabilityBlock },
    #[error("time block {start} - {end} does not lie within day {day}")]
    DayMismatch {
        day: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("appointment not found: {0}")]
    AppointmentNotFound(String),
    #[error("schedule lock poisoned: {0}")]
    LockPoisoned(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Days missing from the payload keep what they had.
    Merge,
    /// The payload is the whole truth; days missing from it lose their blocks.
    Full,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DaySchedule {
    pub blocks: Vec<AvailabilityBlock>,
    pub appointments: Vec<Appointment>,
}

impl DaySchedule {
    fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.appointments.is_empty()
    }
}

/// Undo token for an optimistic status write: the full appointment as it was
/// before the write.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct StatusUndo {
    snapshot: Appointment,
}

impl StatusUndo {
    pub fn appointment_id(&self) -> &str {
        &self.snapshot.id
    }

    pub fn previous_status(&self) -> AppointmentStatus {
        self.snapshot.status
    }
}

/// Day-keyed index of one view's availability blocks and appointments.
#[derive(Debug, Clone)]
pub struct ScheduleIndex {
    time_zone: Tz,
    days: BTreeMap<String, DaySchedule>,
    unsaved_availability: bool,
}

impl ScheduleIndex {
    pub fn new(time_zone: Tz) -> Self {
        Self {
            time_zone,
            days: BTreeMap::new(),
            unsaved_availability: false,
        }
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    pub fn day(&self, day: &str) -> DaySchedule {
        self.days.get(day).cloned().unwrap_or_default()
    }

    pub fn days(&self) -> Vec<String> {
        self.days.keys().cloned().collect()
    }

    pub fn blocks(&self, day: &str) -> &[AvailabilityBlock] {
        self.days
            .get(day)
            .map(|schedule| schedule.blocks.as_slice())
            .unwrap_or_default()
    }

    pub fn appointment(&self, appointment_id: &str) -> Option<&Appointment> {
        self.days
            .values()
            .flat_map(|schedule| schedule.appointments.iter())
            .find(|appointment| appointment.id == appointment_id)
    }

    pub fn appointments(&self) -> Vec<Appointment> {
        self.days
            .values()
            .flat_map(|schedule| schedule.appointments.iter().cloned())
            .collect()
    }

    pub fn has_unsaved_availability(&self) -> bool {
        self.unsaved_availability
    }

    pub fn add_block(
        &mut self,
        day: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AvailabilityBlock, ScheduleError> {
        let day = day.trim();
        validate_day_key(day, "day").map_err(ScheduleError::InvalidDay)?;
        if start >= end {
            return Err(ScheduleError::InvalidRange { start, end });
        }
        // `end` may touch the next local midnight but not pass it.
        let last_instant = end - Duration::nanoseconds(1);
        if day_key(start, self.time_zone) != day || day_key(last_instant, self.time_zone) != day {
            return Err(ScheduleError::DayMismatch {
                day: day.to_string(),
                start,
                end,
            });
        }
        if let Some(existing) = self
            .blocks(day)
            .iter()
            .find(|block| block.overlaps(start, end))
        {
            return Err(ScheduleError::Overlap {
                existing: existing.clone(),
            });
        }

        let block = AvailabilityBlock {
            id: next_block_id(),
            day: day.to_string(),
            start,
            end,
            pricing: None,
        };
        let schedule = self.days.entry(day.to_string()).or_default();
        schedule.blocks.push(block.clone());
        sort_blocks(&mut schedule.blocks);
        self.unsaved_availability = true;
        Ok(block)
    }

    pub fn remove_block(&mut self, day: &str, block_id: &str) -> bool {
        let Some(schedule) = self.days.get_mut(day.trim()) else {
            return false;
        };
        let before = schedule.blocks.len();
        schedule.blocks.retain(|block| block.id != block_id);
        let removed = schedule.blocks.len() != before;
        if removed {
            self.unsaved_availability = true;
        }
        self.prune_empty_days();
        removed
    }

    pub fn replace_day(&mut self, day: &str, blocks: Vec<AvailabilityBlock>) {
        let day = day.trim();
        let mut blocks = blocks
            .into_iter()
            .map(|mut block| {
                block.day = day.to_string();
                block
            })
            .collect::<Vec<_>>();
        sort_blocks(&mut blocks);
        self.days.entry(day.to_string()).or_default().blocks = blocks;
        self.prune_empty_days();
    }

    pub fn replace_all(&mut self, availability: AvailabilityMap, mode: ReplaceMode) {
        if mode == ReplaceMode::Full {
            for schedule in self.days.values_mut() {
                schedule.blocks.clear();
            }
        }
        for (day, blocks) in availability {
            self.replace_day(&day, blocks);
        }
        self.unsaved_availability = false;
        self.prune_empty_days();
    }

    /// Installs fetched availability unless local block edits are waiting to
    /// be saved. Returns whether the payload was installed.
    pub fn install_availability(&mut self, availability: AvailabilityMap, mode: ReplaceMode) -> bool {
        if self.unsaved_availability {
            return false;
        }
        self.replace_all(availability, mode);
        true
    }

    /// Blocks of every non-empty day, shaped for a full save.
    pub fn availability_payload(&self) -> AvailabilityMap {
        self.days
            .iter()
            .filter(|(_, schedule)| !schedule.blocks.is_empty())
            .map(|(day, schedule)| (day.clone(), schedule.blocks.clone()))
            .collect()
    }

    pub fn upsert_appointment(&mut self, appointment: Appointment) {
        self.take_appointment(&appointment.id);
        let day = day_key(appointment.start, self.time_zone);
        let schedule = self.days.entry(day).or_default();
        schedule.appointments.push(appointment);
        schedule
            .appointments
            .sort_by(|left, right| left.start.cmp(&right.start));
        self.prune_empty_days();
    }

    /// What a projection of `day` has to see: the day itself plus appointments
    /// of the previous day whose buffer runs past midnight.
    pub fn projection_input(&self, day: &str, buffer_minutes: u32) -> DaySchedule {
        let day = day.trim();
        let mut schedule = self.day(day);
        let Some(previous) = validate_day_key(day, "day")
            .ok()
            .and_then(|date| date.pred_opt())
            .map(day_key_of)
        else {
            return schedule;
        };
        let spill = self
            .days
            .get(&previous)
            .map(|earlier| earlier.appointments.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|appointment| {
                let buffered_end = appointment.buffered_end(buffer_minutes);
                buffered_end > appointment.start
                    && day_key(buffered_end - Duration::nanoseconds(1), self.time_zone).as_str() >= day
            })
            .cloned()
            .collect::<Vec<_>>();
        if !spill.is_empty() {
            schedule.appointments.splice(0..0, spill);
        }
        schedule
    }

    pub fn remove_appointment(&mut self, appointment_id: &str) -> Option<Appointment> {
        let removed = self.take_appointment(appointment_id);
        self.prune_empty_days();
        removed
    }

    pub fn replace_appointments(&mut self, appointments: Vec<Appointment>) {
        for schedule in self.days.values_mut() {
            schedule.appointments.clear();
        }
        for appointment in appointments {
            self.upsert_appointment(appointment);
        }
        self.prune_empty_days();
    }

    pub fn apply_status(
        &mut self,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> Result<StatusUndo, ScheduleError> {
        let appointment = self
            .days
            .values_mut()
            .flat_map(|schedule| schedule.appointments.iter_mut())
            .find(|appointment| appointment.id == appointment_id)
            .ok_or_else(|| ScheduleError::AppointmentNotFound(appointment_id.to_string()))?;
        let undo = StatusUndo {
            snapshot: appointment.clone(),
        };
        appointment.status = status;
        Ok(undo)
    }

    pub fn restore(&mut self, undo: StatusUndo) {
        self.upsert_appointment(undo.snapshot);
    }

    fn take_appointment(&mut self, appointment_id: &str) -> Option<Appointment> {
        for schedule in self.days.values_mut() {
            if let Some(position) = schedule
                .appointments
                .iter()
                .position(|appointment| appointment.id == appointment_id)
            {
                return Some(schedule.appointments.remove(position));
            }
        }
        None
    }

    fn prune_empty_days(&mut self) {
        self.days.retain(|_, schedule| !schedule.is_empty());
    }
}

// Stable: blocks with equal starts keep their arrival order.
fn sort_blocks(blocks: &mut [AvailabilityBlock]) {
    blocks.sort_by(|left, right| left.start.cmp(&right.start));
}
