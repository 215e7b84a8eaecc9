use crate::domain::models::{Appointment, AppointmentStatus, AvailabilityBlock, BookableSlot};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const DEFAULT_BUFFER_MINUTES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// An existing appointment as the calendar draws it. `end` is the booked end;
/// `buffer_end` is where availability resumes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BookedMarker {
    pub appointment_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub buffer_end: DateTime<Utc>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayProjection {
    pub day: String,
    pub slots: Vec<BookableSlot>,
    pub booked: Vec<BookedMarker>,
}

impl DayProjection {
    pub fn is_fully_booked(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_starting_at(&self, start: DateTime<Utc>) -> Option<&BookableSlot> {
        self.slots.iter().find(|slot| slot.start == start)
    }
}

/// Derive the bookable slots of one day.
///
/// Every block loses the union of `[start, end + buffer)` of the appointments
/// that still hold their time. What is left of each block becomes a slot
/// carrying the block's pricing untouched. Slots come back ordered by start;
/// equal starts keep the order of `blocks`.
pub fn project(
    day: &str,
    blocks: &[AvailabilityBlock],
    appointments: &[Appointment],
    buffer_minutes: u32,
) -> DayProjection {
    let buffer = Duration::minutes(i64::from(buffer_minutes));
    let busy = merge_intervals(
        appointments
            .iter()
            .filter(|appointment| appointment.status.blocks_availability())
            .map(|appointment| Interval {
                start: appointment.start,
                end: appointment.end + buffer,
            })
            .filter(|interval| interval.start < interval.end)
            .collect(),
    );

    let mut slots = Vec::new();
    for block in blocks {
        if block.end <= block.start {
            continue;
        }
        let window = Interval {
            start: block.start,
            end: block.end,
        };
        for free in subtract_busy(window, &busy) {
            slots.push(BookableSlot {
                block_id: block.id.clone(),
                day: day.to_string(),
                start: free.start,
                end: free.end,
                pricing: block.pricing.clone(),
            });
        }
    }
    slots.sort_by(|left, right| left.start.cmp(&right.start));

    let mut booked = appointments
        .iter()
        .map(|appointment| BookedMarker {
            appointment_id: appointment.id.clone(),
            start: appointment.start,
            end: appointment.end,
            buffer_end: appointment.end + buffer,
            status: appointment.status,
        })
        .collect::<Vec<_>>();
    booked.sort_by(|left, right| {
        left.start
            .cmp(&right.start)
            .then_with(|| left.appointment_id.cmp(&right.appointment_id))
    });

    DayProjection {
        day: day.to_string(),
        slots,
        booked,
    }
}

/// Cut free slots into back-to-back service-length candidates, leaving the
/// buffer between consecutive candidates. Tails shorter than `duration_minutes`
/// are dropped.
pub fn partition_slots(
    slots: &[BookableSlot],
    duration_minutes: u32,
    buffer_minutes: u32,
) -> Vec<BookableSlot> {
    if duration_minutes == 0 {
        return Vec::new();
    }
    let duration = Duration::minutes(i64::from(duration_minutes));
    let buffer = Duration::minutes(i64::from(buffer_minutes));

    let mut candidates = Vec::new();
    for slot in slots {
        let mut cursor = slot.start;
        loop {
            let end = cursor + duration;
            if end > slot.end {
                break;
            }
            candidates.push(BookableSlot {
                block_id: slot.block_id.clone(),
                day: slot.day.clone(),
                start: cursor,
                end,
                pricing: slot.pricing.clone(),
            });
            cursor = end + buffer;
        }
    }
    candidates
}

fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_unstable_by(|left, right| left.start.cmp(&right.start));
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        if let Some(last) = merged.last_mut() {
            if interval.start <= last.end {
                if interval.end > last.end {
                    last.end = interval.end;
                }
                continue;
            }
        }
        merged.push(interval);
    }
    merged
}

// `busy` must be sorted and disjoint.
fn subtract_busy(window: Interval, busy: &[Interval]) -> Vec<Interval> {
    let mut free = Vec::new();
    let mut cursor = window.start;
    for interval in busy {
        if interval.end <= cursor {
            continue;
        }
        if interval.start >= window.end {
            break;
        }
        if interval.start > cursor {
            free.push(Interval {
                start: cursor,
                end: interval.start,
            });
        }
        cursor = cursor.max(interval.end);
        if cursor >= window.end {
            break;
        }
    }
    if cursor < window.end {
        free.push(Interval {
            start: cursor,
            end: window.end,
        });
    }
    free
}
