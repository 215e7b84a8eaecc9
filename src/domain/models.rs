use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Cancelled appointments free their time; every other status holds it.
    pub fn blocks_availability(self) -> bool {
        self != Self::Cancelled
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Cancelled)
                | (Self::Confirmed, Self::Completed)
        )
    }

    /// Whether `role` may drive the edge `self -> next`. Assumes the edge is legal.
    pub fn permits(self, next: AppointmentStatus, role: ActorRole) -> bool {
        match role {
            ActorRole::Provider => true,
            ActorRole::Consumer => next == Self::Cancelled,
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Provider,
    Consumer,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Consumer => "consumer",
        }
    }
}

/// Who is acting. Handed to every entry point instead of being read from
/// ambient storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub role: ActorRole,
}

impl SessionContext {
    pub fn new(role: ActorRole, token: Option<String>) -> Self {
        Self {
            token,
            user_id: None,
            role,
        }
    }

    pub fn provider(token: impl Into<String>) -> Self {
        Self::new(ActorRole::Provider, Some(token.into()))
    }

    pub fn consumer(token: impl Into<String>) -> Self {
        Self::new(ActorRole::Consumer, Some(token.into()))
    }

    pub fn guest() -> Self {
        Self::new(ActorRole::Consumer, None)
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Pricing attached by the remote service. Copied through, never computed here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PriceFields {
    pub original_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearby_appointments: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityBlock {
    pub id: String,
    pub day: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PriceFields>,
}

impl AvailabilityBlock {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "block.id")?;
        validate_day_key(&self.day, "block.day")?;
        if self.end <= self.start {
            return Err("block.end must be after block.start".to_string());
        }
        Ok(())
    }

    /// Half-open overlap: blocks that only touch at a boundary do not overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: String,
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PriceFields>,
}

impl Appointment {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "appointment.id")?;
        validate_non_empty(&self.service_id, "appointment.service_id")?;
        if self.end <= self.start {
            return Err("appointment.end must be after appointment.start".to_string());
        }
        Ok(())
    }

    /// End of the window this appointment keeps unavailable.
    pub fn buffered_end(&self, buffer_minutes: u32) -> DateTime<Utc> {
        self.end + Duration::minutes(i64::from(buffer_minutes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookableSlot {
    pub block_id: String,
    pub day: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PriceFields>,
}

impl BookableSlot {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContactDetails {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ContactDetails {
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.email, "contact.email")
    }
}

/// One existing booking the server reported as clashing with a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictInterval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

pub fn validate_day_key(value: &str, field_name: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), DAY_KEY_FORMAT)
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))
}

/// Provider-local calendar day of an instant.
pub fn day_key(instant: DateTime<Utc>, time_zone: Tz) -> String {
    instant
        .with_timezone(&time_zone)
        .date_naive()
        .format(DAY_KEY_FORMAT)
        .to_string()
}

pub fn day_key_of(date: NaiveDate) -> String {
    date.format(DAY_KEY_FORMAT).to_string()
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_STATUSES: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
    ];

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_block() -> AvailabilityBlock {
        AvailabilityBlock {
            id: "blk-1".to_string(),
            day: "2026-02-16".to_string(),
            start: fixed_time("2026-02-16T09:00:00Z"),
            end: fixed_time("2026-02-16T12:00:00Z"),
            pricing: None,
        }
    }

    fn sample_appointment() -> Appointment {
        Appointment {
            id: "42".to_string(),
            service_id: "7".to_string(),
            consumer_ref: Some("3".to_string()),
            provider_ref: Some("1".to_string()),
            start: fixed_time("2026-02-16T10:00:00Z"),
            end: fixed_time("2026-02-16T10:30:00Z"),
            status: AppointmentStatus::Confirmed,
            notes: Some("ring twice".to_string()),
            created_at: Some(fixed_time("2026-02-10T08:00:00Z")),
            pricing: Some(PriceFields {
                original_price: 40.0,
                final_price: Some(34.0),
                discount_percentage: Some(15.0),
                nearby_appointments: Some(2),
            }),
        }
    }

    #[test]
    fn state_machine_allows_only_documented_edges() {
        use AppointmentStatus::*;
        let allowed = [
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, Cancelled),
            (Confirmed, Completed),
        ];
        for from in ALL_STATUSES {
            for to in ALL_STATUSES {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn consumers_may_only_cancel() {
        use AppointmentStatus::*;
        assert!(Pending.permits(Cancelled, ActorRole::Consumer));
        assert!(Confirmed.permits(Cancelled, ActorRole::Consumer));
        assert!(!Pending.permits(Confirmed, ActorRole::Consumer));
        assert!(!Confirmed.permits(Completed, ActorRole::Consumer));
        assert!(Pending.permits(Confirmed, ActorRole::Provider));
        assert!(Confirmed.permits(Completed, ActorRole::Provider));
    }

    #[test]
    fn status_parse_is_lenient_about_case_and_spelling() {
        assert_eq!(
            AppointmentStatus::parse(" Confirmed "),
            Some(AppointmentStatus::Confirmed)
        );
        assert_eq!(
            AppointmentStatus::parse("canceled"),
            Some(AppointmentStatus::Cancelled)
        );
        assert_eq!(AppointmentStatus::parse("rescheduled"), None);
    }

    #[test]
    fn block_validate_rejects_empty_range_and_bad_day() {
        assert!(sample_block().validate().is_ok());

        let mut block = sample_block();
        block.end = block.start;
        assert!(block.validate().is_err());

        let mut block = sample_block();
        block.day = "16/02/2026".to_string();
        assert!(block.validate().is_err());
    }

    #[test]
    fn block_overlap_is_half_open() {
        let block = sample_block();
        assert!(!block.overlaps(
            fixed_time("2026-02-16T12:00:00Z"),
            fixed_time("2026-02-16T13:00:00Z")
        ));
        assert!(!block.overlaps(
            fixed_time("2026-02-16T08:00:00Z"),
            fixed_time("2026-02-16T09:00:00Z")
        ));
        assert!(block.overlaps(
            fixed_time("2026-02-16T11:59:00Z"),
            fixed_time("2026-02-16T13:00:00Z")
        ));
    }

    #[test]
    fn contact_requires_email() {
        assert!(ContactDetails::with_email("a@b.test").validate().is_ok());
        assert!(ContactDetails::with_email("   ").validate().is_err());
    }

    #[test]
    fn day_key_uses_provider_time_zone() {
        let instant = fixed_time("2026-02-16T23:30:00Z");
        assert_eq!(day_key(instant, chrono_tz::UTC), "2026-02-16");
        assert_eq!(day_key(instant, chrono_tz::Asia::Tokyo), "2026-02-17");
        assert_eq!(day_key(instant, chrono_tz::America::New_York), "2026-02-16");
    }

    #[test]
    fn buffered_end_extends_only_the_end() {
        let appointment = sample_appointment();
        assert_eq!(
            appointment.buffered_end(15),
            fixed_time("2026-02-16T10:45:00Z")
        );
        assert_eq!(appointment.end, fixed_time("2026-02-16T10:30:00Z"));
    }

    #[test]
    fn session_token_is_trimmed_and_optional() {
        assert_eq!(SessionContext::provider(" abc ").auth_token(), Some("abc"));
        assert_eq!(SessionContext::provider("   ").auth_token(), None);
        assert_eq!(SessionContext::guest().auth_token(), None);
    }

    #[test]
    fn appointment_serde_roundtrip() {
        let appointment = sample_appointment();
        let roundtrip: Appointment = serde_json::from_str(
            &serde_json::to_string(&appointment).expect("serialize appointment"),
        )
        .expect("deserialize appointment");
        assert_eq!(roundtrip, appointment);
    }

    fn status_strategy() -> impl Strategy<Value = AppointmentStatus> {
        prop::sample::select(ALL_STATUSES.to_vec())
    }

    proptest! {
        #[test]
        fn terminal_statuses_never_transition(from in status_strategy(), to in status_strategy()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        #[test]
        fn self_transitions_are_rejected(status in status_strategy()) {
            prop_assert!(!status.can_transition_to(status));
        }
    }
}
