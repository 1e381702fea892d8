// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

use shared_models::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub practitioner_id: Uuid,
    pub service_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// End time derived from start and duration; never stored.
    pub fn end_time(&self) -> NaiveTime {
        self.start_time + Duration::minutes(self.duration_minutes as i64)
    }

    /// Start of the appointment as a UTC instant. Dates and times are naive
    /// calendar values; anchoring them in UTC gives one canonical timeline for
    /// deadline arithmetic.
    pub fn start_instant(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    /// Minutes since midnight for the start of the interval.
    pub fn start_minutes(&self) -> u32 {
        minutes_of(self.start_time)
    }

    /// Minutes since midnight for the end of the interval. Computed without
    /// wrap-around so a malformed record cannot alias into the next day.
    pub fn end_minutes(&self) -> u32 {
        self.start_minutes() + self.duration_minutes
    }

    /// True while the appointment still occupies its slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed
        )
    }

    pub fn can_be_modified(&self) -> bool {
        self.is_active()
    }

    /// An appointment can be cancelled while it is not in a terminal state and
    /// the current time is strictly before start minus the notice window.
    pub fn can_be_cancelled(&self, deadline_hours: u32, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        now < self.start_instant() - Duration::hours(deadline_hours as i64)
    }

    /// Strict interval overlap against another appointment. Different calendar
    /// dates, different practitioners, or the same record never conflict.
    pub fn has_time_conflict(&self, other: &Appointment) -> bool {
        if self.id == other.id
            || self.practitioner_id != other.practitioner_id
            || self.date != other.date
        {
            return false;
        }
        self.start_minutes() < other.end_minutes() && self.end_minutes() > other.start_minutes()
    }

    // Reminder records are owned by the appointment; the notification
    // collaborator mutates them only through these operations.

    pub fn schedule_reminder(&mut self, channel: ReminderChannel, scheduled_at: DateTime<Utc>) -> Uuid {
        let reminder = Reminder {
            id: Uuid::new_v4(),
            channel,
            scheduled_at,
            delivery_status: ReminderDeliveryStatus::Pending,
            retry_count: 0,
        };
        let id = reminder.id;
        self.reminders.push(reminder);
        id
    }

    pub fn mark_reminder_sent(&mut self, reminder_id: Uuid) -> bool {
        match self.reminders.iter_mut().find(|r| r.id == reminder_id) {
            Some(reminder) => {
                reminder.delivery_status = ReminderDeliveryStatus::Sent;
                true
            }
            None => false,
        }
    }

    pub fn mark_reminder_failed(&mut self, reminder_id: Uuid) -> bool {
        match self.reminders.iter_mut().find(|r| r.id == reminder_id) {
            Some(reminder) => {
                reminder.delivery_status = ReminderDeliveryStatus::Failed;
                reminder.retry_count += 1;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub channel: ReminderChannel,
    pub scheduled_at: DateTime<Utc>,
    pub delivery_status: ReminderDeliveryStatus,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderChannel {
    Email,
    Sms,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderDeliveryStatus {
    Pending,
    Sent,
    Failed,
}

// ==============================================================================
// ORGANIZATION SCHEDULE SETTINGS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationScheduleSettings {
    pub organization_id: Uuid,
    pub working_hours: WorkingHours,
    pub booking_rules: BookingRules,
    pub default_appointment_duration: u32,
    pub buffer_time_between_appointments: u32,
    pub timezone: String,
    pub reminder_policy: ReminderPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrganizationScheduleSettings {
    /// Onboarding defaults: open Monday to Friday 09:00-18:00.
    pub fn with_defaults(organization_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            organization_id,
            working_hours: WorkingHours::default(),
            booking_rules: BookingRules::default(),
            default_appointment_duration: 60,
            buffer_time_between_appointments: 0,
            timezone: "UTC".to_string(),
            reminder_policy: ReminderPolicy::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Settings validation is fatal: a broken configuration must never reach
    /// the availability engine.
    pub fn validate(&self) -> Result<(), SchedulingError> {
        for (name, day) in self.working_hours.days() {
            if day.is_open && day.start >= day.end {
                return Err(SchedulingError::Validation(format!(
                    "Working hours for {} must start before they end",
                    name
                )));
            }
        }

        if self.booking_rules.advance_booking_days == 0
            || self.booking_rules.advance_booking_days > 365
        {
            return Err(SchedulingError::Validation(
                "Advance booking window must be between 1 and 365 days".to_string(),
            ));
        }

        if self.booking_rules.cancellation_deadline_hours > 168 {
            return Err(SchedulingError::Validation(
                "Cancellation deadline cannot exceed 168 hours".to_string(),
            ));
        }

        if self.default_appointment_duration == 0 {
            return Err(SchedulingError::Validation(
                "Default appointment duration must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHours {
    pub monday: DaySchedule,
    pub tuesday: DaySchedule,
    pub wednesday: DaySchedule,
    pub thursday: DaySchedule,
    pub friday: DaySchedule,
    pub saturday: DaySchedule,
    pub sunday: DaySchedule,
}

impl WorkingHours {
    pub fn day(&self, weekday: Weekday) -> &DaySchedule {
        match weekday {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    /// Open window for a weekday, or None when the organization is closed.
    pub fn for_weekday(&self, weekday: Weekday) -> Option<(NaiveTime, NaiveTime)> {
        let day = self.day(weekday);
        if day.is_open {
            Some((day.start, day.end))
        } else {
            None
        }
    }

    fn days(&self) -> [(&'static str, &DaySchedule); 7] {
        [
            ("monday", &self.monday),
            ("tuesday", &self.tuesday),
            ("wednesday", &self.wednesday),
            ("thursday", &self.thursday),
            ("friday", &self.friday),
            ("saturday", &self.saturday),
            ("sunday", &self.sunday),
        ]
    }
}

impl Default for WorkingHours {
    fn default() -> Self {
        let open = DaySchedule {
            is_open: true,
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
        };
        let closed = DaySchedule {
            is_open: false,
            start: open.start,
            end: open.end,
        };
        Self {
            monday: open.clone(),
            tuesday: open.clone(),
            wednesday: open.clone(),
            thursday: open.clone(),
            friday: open,
            saturday: closed.clone(),
            sunday: closed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySchedule {
    pub is_open: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRules {
    pub advance_booking_days: u32,
    pub cancellation_deadline_hours: u32,
    pub allow_online_booking: bool,
    pub allow_same_day_booking: bool,
    pub max_appointments_per_day: Option<u32>,
    pub min_time_between_appointments: Option<u32>,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            advance_booking_days: 30,
            cancellation_deadline_hours: 24,
            allow_online_booking: true,
            allow_same_day_booking: true,
            max_appointments_per_day: None,
            min_time_between_appointments: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderPolicy {
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub hours_before: Vec<u32>,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            email_enabled: true,
            sms_enabled: false,
            hours_before: vec![24],
        }
    }
}

// ==============================================================================
// DIRECTORY RECORDS (read-only collaborator data)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub duration_minutes: u32,
    pub practitioners: Vec<Uuid>,
    pub is_active: bool,
}

// ==============================================================================
// CONFLICT DETECTION MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    OutsideWorkingHours,
    TimeOverlap,
}

/// Transient description of why a proposed slot is invalid; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub message: String,
    pub conflicting_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: u32,
    pub practitioner_id: Uuid,
    pub service_id: Option<Uuid>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub client_id: Uuid,
    pub practitioner_id: Uuid,
    pub service_id: Uuid,
    pub date: String,
    pub start_time: String,
    pub duration_minutes: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub duration_minutes: Option<u32>,
    pub practitioner_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl UpdateAppointmentRequest {
    /// True when the update touches anything that can introduce a conflict.
    pub fn changes_timing(&self) -> bool {
        self.date.is_some()
            || self.start_time.is_some()
            || self.duration_minutes.is_some()
            || self.practitioner_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicBookingRequest {
    pub client_id: Uuid,
    pub service_id: Uuid,
    pub practitioner_id: Option<Uuid>,
    pub date: String,
    pub start_time: String,
    pub notes: Option<String>,
}

// ==============================================================================
// AUDIT AND LIFECYCLE EVENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub appointment_id: Uuid,
    pub action: String,
    pub performed_by: Uuid,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        appointment: &Appointment,
        action: &str,
        performed_by: Uuid,
        old_value: Option<String>,
        new_value: Option<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: appointment.organization_id,
            appointment_id: appointment.id,
            action: action.to_string(),
            performed_by,
            old_value,
            new_value,
            reason,
            recorded_at: Utc::now(),
        }
    }
}

/// Lifecycle events consumed by the notification subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AppointmentEvent {
    Created { appointment: Appointment },
    Updated { appointment: Appointment },
    StatusChanged {
        appointment: Appointment,
        previous_status: AppointmentStatus,
    },
    Cancelled {
        appointment: Appointment,
        reason: Option<String>,
    },
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Scheduling conflict: {}", .0.join("; "))]
    Conflict(Vec<String>),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Changes require at least {hours} hours notice")]
    Deadline { hours: u32 },

    #[error("Store error: {0}")]
    Store(String),
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        let message = err.to_string();
        match err {
            SchedulingError::Validation(_) => AppError::ValidationError(message),
            SchedulingError::NotFound(_) => AppError::NotFound(message),
            SchedulingError::Conflict(_) => AppError::Conflict(message),
            SchedulingError::InvalidTransition { .. } => AppError::Conflict(message),
            SchedulingError::Authorization(_) => AppError::Forbidden(message),
            SchedulingError::Deadline { .. } => AppError::DeadlinePassed(message),
            SchedulingError::Store(_) => AppError::Database(message),
        }
    }
}

// ==============================================================================
// WIRE-FORMAT VALIDATION
// ==============================================================================

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern compiles"))
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("time pattern compiles"))
}

/// Parse a `YYYY-MM-DD` wire date; the regex gate runs before chrono so
/// loose inputs like `2025-1-2` are rejected outright.
pub fn parse_wire_date(value: &str) -> Result<NaiveDate, SchedulingError> {
    if !date_regex().is_match(value) {
        return Err(SchedulingError::Validation(format!(
            "Date must use YYYY-MM-DD format, got '{}'",
            value
        )));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| SchedulingError::Validation(format!("'{}' is not a valid calendar date", value)))
}

/// Parse an `HH:MM` 24-hour wire time.
pub fn parse_wire_time(value: &str) -> Result<NaiveTime, SchedulingError> {
    if !time_regex().is_match(value) {
        return Err(SchedulingError::Validation(format!(
            "Time must use HH:MM 24-hour format, got '{}'",
            value
        )));
    }
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| SchedulingError::Validation(format!("'{}' is not a valid time", value)))
}

pub const MINUTES_PER_DAY: u32 = 24 * 60;

pub fn minutes_of(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

pub fn time_from_minutes(minutes: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
}
