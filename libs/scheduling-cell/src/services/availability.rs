// libs/scheduling-cell/src/services/availability.rs
use chrono::{Datelike, NaiveDate, NaiveTime};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    minutes_of, time_from_minutes, AvailableSlot, Conflict, ConflictType,
    OrganizationScheduleSettings, SchedulingError, MINUTES_PER_DAY,
};
use crate::store::{AppointmentStore, SettingsStore};
use crate::models::AppointmentStatus;

const ACTIVE_STATUSES: [AppointmentStatus; 2] =
    [AppointmentStatus::Scheduled, AppointmentStatus::Confirmed];

/// Computes open slots and detects conflicts for a practitioner/day. All
/// operations are read-only and safe to repeat within a request.
pub struct AvailabilityEngine {
    appointments: Arc<dyn AppointmentStore>,
    settings: Arc<dyn SettingsStore>,
}

impl AvailabilityEngine {
    pub fn new(appointments: Arc<dyn AppointmentStore>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            appointments,
            settings,
        }
    }

    async fn organization_settings(
        &self,
        organization_id: Uuid,
    ) -> Result<OrganizationScheduleSettings, SchedulingError> {
        self.settings
            .get(organization_id)
            .await
            .map_err(SchedulingError::from)?
            .ok_or_else(|| SchedulingError::NotFound("Organization schedule settings".to_string()))
    }

    /// Check a proposed slot against working hours and existing bookings.
    /// Returns every reason the slot is invalid; an empty list means bookable.
    pub async fn check_availability(
        &self,
        organization_id: Uuid,
        practitioner_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Conflict>, SchedulingError> {
        debug!(
            "Checking availability for practitioner {} on {} at {}",
            practitioner_id, date, start_time
        );

        // Bounding the duration keeps the minute arithmetic below free of
        // overflow on caller-supplied values.
        if duration_minutes == 0 || duration_minutes > MINUTES_PER_DAY {
            return Err(SchedulingError::Validation(format!(
                "Duration must be between 1 and {} minutes",
                MINUTES_PER_DAY
            )));
        }

        let settings = self.organization_settings(organization_id).await?;
        let mut conflicts = Vec::new();

        let start_minutes = minutes_of(start_time);
        let end_minutes = start_minutes + duration_minutes;

        match settings.working_hours.for_weekday(date.weekday()) {
            None => {
                conflicts.push(Conflict {
                    conflict_type: ConflictType::OutsideWorkingHours,
                    message: format!("Organization is closed on {}", weekday_name(date)),
                    conflicting_appointment_id: None,
                });
            }
            Some((open, close)) => {
                if start_minutes < minutes_of(open) || end_minutes > minutes_of(close) {
                    conflicts.push(Conflict {
                        conflict_type: ConflictType::OutsideWorkingHours,
                        message: format!(
                            "Requested time falls outside working hours ({} - {})",
                            open.format("%H:%M"),
                            close.format("%H:%M")
                        ),
                        conflicting_appointment_id: None,
                    });
                }
            }
        }

        let existing = self
            .appointments
            .find_for_practitioner_day(organization_id, practitioner_id, date, &ACTIVE_STATUSES)
            .await
            .map_err(SchedulingError::from)?;

        for appointment in existing {
            if Some(appointment.id) == exclude_appointment_id {
                continue;
            }
            // Strict [start, end) interval overlap, same predicate the entity
            // exposes through has_time_conflict.
            if start_minutes < appointment.end_minutes()
                && end_minutes > appointment.start_minutes()
            {
                conflicts.push(Conflict {
                    conflict_type: ConflictType::TimeOverlap,
                    message: format!(
                        "Overlaps an existing appointment from {} to {}",
                        appointment.start_time.format("%H:%M"),
                        appointment.end_time().format("%H:%M")
                    ),
                    conflicting_appointment_id: Some(appointment.id),
                });
            }
        }

        if !conflicts.is_empty() {
            warn!(
                "{} conflicts found for practitioner {} on {}",
                conflicts.len(),
                practitioner_id,
                date
            );
        }

        Ok(conflicts)
    }

    /// Walk the working-hours window and emit every free candidate slot.
    /// Duration resolution: explicit request > service duration > organization
    /// default. The buffer advances the cursor after every candidate, accepted
    /// or not.
    pub async fn available_slots(
        &self,
        organization_id: Uuid,
        practitioner_id: Uuid,
        date: NaiveDate,
        service_id: Option<Uuid>,
        service_duration: Option<u32>,
        requested_duration: Option<u32>,
    ) -> Result<Vec<AvailableSlot>, SchedulingError> {
        debug!(
            "Computing available slots for practitioner {} on {}",
            practitioner_id, date
        );

        let settings = self.organization_settings(organization_id).await?;

        let Some((open, close)) = settings.working_hours.for_weekday(date.weekday()) else {
            return Ok(vec![]);
        };

        let duration = requested_duration
            .or(service_duration)
            .unwrap_or(settings.default_appointment_duration);
        if duration == 0 || duration > MINUTES_PER_DAY {
            return Err(SchedulingError::Validation(format!(
                "Slot duration must be between 1 and {} minutes",
                MINUTES_PER_DAY
            )));
        }

        let existing = self
            .appointments
            .find_for_practitioner_day(organization_id, practitioner_id, date, &ACTIVE_STATUSES)
            .await
            .map_err(SchedulingError::from)?;

        let close_minutes = minutes_of(close);
        let step = duration + settings.buffer_time_between_appointments;

        let mut slots = Vec::new();
        let mut cursor = minutes_of(open);

        while cursor + duration <= close_minutes {
            let candidate_end = cursor + duration;

            let overlaps = existing.iter().any(|appointment| {
                cursor < appointment.end_minutes() && candidate_end > appointment.start_minutes()
            });

            if !overlaps {
                if let (Some(start_time), Some(end_time)) =
                    (time_from_minutes(cursor), time_from_minutes(candidate_end))
                {
                    slots.push(AvailableSlot {
                        date,
                        start_time,
                        end_time,
                        duration_minutes: duration,
                        practitioner_id,
                        service_id,
                    });
                }
            }

            cursor += step;
        }

        debug!("Found {} available slots", slots.len());
        Ok(slots)
    }
}

fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}
