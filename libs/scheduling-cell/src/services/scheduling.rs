// libs/scheduling-cell/src/services/scheduling.rs
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    minutes_of, parse_wire_date, parse_wire_time, Appointment, AppointmentEvent,
    AppointmentStatus, AuditEntry, AvailableSlot, Conflict, CreateAppointmentRequest,
    OrganizationScheduleSettings, SchedulingError, UpdateAppointmentRequest, MINUTES_PER_DAY,
};
use crate::services::availability::AvailabilityEngine;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::store::{
    AppointmentStore, AuditTrail, ClientDirectory, EventPublisher, ServiceDirectory,
    SettingsStore, SlotLockStore,
};

/// Staff-facing scheduling operations. Every collaborator is injected at
/// construction; the service holds no global state.
pub struct SchedulingService {
    appointments: Arc<dyn AppointmentStore>,
    settings: Arc<dyn SettingsStore>,
    clients: Arc<dyn ClientDirectory>,
    services: Arc<dyn ServiceDirectory>,
    slot_locks: Arc<dyn SlotLockStore>,
    events: Arc<dyn EventPublisher>,
    audit: Arc<dyn AuditTrail>,
    engine: AvailabilityEngine,
    lifecycle: AppointmentLifecycleService,
    lock_ttl_seconds: u64,
    max_lock_attempts: u32,
}

impl SchedulingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        settings: Arc<dyn SettingsStore>,
        clients: Arc<dyn ClientDirectory>,
        services: Arc<dyn ServiceDirectory>,
        slot_locks: Arc<dyn SlotLockStore>,
        events: Arc<dyn EventPublisher>,
        audit: Arc<dyn AuditTrail>,
    ) -> Self {
        let engine = AvailabilityEngine::new(Arc::clone(&appointments), Arc::clone(&settings));

        Self {
            appointments,
            settings,
            clients,
            services,
            slot_locks,
            events,
            audit,
            engine,
            lifecycle: AppointmentLifecycleService::new(),
            lock_ttl_seconds: 30,
            max_lock_attempts: 3,
        }
    }

    pub fn engine(&self) -> &AvailabilityEngine {
        &self.engine
    }

    /// Book a new appointment for a client. The availability check and the
    /// write run under a per-slot lock so concurrent requests for the same
    /// practitioner/day cannot both pass the check.
    pub async fn create_appointment(
        &self,
        request: CreateAppointmentRequest,
        organization_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        info!(
            "Creating appointment for client {} with practitioner {}",
            request.client_id, request.practitioner_id
        );

        let settings = self.organization_settings(organization_id).await?;

        let date = parse_wire_date(&request.date)?;
        let start_time = parse_wire_time(&request.start_time)?;

        let service = self
            .services
            .get(organization_id, request.service_id)
            .await
            .map_err(SchedulingError::from)?
            .ok_or_else(|| SchedulingError::NotFound("Service".to_string()))?;

        // An explicit zero is a caller mistake; the fallback only covers
        // requests that leave the duration out entirely.
        let duration = match request.duration_minutes {
            Some(duration) => duration,
            None if service.duration_minutes > 0 => service.duration_minutes,
            None => settings.default_appointment_duration,
        };
        self.validate_timing(date, minutes_of(start_time), duration)?;

        self.clients
            .get(organization_id, request.client_id)
            .await
            .map_err(SchedulingError::from)?
            .ok_or_else(|| SchedulingError::NotFound("Client".to_string()))?;

        if let Some(max_per_day) = settings.booking_rules.max_appointments_per_day {
            let held = self
                .appointments
                .count_for_client_day(organization_id, request.client_id, date)
                .await
                .map_err(SchedulingError::from)?;
            if held >= max_per_day {
                return Err(SchedulingError::Validation(format!(
                    "Client already holds the maximum of {} appointments for this day",
                    max_per_day
                )));
            }
        }

        let lock_key = slot_lock_key(organization_id, request.practitioner_id, date);
        self.acquire_slot_lock(&lock_key).await?;

        let result = self
            .create_under_lock(request, organization_id, actor_id, date, start_time, duration)
            .await;

        self.release_slot_lock(&lock_key).await;
        result
    }

    async fn create_under_lock(
        &self,
        request: CreateAppointmentRequest,
        organization_id: Uuid,
        actor_id: Uuid,
        date: NaiveDate,
        start_time: chrono::NaiveTime,
        duration: u32,
    ) -> Result<Appointment, SchedulingError> {
        let conflicts = self
            .engine
            .check_availability(
                organization_id,
                request.practitioner_id,
                date,
                start_time,
                duration,
                None,
            )
            .await?;

        if !conflicts.is_empty() {
            return Err(conflict_error(conflicts));
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            organization_id,
            client_id: request.client_id,
            practitioner_id: request.practitioner_id,
            service_id: request.service_id,
            date,
            start_time,
            duration_minutes: duration,
            status: AppointmentStatus::Scheduled,
            reminders: vec![],
            notes: request.notes,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .appointments
            .insert(&appointment)
            .await
            .map_err(SchedulingError::from)?;

        self.record_audit(AuditEntry::new(
            &created,
            "created",
            actor_id,
            None,
            Some(created.status.to_string()),
            None,
        ))
        .await?;

        self.publish(AppointmentEvent::Created {
            appointment: created.clone(),
        })
        .await?;

        info!("Appointment {} created", created.id);
        Ok(created)
    }

    /// Update an existing appointment. Timing or practitioner changes re-run
    /// the availability check with the appointment's own id excluded, and the
    /// final write is conditional on the loaded `updated_at` stamp.
    pub async fn update_appointment(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        organization_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Updating appointment {}", appointment_id);

        let current = self.get_appointment(appointment_id, organization_id).await?;

        if !current.can_be_modified() {
            return Err(SchedulingError::Validation(format!(
                "Appointment in status '{}' can no longer be modified",
                current.status
            )));
        }

        let timing_changed = request.changes_timing();

        let mut updated = current.clone();
        if let Some(ref date) = request.date {
            updated.date = parse_wire_date(date)?;
        }
        if let Some(ref start_time) = request.start_time {
            updated.start_time = parse_wire_time(start_time)?;
        }
        if let Some(duration) = request.duration_minutes {
            updated.duration_minutes = duration;
        }
        if let Some(practitioner_id) = request.practitioner_id {
            updated.practitioner_id = practitioner_id;
        }
        if let Some(notes) = request.notes {
            updated.notes = Some(notes);
        }

        if timing_changed {
            self.validate_timing(updated.date, updated.start_minutes(), updated.duration_minutes)?;

            let lock_key = slot_lock_key(organization_id, updated.practitioner_id, updated.date);
            self.acquire_slot_lock(&lock_key).await?;

            let check = self
                .engine
                .check_availability(
                    organization_id,
                    updated.practitioner_id,
                    updated.date,
                    updated.start_time,
                    updated.duration_minutes,
                    Some(updated.id),
                )
                .await;

            let result = match check {
                Ok(conflicts) if !conflicts.is_empty() => Err(conflict_error(conflicts)),
                Ok(_) => self.write_update(&current, updated, actor_id).await,
                Err(e) => Err(e),
            };

            self.release_slot_lock(&lock_key).await;
            return result;
        }

        self.write_update(&current, updated, actor_id).await
    }

    async fn write_update(
        &self,
        current: &Appointment,
        mut updated: Appointment,
        actor_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        updated.updated_at = Utc::now();

        let stored = self
            .appointments
            .update(&updated, current.updated_at)
            .await
            .map_err(SchedulingError::from)?;

        self.record_audit(AuditEntry::new(
            &stored,
            "updated",
            actor_id,
            Some(format!("{} {}", current.date, current.start_time.format("%H:%M"))),
            Some(format!("{} {}", stored.date, stored.start_time.format("%H:%M"))),
            None,
        ))
        .await?;

        self.publish(AppointmentEvent::Updated {
            appointment: stored.clone(),
        })
        .await?;

        info!("Appointment {} updated", stored.id);
        Ok(stored)
    }

    /// Apply a status transition after validating it against the state
    /// machine. Cancellations raise a dedicated lifecycle event.
    pub async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        organization_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.get_appointment(appointment_id, organization_id).await?;

        self.lifecycle
            .validate_status_transition(current.status, new_status)?;

        let previous_status = current.status;
        let mut updated = current.clone();
        updated.status = new_status;
        updated.updated_at = Utc::now();

        let stored = self
            .appointments
            .update(&updated, current.updated_at)
            .await
            .map_err(SchedulingError::from)?;

        self.record_audit(AuditEntry::new(
            &stored,
            "status_changed",
            actor_id,
            Some(previous_status.to_string()),
            Some(new_status.to_string()),
            reason.clone(),
        ))
        .await?;

        let event = if new_status == AppointmentStatus::Cancelled {
            AppointmentEvent::Cancelled {
                appointment: stored.clone(),
                reason,
            }
        } else {
            AppointmentEvent::StatusChanged {
                appointment: stored.clone(),
                previous_status,
            }
        };
        self.publish(event).await?;

        info!(
            "Appointment {} transitioned {} -> {}",
            stored.id, previous_status, new_status
        );
        Ok(stored)
    }

    pub async fn confirm_appointment(
        &self,
        appointment_id: Uuid,
        organization_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        self.update_appointment_status(
            appointment_id,
            AppointmentStatus::Confirmed,
            organization_id,
            actor_id,
            None,
        )
        .await
    }

    pub async fn complete_appointment(
        &self,
        appointment_id: Uuid,
        organization_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        self.update_appointment_status(
            appointment_id,
            AppointmentStatus::Completed,
            organization_id,
            actor_id,
            None,
        )
        .await
    }

    pub async fn mark_as_no_show(
        &self,
        appointment_id: Uuid,
        organization_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        self.update_appointment_status(
            appointment_id,
            AppointmentStatus::NoShow,
            organization_id,
            actor_id,
            reason,
        )
        .await
    }

    /// Cancel within the organization's notice window. A cancellation past the
    /// deadline fails with a deadline error, not a generic validation failure.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        organization_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.get_appointment(appointment_id, organization_id).await?;

        self.lifecycle
            .validate_status_transition(current.status, AppointmentStatus::Cancelled)?;

        let settings = self.organization_settings(organization_id).await?;
        let deadline_hours = settings.booking_rules.cancellation_deadline_hours;
        if !current.can_be_cancelled(deadline_hours, Utc::now()) {
            return Err(SchedulingError::Deadline {
                hours: deadline_hours,
            });
        }

        self.update_appointment_status(
            appointment_id,
            AppointmentStatus::Cancelled,
            organization_id,
            actor_id,
            reason,
        )
        .await
    }

    /// Soft delete: the record is cancelled, never removed, so the audit
    /// trail stays intact. No deadline applies to a staff delete.
    pub async fn delete_appointment(
        &self,
        appointment_id: Uuid,
        organization_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> Result<(), SchedulingError> {
        self.update_appointment_status(
            appointment_id,
            AppointmentStatus::Cancelled,
            organization_id,
            actor_id,
            reason.or_else(|| Some("deleted".to_string())),
        )
        .await?;

        Ok(())
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        self.appointments
            .get(organization_id, appointment_id)
            .await
            .map_err(SchedulingError::from)?
            .ok_or_else(|| SchedulingError::NotFound("Appointment".to_string()))
    }

    /// Availability check for a proposed slot, wire-format in.
    pub async fn check_availability(
        &self,
        organization_id: Uuid,
        practitioner_id: Uuid,
        date: &str,
        start_time: &str,
        duration_minutes: u32,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Conflict>, SchedulingError> {
        let date = parse_wire_date(date)?;
        let start_time = parse_wire_time(start_time)?;

        self.engine
            .check_availability(
                organization_id,
                practitioner_id,
                date,
                start_time,
                duration_minutes,
                exclude_appointment_id,
            )
            .await
    }

    /// Open slots for an explicit practitioner, optionally shaped by a
    /// service's duration.
    pub async fn available_slots(
        &self,
        organization_id: Uuid,
        practitioner_id: Uuid,
        date: &str,
        service_id: Option<Uuid>,
        duration_minutes: Option<u32>,
    ) -> Result<Vec<AvailableSlot>, SchedulingError> {
        let date = parse_wire_date(date)?;

        let service_duration = match service_id {
            Some(id) => {
                let service = self
                    .services
                    .get(organization_id, id)
                    .await
                    .map_err(SchedulingError::from)?
                    .ok_or_else(|| SchedulingError::NotFound("Service".to_string()))?;
                Some(service.duration_minutes)
            }
            None => None,
        };

        self.engine
            .available_slots(
                organization_id,
                practitioner_id,
                date,
                service_id,
                service_duration,
                duration_minutes,
            )
            .await
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn organization_settings(
        &self,
        organization_id: Uuid,
    ) -> Result<OrganizationScheduleSettings, SchedulingError> {
        let settings = self
            .settings
            .get(organization_id)
            .await
            .map_err(SchedulingError::from)?
            .ok_or_else(|| SchedulingError::NotFound("Organization schedule settings".to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate_timing(
        &self,
        date: NaiveDate,
        start_minutes: u32,
        duration_minutes: u32,
    ) -> Result<(), SchedulingError> {
        if duration_minutes == 0 || duration_minutes > MINUTES_PER_DAY {
            return Err(SchedulingError::Validation(format!(
                "Duration must be between 1 and {} minutes",
                MINUTES_PER_DAY
            )));
        }

        if start_minutes + duration_minutes > MINUTES_PER_DAY {
            return Err(SchedulingError::Validation(
                "Appointment must not run past midnight".to_string(),
            ));
        }

        let start_instant = date
            .and_time(
                crate::models::time_from_minutes(start_minutes).unwrap_or_default(),
            )
            .and_utc();
        if start_instant <= Utc::now() {
            return Err(SchedulingError::Validation(
                "Appointment must be scheduled in the future".to_string(),
            ));
        }

        Ok(())
    }

    async fn acquire_slot_lock(&self, lock_key: &str) -> Result<(), SchedulingError> {
        for attempt in 1..=self.max_lock_attempts {
            let acquired = self
                .slot_locks
                .acquire(lock_key, self.lock_ttl_seconds)
                .await
                .map_err(SchedulingError::from)?;
            if acquired {
                return Ok(());
            }

            if attempt < self.max_lock_attempts {
                warn!(
                    "Slot lock contention on {}, attempt {}/{}",
                    lock_key, attempt, self.max_lock_attempts
                );
                tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
            }
        }

        Err(SchedulingError::Conflict(vec![
            "The requested slot is being booked by another request, please retry".to_string(),
        ]))
    }

    async fn release_slot_lock(&self, lock_key: &str) {
        // TTL expiry reclaims the lock if the release itself fails.
        if let Err(e) = self.slot_locks.release(lock_key).await {
            warn!("Failed to release slot lock {}: {}", lock_key, e);
        }
    }

    async fn record_audit(&self, entry: AuditEntry) -> Result<(), SchedulingError> {
        self.audit.record(entry).await.map_err(SchedulingError::from)
    }

    async fn publish(&self, event: AppointmentEvent) -> Result<(), SchedulingError> {
        self.events.publish(event).await.map_err(SchedulingError::from)
    }
}

fn slot_lock_key(organization_id: Uuid, practitioner_id: Uuid, date: NaiveDate) -> String {
    format!("slot_{}_{}_{}", organization_id, practitioner_id, date)
}

fn conflict_error(conflicts: Vec<Conflict>) -> SchedulingError {
    SchedulingError::Conflict(conflicts.into_iter().map(|c| c.message).collect())
}
