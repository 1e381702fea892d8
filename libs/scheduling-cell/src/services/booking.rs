// libs/scheduling-cell/src/services/booking.rs
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    parse_wire_date, parse_wire_time, Appointment, AvailableSlot, ClientRecord,
    CreateAppointmentRequest, OrganizationScheduleSettings, PublicBookingRequest, SchedulingError,
    ServiceRecord, UpdateAppointmentRequest,
};
use crate::services::scheduling::SchedulingService;
use crate::store::{ClientDirectory, ServiceDirectory, SettingsStore};

/// Client-initiated booking flow. Thin layer over the scheduling service that
/// adds the online-booking gate, booking-window rules, practitioner
/// auto-selection and email identity verification.
pub struct PublicBookingService {
    scheduling: Arc<SchedulingService>,
    settings: Arc<dyn SettingsStore>,
    clients: Arc<dyn ClientDirectory>,
    services: Arc<dyn ServiceDirectory>,
}

impl PublicBookingService {
    pub fn new(
        scheduling: Arc<SchedulingService>,
        settings: Arc<dyn SettingsStore>,
        clients: Arc<dyn ClientDirectory>,
        services: Arc<dyn ServiceDirectory>,
    ) -> Self {
        Self {
            scheduling,
            settings,
            clients,
            services,
        }
    }

    /// Book an appointment on behalf of a client. When no practitioner is
    /// named, the first eligible practitioner free at the requested slot is
    /// chosen. Identity verification applies to modify/cancel, not creation.
    pub async fn book_appointment(
        &self,
        request: PublicBookingRequest,
        organization_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        info!(
            "Public booking request for client {} in organization {}",
            request.client_id, organization_id
        );

        let settings = self.online_booking_settings(organization_id).await?;

        let date = parse_wire_date(&request.date)?;
        let start_time = parse_wire_time(&request.start_time)?;
        self.enforce_booking_window(&settings, date)?;

        let service = self.active_service(organization_id, request.service_id).await?;

        let client = self.client_record(organization_id, request.client_id).await?;

        let practitioner_id = match request.practitioner_id {
            Some(practitioner_id) => {
                if !service.practitioners.contains(&practitioner_id) {
                    return Err(SchedulingError::Validation(
                        "Practitioner does not offer the requested service".to_string(),
                    ));
                }
                practitioner_id
            }
            None => {
                self.select_practitioner(
                    organization_id,
                    &service,
                    date,
                    start_time,
                    service.duration_minutes,
                )
                .await?
            }
        };

        let create = CreateAppointmentRequest {
            client_id: client.id,
            practitioner_id,
            service_id: service.id,
            date: request.date,
            start_time: request.start_time,
            duration_minutes: None,
            notes: request.notes,
        };

        self.scheduling
            .create_appointment(create, organization_id, client.id)
            .await
    }

    /// Cancel a booking after proving ownership of the booking email. The
    /// cancellation deadline is enforced by the scheduling service.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        organization_id: Uuid,
        requester_email: &str,
        reason: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        self.online_booking_settings(organization_id).await?;

        let appointment = self
            .scheduling
            .get_appointment(appointment_id, organization_id)
            .await?;
        let client = self
            .verify_client_identity(organization_id, appointment.client_id, requester_email)
            .await?;

        self.scheduling
            .cancel_appointment(appointment_id, organization_id, client.id, reason)
            .await
    }

    /// Move a booking to a new date/time. The cancellation deadline doubles as
    /// the modification deadline.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        organization_id: Uuid,
        requester_email: &str,
        new_date: String,
        new_start_time: String,
    ) -> Result<Appointment, SchedulingError> {
        let settings = self.online_booking_settings(organization_id).await?;

        let date = parse_wire_date(&new_date)?;
        parse_wire_time(&new_start_time)?;
        self.enforce_booking_window(&settings, date)?;

        let appointment = self
            .scheduling
            .get_appointment(appointment_id, organization_id)
            .await?;
        let client = self
            .verify_client_identity(organization_id, appointment.client_id, requester_email)
            .await?;

        let deadline_hours = settings.booking_rules.cancellation_deadline_hours;
        if !appointment.can_be_cancelled(deadline_hours, Utc::now()) {
            return Err(SchedulingError::Deadline {
                hours: deadline_hours,
            });
        }

        let update = UpdateAppointmentRequest {
            date: Some(new_date),
            start_time: Some(new_start_time),
            duration_minutes: None,
            practitioner_id: None,
            notes: None,
        };

        self.scheduling
            .update_appointment(appointment_id, update, organization_id, client.id)
            .await
    }

    /// Open slots for a service, merged across every eligible practitioner
    /// unless one is named. The merged set is sorted by start time.
    pub async fn available_slots(
        &self,
        organization_id: Uuid,
        service_id: Uuid,
        date: &str,
        practitioner_id: Option<Uuid>,
    ) -> Result<Vec<AvailableSlot>, SchedulingError> {
        let settings = self.online_booking_settings(organization_id).await?;

        let date = parse_wire_date(date)?;
        self.enforce_booking_window(&settings, date)?;

        let service = self.active_service(organization_id, service_id).await?;

        let practitioners: Vec<Uuid> = match practitioner_id {
            Some(id) => {
                if !service.practitioners.contains(&id) {
                    return Err(SchedulingError::Validation(
                        "Practitioner does not offer the requested service".to_string(),
                    ));
                }
                vec![id]
            }
            None => service.practitioners.clone(),
        };

        let mut slots = Vec::new();
        for practitioner in practitioners {
            let mut per_practitioner = self
                .scheduling
                .engine()
                .available_slots(
                    organization_id,
                    practitioner,
                    date,
                    Some(service.id),
                    Some(service.duration_minutes),
                    None,
                )
                .await?;
            slots.append(&mut per_practitioner);
        }

        slots.sort_by_key(|slot| slot.start_time);

        debug!(
            "{} public slots available for service {} on {}",
            slots.len(),
            service.id,
            date
        );
        Ok(slots)
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn online_booking_settings(
        &self,
        organization_id: Uuid,
    ) -> Result<OrganizationScheduleSettings, SchedulingError> {
        let settings = self
            .settings
            .get(organization_id)
            .await
            .map_err(SchedulingError::from)?
            .ok_or_else(|| SchedulingError::NotFound("Organization schedule settings".to_string()))?;

        if !settings.booking_rules.allow_online_booking {
            return Err(SchedulingError::Validation(
                "Online booking is not enabled for this organization".to_string(),
            ));
        }

        Ok(settings)
    }

    fn enforce_booking_window(
        &self,
        settings: &OrganizationScheduleSettings,
        date: NaiveDate,
    ) -> Result<(), SchedulingError> {
        let today = Utc::now().date_naive();

        if date < today {
            return Err(SchedulingError::Validation(
                "Requested date is in the past".to_string(),
            ));
        }

        if date == today && !settings.booking_rules.allow_same_day_booking {
            return Err(SchedulingError::Validation(
                "Same-day booking is not allowed".to_string(),
            ));
        }

        let horizon = today + Duration::days(settings.booking_rules.advance_booking_days as i64);
        if date > horizon {
            return Err(SchedulingError::Validation(format!(
                "Bookings can be made at most {} days in advance",
                settings.booking_rules.advance_booking_days
            )));
        }

        Ok(())
    }

    async fn active_service(
        &self,
        organization_id: Uuid,
        service_id: Uuid,
    ) -> Result<ServiceRecord, SchedulingError> {
        let service = self
            .services
            .get(organization_id, service_id)
            .await
            .map_err(SchedulingError::from)?
            .ok_or_else(|| SchedulingError::NotFound("Service".to_string()))?;

        if !service.is_active {
            return Err(SchedulingError::Validation(
                "Service is not open for online booking".to_string(),
            ));
        }

        Ok(service)
    }

    async fn client_record(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
    ) -> Result<ClientRecord, SchedulingError> {
        self.clients
            .get(organization_id, client_id)
            .await
            .map_err(SchedulingError::from)?
            .ok_or_else(|| SchedulingError::NotFound("Client".to_string()))
    }

    async fn verify_client_identity(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        requester_email: &str,
    ) -> Result<ClientRecord, SchedulingError> {
        let client = self.client_record(organization_id, client_id).await?;

        if !client.email.trim().eq_ignore_ascii_case(requester_email.trim()) {
            return Err(SchedulingError::Authorization(
                "Email does not match the client on this booking".to_string(),
            ));
        }

        Ok(client)
    }

    async fn select_practitioner(
        &self,
        organization_id: Uuid,
        service: &ServiceRecord,
        date: NaiveDate,
        start_time: chrono::NaiveTime,
        duration_minutes: u32,
    ) -> Result<Uuid, SchedulingError> {
        for practitioner_id in &service.practitioners {
            let conflicts = self
                .scheduling
                .engine()
                .check_availability(
                    organization_id,
                    *practitioner_id,
                    date,
                    start_time,
                    duration_minutes,
                    None,
                )
                .await?;

            if conflicts.is_empty() {
                debug!("Auto-selected practitioner {}", practitioner_id);
                return Ok(*practitioner_id);
            }
        }

        Err(SchedulingError::Conflict(vec![
            "No practitioner is available for the requested slot".to_string(),
        ]))
    }
}
