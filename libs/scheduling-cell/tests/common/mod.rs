// libs/scheduling-cell/tests/common/mod.rs
//
// In-memory collaborator fakes and fixtures shared by the service-level
// integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use scheduling_cell::models::{
    Appointment, AppointmentEvent, AppointmentStatus, AuditEntry, ClientRecord,
    CreateAppointmentRequest, OrganizationScheduleSettings, PublicBookingRequest, ServiceRecord,
};
use scheduling_cell::services::{PublicBookingService, SchedulingService};
use scheduling_cell::store::{
    AppointmentStore, AuditTrail, ClientDirectory, EventPublisher, ServiceDirectory,
    SettingsStore, SlotLockStore, StoreError,
};

// ==============================================================================
// IN-MEMORY COLLABORATOR FAKES
// ==============================================================================

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    pub rows: Mutex<Vec<Appointment>>,
    pub force_version_conflict: AtomicBool,
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn get(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|a| a.organization_id == organization_id && a.id == appointment_id)
            .cloned())
    }

    async fn find_for_practitioner_day(
        &self,
        organization_id: Uuid,
        practitioner_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut found: Vec<Appointment> = rows
            .iter()
            .filter(|a| {
                a.organization_id == organization_id
                    && a.practitioner_id == practitioner_id
                    && a.date == date
                    && statuses.contains(&a.status)
            })
            .cloned()
            .collect();
        found.sort_by_key(|a| a.start_time);
        Ok(found)
    }

    async fn count_for_client_day(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        date: NaiveDate,
    ) -> Result<u32, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|a| {
                a.organization_id == organization_id
                    && a.client_id == client_id
                    && a.date == date
                    && a.is_active()
            })
            .count() as u32)
    }

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        rows.push(appointment.clone());
        Ok(appointment.clone())
    }

    async fn update(
        &self,
        appointment: &Appointment,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<Appointment, StoreError> {
        if self.force_version_conflict.load(Ordering::SeqCst) {
            return Err(StoreError::VersionConflict);
        }

        let mut rows = self.rows.lock().unwrap();
        let position = rows.iter().position(|a| {
            a.id == appointment.id
                && a.organization_id == appointment.organization_id
                && a.updated_at == expected_updated_at
        });

        match position {
            Some(index) => {
                rows[index] = appointment.clone();
                Ok(appointment.clone())
            }
            None => Err(StoreError::VersionConflict),
        }
    }
}

#[derive(Default)]
pub struct InMemorySettingsStore {
    pub rows: Mutex<HashMap<Uuid, OrganizationScheduleSettings>>,
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<OrganizationScheduleSettings>, StoreError> {
        Ok(self.rows.lock().unwrap().get(&organization_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryClientDirectory {
    pub rows: Mutex<Vec<ClientRecord>>,
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn get(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<ClientRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|c| c.organization_id == organization_id && c.id == client_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryServiceDirectory {
    pub rows: Mutex<Vec<ServiceRecord>>,
}

#[async_trait]
impl ServiceDirectory for InMemoryServiceDirectory {
    async fn get(
        &self,
        organization_id: Uuid,
        service_id: Uuid,
    ) -> Result<Option<ServiceRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|s| s.organization_id == organization_id && s.id == service_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemorySlotLockStore {
    pub held: Mutex<HashSet<String>>,
    pub deny_all: AtomicBool,
    pub acquire_calls: AtomicU32,
}

#[async_trait]
impl SlotLockStore for InMemorySlotLockStore {
    async fn acquire(&self, lock_key: &str, _ttl_seconds: u64) -> Result<bool, StoreError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_all.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.held.lock().unwrap().insert(lock_key.to_string()))
    }

    async fn release(&self, lock_key: &str) -> Result<(), StoreError> {
        self.held.lock().unwrap().remove(lock_key);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEventPublisher {
    pub events: Mutex<Vec<AppointmentEvent>>,
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: AppointmentEvent) -> Result<(), StoreError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAuditTrail {
    pub entries: Mutex<Vec<AuditEntry>>,
}

#[async_trait]
impl AuditTrail for RecordingAuditTrail {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

// ==============================================================================
// TEST CONTEXT
// ==============================================================================

pub struct TestContext {
    pub organization_id: Uuid,
    pub practitioner_id: Uuid,
    pub client_id: Uuid,
    pub service_id: Uuid,
    pub actor_id: Uuid,
    pub appointments: Arc<InMemoryAppointmentStore>,
    pub settings: Arc<InMemorySettingsStore>,
    pub clients: Arc<InMemoryClientDirectory>,
    pub services: Arc<InMemoryServiceDirectory>,
    pub locks: Arc<InMemorySlotLockStore>,
    pub events: Arc<RecordingEventPublisher>,
    pub audit: Arc<RecordingAuditTrail>,
    pub scheduling: Arc<SchedulingService>,
    pub booking: PublicBookingService,
}

pub const CLIENT_EMAIL: &str = "maria.santos@example.com";

impl TestContext {
    pub fn new() -> Self {
        let organization_id = Uuid::new_v4();
        let practitioner_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let service_id = Uuid::new_v4();
        let actor_id = Uuid::new_v4();

        let appointments = Arc::new(InMemoryAppointmentStore::default());
        let settings = Arc::new(InMemorySettingsStore::default());
        let clients = Arc::new(InMemoryClientDirectory::default());
        let services = Arc::new(InMemoryServiceDirectory::default());
        let locks = Arc::new(InMemorySlotLockStore::default());
        let events = Arc::new(RecordingEventPublisher::default());
        let audit = Arc::new(RecordingAuditTrail::default());

        settings.rows.lock().unwrap().insert(
            organization_id,
            OrganizationScheduleSettings::with_defaults(organization_id),
        );

        clients.rows.lock().unwrap().push(ClientRecord {
            id: client_id,
            organization_id,
            first_name: "Maria".to_string(),
            last_name: "Santos".to_string(),
            email: CLIENT_EMAIL.to_string(),
        });

        services.rows.lock().unwrap().push(ServiceRecord {
            id: service_id,
            organization_id,
            name: "Consultation".to_string(),
            duration_minutes: 30,
            practitioners: vec![practitioner_id],
            is_active: true,
        });

        let appointment_store: Arc<dyn AppointmentStore> = appointments.clone();
        let settings_store: Arc<dyn SettingsStore> = settings.clone();
        let client_directory: Arc<dyn ClientDirectory> = clients.clone();
        let service_directory: Arc<dyn ServiceDirectory> = services.clone();
        let slot_locks: Arc<dyn SlotLockStore> = locks.clone();
        let event_publisher: Arc<dyn EventPublisher> = events.clone();
        let audit_trail: Arc<dyn AuditTrail> = audit.clone();

        let scheduling = Arc::new(SchedulingService::new(
            appointment_store,
            settings_store.clone(),
            client_directory.clone(),
            service_directory.clone(),
            slot_locks,
            event_publisher,
            audit_trail,
        ));

        let booking = PublicBookingService::new(
            scheduling.clone(),
            settings_store,
            client_directory,
            service_directory,
        );

        Self {
            organization_id,
            practitioner_id,
            client_id,
            service_id,
            actor_id,
            appointments,
            settings,
            clients,
            services,
            locks,
            events,
            audit,
            scheduling,
            booking,
        }
    }

    pub fn update_settings(&self, apply: impl FnOnce(&mut OrganizationScheduleSettings)) {
        let mut rows = self.settings.rows.lock().unwrap();
        let settings = rows
            .get_mut(&self.organization_id)
            .expect("settings fixture present");
        apply(settings);
    }

    /// Seed an appointment directly into the store, bypassing the service.
    pub fn seed_appointment(
        &self,
        date: NaiveDate,
        start_time: &str,
        duration_minutes: u32,
        status: AppointmentStatus,
    ) -> Appointment {
        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            organization_id: self.organization_id,
            client_id: self.client_id,
            practitioner_id: self.practitioner_id,
            service_id: self.service_id,
            date,
            start_time: time(start_time),
            duration_minutes,
            status,
            reminders: vec![],
            notes: None,
            created_at: now,
            updated_at: now,
        };
        self.appointments
            .rows
            .lock()
            .unwrap()
            .push(appointment.clone());
        appointment
    }

    /// Seed an appointment starting at an exact UTC instant.
    pub fn seed_appointment_at(
        &self,
        start: DateTime<Utc>,
        duration_minutes: u32,
        status: AppointmentStatus,
    ) -> Appointment {
        let appointment = self.seed_appointment(
            start.date_naive(),
            &start.format("%H:%M").to_string(),
            duration_minutes,
            status,
        );
        appointment
    }

    pub fn create_request(&self, date: NaiveDate, start_time: &str) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            client_id: self.client_id,
            practitioner_id: self.practitioner_id,
            service_id: self.service_id,
            date: wire_date(date),
            start_time: start_time.to_string(),
            duration_minutes: None,
            notes: None,
        }
    }

    pub fn booking_request(&self, date: NaiveDate, start_time: &str) -> PublicBookingRequest {
        PublicBookingRequest {
            client_id: self.client_id,
            service_id: self.service_id,
            practitioner_id: Some(self.practitioner_id),
            date: wire_date(date),
            start_time: start_time.to_string(),
            notes: None,
        }
    }

    pub fn stored_appointment(&self, id: Uuid) -> Appointment {
        self.appointments
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .expect("appointment present in store")
    }
}

// ==============================================================================
// DATE AND TIME HELPERS
// ==============================================================================

pub fn time(value: &str) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M").expect("valid fixture time")
}

pub fn wire_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn next_matching_day(min_days_ahead: i64, predicate: impl Fn(Weekday) -> bool) -> NaiveDate {
    let mut date = Utc::now().date_naive() + Duration::days(min_days_ahead);
    while !predicate(date.weekday()) {
        date += Duration::days(1);
    }
    date
}

/// A weekday (Mon-Fri) at least a week out, safely inside the default
/// 30-day advance-booking window.
pub fn upcoming_open_day() -> NaiveDate {
    next_matching_day(7, |weekday| {
        !matches!(weekday, Weekday::Sat | Weekday::Sun)
    })
}

/// A Saturday at least a week out; closed under the default working hours.
pub fn upcoming_closed_day() -> NaiveDate {
    next_matching_day(7, |weekday| weekday == Weekday::Sat)
}
