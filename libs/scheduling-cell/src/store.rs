// libs/scheduling-cell/src/store.rs
//
// Collaborator interfaces for the scheduling core, plus implementations backed
// by the PostgREST-style document store. Services receive these as trait
// objects at construction time; tests substitute in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::StoreClient;

use crate::models::{
    Appointment, AppointmentEvent, AppointmentStatus, AuditEntry, ClientRecord,
    OrganizationScheduleSettings, SchedulingError, ServiceRecord,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("record was modified concurrently")]
    VersionConflict,

    #[error("store request failed: {0}")]
    Request(String),
}

impl From<StoreError> for SchedulingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict => SchedulingError::Conflict(vec![
                "Appointment was modified concurrently, please retry".to_string(),
            ]),
            other => SchedulingError::Store(other.to_string()),
        }
    }
}

// ==============================================================================
// COLLABORATOR TRAITS
// ==============================================================================

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Appointments for one practitioner on one calendar day, filtered to the
    /// given statuses, ordered by start time.
    async fn find_for_practitioner_day(
        &self,
        organization_id: Uuid,
        practitioner_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Active appointments a client already holds on a calendar day.
    async fn count_for_client_day(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        date: NaiveDate,
    ) -> Result<u32, StoreError>;

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError>;

    /// Conditional write: only succeeds while the stored `updated_at` still
    /// equals `expected_updated_at`, otherwise `VersionConflict`.
    async fn update(
        &self,
        appointment: &Appointment,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<Appointment, StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<OrganizationScheduleSettings>, StoreError>;
}

#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn get(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<ClientRecord>, StoreError>;
}

#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    async fn get(
        &self,
        organization_id: Uuid,
        service_id: Uuid,
    ) -> Result<Option<ServiceRecord>, StoreError>;
}

/// Write serialization per `(organization, practitioner, date)` key. The
/// availability check and the subsequent write are not atomic on their own;
/// holding a lock row for the duration closes the double-booking race.
#[async_trait]
pub trait SlotLockStore: Send + Sync {
    async fn acquire(&self, lock_key: &str, ttl_seconds: u64) -> Result<bool, StoreError>;
    async fn release(&self, lock_key: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: AppointmentEvent) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError>;
}

// ==============================================================================
// REST-BACKED IMPLEMENTATIONS
// ==============================================================================

fn request_error(err: anyhow::Error) -> StoreError {
    StoreError::Request(err.to_string())
}

fn parse_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| StoreError::Request(format!("failed to parse store rows: {}", e)))
}

fn representation_headers() -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        "Prefer",
        reqwest::header::HeaderValue::from_static("return=representation"),
    );
    headers
}

pub struct RestAppointmentStore {
    store: Arc<StoreClient>,
}

impl RestAppointmentStore {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AppointmentStore for RestAppointmentStore {
    async fn get(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?organization_id=eq.{}&id=eq.{}",
            organization_id, appointment_id
        );
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(request_error)?;

        Ok(parse_rows::<Appointment>(rows)?.into_iter().next())
    }

    async fn find_for_practitioner_day(
        &self,
        organization_id: Uuid,
        practitioner_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError> {
        let status_filter = statuses
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let path = format!(
            "/rest/v1/appointments?organization_id=eq.{}&practitioner_id=eq.{}&date=eq.{}&status=in.({})&order=start_time.asc",
            organization_id, practitioner_id, date, status_filter
        );

        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(request_error)?;

        parse_rows(rows)
    }

    async fn count_for_client_day(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
        date: NaiveDate,
    ) -> Result<u32, StoreError> {
        let path = format!(
            "/rest/v1/appointments?organization_id=eq.{}&client_id=eq.{}&date=eq.{}&status=in.(scheduled,confirmed)",
            organization_id, client_id, date
        );
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(request_error)?;

        Ok(rows.len() as u32)
    }

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let body = serde_json::to_value(appointment)
            .map_err(|e| StoreError::Request(format!("failed to serialize appointment: {}", e)))?;

        let rows: Vec<Value> = self
            .store
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(body),
                Some(representation_headers()),
            )
            .await
            .map_err(request_error)?;

        parse_rows::<Appointment>(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Request("insert returned no representation".to_string()))
    }

    async fn update(
        &self,
        appointment: &Appointment,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<Appointment, StoreError> {
        // The updated_at filter makes the write conditional: a concurrent
        // writer bumps the stamp and this PATCH matches zero rows.
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&organization_id=eq.{}&updated_at=eq.{}",
            appointment.id,
            appointment.organization_id,
            expected_updated_at.to_rfc3339()
        );
        let body = serde_json::to_value(appointment)
            .map_err(|e| StoreError::Request(format!("failed to serialize appointment: {}", e)))?;

        let rows: Vec<Value> = self
            .store
            .request_with_headers(Method::PATCH, &path, Some(body), Some(representation_headers()))
            .await
            .map_err(request_error)?;

        parse_rows::<Appointment>(rows)?
            .into_iter()
            .next()
            .ok_or(StoreError::VersionConflict)
    }
}

pub struct RestSettingsStore {
    store: Arc<StoreClient>,
}

impl RestSettingsStore {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SettingsStore for RestSettingsStore {
    async fn get(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<OrganizationScheduleSettings>, StoreError> {
        let path = format!(
            "/rest/v1/organization_schedule_settings?organization_id=eq.{}",
            organization_id
        );
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(request_error)?;

        Ok(parse_rows::<OrganizationScheduleSettings>(rows)?
            .into_iter()
            .next())
    }
}

pub struct RestClientDirectory {
    store: Arc<StoreClient>,
}

impl RestClientDirectory {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ClientDirectory for RestClientDirectory {
    async fn get(
        &self,
        organization_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<ClientRecord>, StoreError> {
        let path = format!(
            "/rest/v1/clients?organization_id=eq.{}&id=eq.{}",
            organization_id, client_id
        );
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(request_error)?;

        Ok(parse_rows::<ClientRecord>(rows)?.into_iter().next())
    }
}

pub struct RestServiceDirectory {
    store: Arc<StoreClient>,
}

impl RestServiceDirectory {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ServiceDirectory for RestServiceDirectory {
    async fn get(
        &self,
        organization_id: Uuid,
        service_id: Uuid,
    ) -> Result<Option<ServiceRecord>, StoreError> {
        let path = format!(
            "/rest/v1/services?organization_id=eq.{}&id=eq.{}",
            organization_id, service_id
        );
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(request_error)?;

        Ok(parse_rows::<ServiceRecord>(rows)?.into_iter().next())
    }
}

/// Lock rows live in the store itself; inserting an existing key fails, which
/// doubles as the mutual-exclusion primitive.
pub struct RestSlotLockStore {
    store: Arc<StoreClient>,
}

impl RestSlotLockStore {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    async fn try_insert_lock(&self, lock_key: &str, ttl_seconds: u64) -> bool {
        let now = Utc::now();
        let lock_data = serde_json::json!({
            "lock_key": lock_key,
            "acquired_at": now.to_rfc3339(),
            "expires_at": (now + chrono::Duration::seconds(ttl_seconds as i64)).to_rfc3339(),
        });

        self.store
            .request::<Value>(Method::POST, "/rest/v1/scheduling_locks", Some(lock_data))
            .await
            .is_ok()
    }

    async fn cleanup_expired_lock(&self, lock_key: &str) -> Result<bool, StoreError> {
        let path = format!("/rest/v1/scheduling_locks?lock_key=eq.{}", lock_key);
        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(request_error)?;

        let Some(lock) = rows.first() else {
            return Ok(true);
        };

        let expired = lock
            .get("expires_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc) < Utc::now())
            .unwrap_or(false);

        if expired {
            self.release(lock_key).await?;
            return Ok(true);
        }

        Ok(false)
    }
}

#[async_trait]
impl SlotLockStore for RestSlotLockStore {
    async fn acquire(&self, lock_key: &str, ttl_seconds: u64) -> Result<bool, StoreError> {
        if self.try_insert_lock(lock_key, ttl_seconds).await {
            debug!("Scheduling lock acquired: {}", lock_key);
            return Ok(true);
        }

        // Holder may have died; a stale row past its expiry can be reclaimed.
        if self.cleanup_expired_lock(lock_key).await? {
            let acquired = self.try_insert_lock(lock_key, ttl_seconds).await;
            return Ok(acquired);
        }

        Ok(false)
    }

    async fn release(&self, lock_key: &str) -> Result<(), StoreError> {
        let path = format!("/rest/v1/scheduling_locks?lock_key=eq.{}", lock_key);
        let _: Value = self
            .store
            .request(Method::DELETE, &path, None)
            .await
            .map_err(request_error)?;

        debug!("Scheduling lock released: {}", lock_key);
        Ok(())
    }
}

/// Persists lifecycle events for the notification subsystem to pick up.
pub struct RestEventPublisher {
    store: Arc<StoreClient>,
}

impl RestEventPublisher {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventPublisher for RestEventPublisher {
    async fn publish(&self, event: AppointmentEvent) -> Result<(), StoreError> {
        let body = serde_json::to_value(&event)
            .map_err(|e| StoreError::Request(format!("failed to serialize event: {}", e)))?;

        let _: Value = self
            .store
            .request(Method::POST, "/rest/v1/appointment_events", Some(body))
            .await
            .map_err(request_error)?;

        Ok(())
    }
}

pub struct RestAuditTrail {
    store: Arc<StoreClient>,
}

impl RestAuditTrail {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditTrail for RestAuditTrail {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let body = serde_json::to_value(&entry)
            .map_err(|e| StoreError::Request(format!("failed to serialize audit entry: {}", e)))?;

        let _: Value = self
            .store
            .request(Method::POST, "/rest/v1/appointment_audit_log", Some(body))
            .await
            .map_err(request_error)?;

        Ok(())
    }
}
