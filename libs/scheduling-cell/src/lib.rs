pub mod models;
pub mod services;
pub mod store;

// Re-export the domain model and services for external use
pub use models::*;
pub use services::*;

pub use store::{
    AppointmentStore, AuditTrail, ClientDirectory, EventPublisher, RestAppointmentStore,
    RestAuditTrail, RestClientDirectory, RestEventPublisher, RestServiceDirectory,
    RestSettingsStore, RestSlotLockStore, ServiceDirectory, SettingsStore, SlotLockStore,
    StoreError,
};
