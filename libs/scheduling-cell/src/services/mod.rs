pub mod availability;
pub mod booking;
pub mod lifecycle;
pub mod scheduling;

pub use availability::AvailabilityEngine;
pub use booking::PublicBookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use scheduling::SchedulingService;
