// libs/scheduling-cell/tests/lifecycle_test.rs
//
// Status state machine and appointment entity predicates.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};

use common::TestContext;
use scheduling_cell::models::{AppointmentStatus, SchedulingError};
use scheduling_cell::services::AppointmentLifecycleService;

const ALL_STATUSES: [AppointmentStatus; 5] = [
    AppointmentStatus::Scheduled,
    AppointmentStatus::Confirmed,
    AppointmentStatus::Completed,
    AppointmentStatus::Cancelled,
    AppointmentStatus::NoShow,
];

fn allowed(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    matches!(
        (from, to),
        (Scheduled, Confirmed)
            | (Scheduled, Cancelled)
            | (Scheduled, NoShow)
            | (Confirmed, Completed)
            | (Confirmed, Cancelled)
            | (Confirmed, NoShow)
    )
}

#[test]
fn test_transition_table_is_exhaustive() {
    let lifecycle = AppointmentLifecycleService::new();

    for from in ALL_STATUSES {
        for to in ALL_STATUSES {
            let result = lifecycle.validate_status_transition(from, to);
            if allowed(from, to) {
                assert!(result.is_ok(), "{} -> {} should be allowed", from, to);
            } else {
                assert_matches!(
                    result,
                    Err(SchedulingError::InvalidTransition { .. }),
                    "{} -> {} should be rejected",
                    from,
                    to
                );
            }
        }
    }
}

#[test]
fn test_terminal_states_have_no_outgoing_transitions() {
    let lifecycle = AppointmentLifecycleService::new();

    for status in ALL_STATUSES {
        if status.is_terminal() {
            assert!(lifecycle.valid_transitions(status).is_empty());
        } else {
            assert!(!lifecycle.valid_transitions(status).is_empty());
        }
    }
}

#[test]
fn test_invalid_transition_error_names_both_states() {
    let lifecycle = AppointmentLifecycleService::new();

    let err = lifecycle
        .validate_status_transition(AppointmentStatus::Scheduled, AppointmentStatus::Completed)
        .unwrap_err();

    assert_matches!(
        err,
        SchedulingError::InvalidTransition {
            from: AppointmentStatus::Scheduled,
            to: AppointmentStatus::Completed,
        }
    );
    assert!(err.to_string().contains("scheduled"));
    assert!(err.to_string().contains("completed"));
}

// ==============================================================================
// ENTITY PREDICATES
// ==============================================================================

#[test]
fn test_can_be_modified_only_while_active() {
    let ctx = TestContext::new();
    let start = Utc::now() + Duration::days(3);

    for status in ALL_STATUSES {
        let appointment = ctx.seed_appointment_at(start, 30, status);
        assert_eq!(appointment.can_be_modified(), !status.is_terminal());
    }
}

#[test]
fn test_cancellation_deadline_boundary() {
    let ctx = TestContext::new();
    let start = Utc::now() + Duration::days(10);
    let appointment = ctx.seed_appointment_at(start, 30, AppointmentStatus::Scheduled);
    let start_instant = appointment.start_instant();

    // 24h + 1min of notice is enough, 23h59m is not.
    assert!(appointment.can_be_cancelled(24, start_instant - Duration::hours(24) - Duration::minutes(1)));
    assert!(!appointment.can_be_cancelled(24, start_instant - Duration::hours(23) - Duration::minutes(59)));
    // Exactly at the deadline is too late (strictly before required).
    assert!(!appointment.can_be_cancelled(24, start_instant - Duration::hours(24)));
}

#[test]
fn test_terminal_appointments_cannot_be_cancelled() {
    let ctx = TestContext::new();
    let start = Utc::now() + Duration::days(10);

    for status in [
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ] {
        let appointment = ctx.seed_appointment_at(start, 30, status);
        assert!(!appointment.can_be_cancelled(24, Utc::now()));
    }
}

#[test]
fn test_no_self_conflict() {
    let ctx = TestContext::new();
    let start = Utc::now() + Duration::days(3);
    let appointment = ctx.seed_appointment_at(start, 30, AppointmentStatus::Scheduled);

    assert!(!appointment.has_time_conflict(&appointment));
}

#[test]
fn test_time_conflict_is_symmetric() {
    let ctx = TestContext::new();
    let start = Utc::now() + Duration::days(3);

    let a = ctx.seed_appointment_at(start, 60, AppointmentStatus::Scheduled);
    let b = ctx.seed_appointment_at(start + Duration::minutes(30), 60, AppointmentStatus::Scheduled);
    let c = ctx.seed_appointment_at(start + Duration::minutes(60), 30, AppointmentStatus::Scheduled);

    assert_eq!(a.has_time_conflict(&b), b.has_time_conflict(&a));
    assert!(a.has_time_conflict(&b));

    // Back-to-back intervals do not overlap, in either order.
    assert!(!a.has_time_conflict(&c));
    assert!(!c.has_time_conflict(&a));
}

#[test]
fn test_reminder_lifecycle_is_managed_through_the_entity() {
    let ctx = TestContext::new();
    let start = Utc::now() + Duration::days(3);
    let mut appointment = ctx.seed_appointment_at(start, 30, AppointmentStatus::Scheduled);

    let reminder_id = appointment.schedule_reminder(
        scheduling_cell::models::ReminderChannel::Email,
        start - Duration::hours(24),
    );
    assert_eq!(appointment.reminders.len(), 1);

    assert!(appointment.mark_reminder_failed(reminder_id));
    assert_eq!(appointment.reminders[0].retry_count, 1);
    assert_eq!(
        appointment.reminders[0].delivery_status,
        scheduling_cell::models::ReminderDeliveryStatus::Failed
    );

    assert!(appointment.mark_reminder_sent(reminder_id));
    assert_eq!(
        appointment.reminders[0].delivery_status,
        scheduling_cell::models::ReminderDeliveryStatus::Sent
    );

    // Unknown reminder ids are reported, not ignored silently.
    assert!(!appointment.mark_reminder_sent(uuid::Uuid::new_v4()));
}

#[test]
fn test_different_practitioner_or_date_never_conflicts() {
    let ctx = TestContext::new();
    let start = Utc::now() + Duration::days(3);

    let a = ctx.seed_appointment_at(start, 60, AppointmentStatus::Scheduled);
    let mut other_practitioner = ctx.seed_appointment_at(start, 60, AppointmentStatus::Scheduled);
    other_practitioner.practitioner_id = uuid::Uuid::new_v4();
    let mut other_day = ctx.seed_appointment_at(start, 60, AppointmentStatus::Scheduled);
    other_day.date += Duration::days(1);

    assert!(!a.has_time_conflict(&other_practitioner));
    assert!(!a.has_time_conflict(&other_day));
}
