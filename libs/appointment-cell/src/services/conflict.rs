// libs/appointment-cell/src/services/conflict.rs
use uuid::Uuid;

use shared_scheduling::TimeWindow;

use crate::models::Appointment;

/// Lock key serialising every booking for one doctor.
pub fn doctor_lock_key(doctor_id: Uuid) -> String {
    format!("doctor:{}", doctor_id)
}

/// Appointments that would collide with `window`, in start order.
pub fn conflicting<'a>(existing: &'a [Appointment], window: &TimeWindow) -> Vec<&'a Appointment> {
    let mut clashes: Vec<&Appointment> = existing.iter().filter(|a| a.blocks(window)).collect();
    clashes.sort_by_key(|a| a.start_time);
    clashes
}

pub fn first_conflict<'a>(existing: &'a [Appointment], window: &TimeWindow) -> Option<&'a Appointment> {
    conflicting(existing, window).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared_scheduling::AppointmentStatus;

    fn booked(doctor_id: Uuid, start: (u32, u32), end: (u32, u32), status: AppointmentStatus) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            doctor_id,
            patient_id: Uuid::new_v4(),
            branch_id: None,
            start_time: Utc.with_ymd_and_hms(2026, 3, 2, start.0, start.1, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2026, 3, 2, end.0, end.1, 0).unwrap(),
            status,
            reason: None,
            created_at: now,
            created_by: doctor_id,
            updated_at: now,
        }
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2026, 3, 2, start.0, start.1, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 2, end.0, end.1, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_reports_overlaps_in_start_order() {
        let doctor = Uuid::new_v4();
        let existing = vec![
            booked(doctor, (11, 0), (11, 30), AppointmentStatus::Scheduled),
            booked(doctor, (10, 0), (10, 30), AppointmentStatus::Scheduled),
            booked(doctor, (10, 30), (11, 0), AppointmentStatus::Cancelled),
        ];

        let clashes = conflicting(&existing, &window((10, 15), (11, 15)));
        assert_eq!(clashes.len(), 2);
        assert_eq!(clashes[0].id, existing[1].id);
        assert_eq!(clashes[1].id, existing[0].id);
    }

    #[test]
    fn test_adjacent_windows_are_free() {
        let doctor = Uuid::new_v4();
        let existing = vec![booked(doctor, (10, 0), (10, 30), AppointmentStatus::Scheduled)];

        assert!(first_conflict(&existing, &window((10, 30), (11, 0))).is_none());
        assert!(first_conflict(&existing, &window((9, 30), (10, 0))).is_none());
        assert!(first_conflict(&existing, &window((10, 29), (11, 0))).is_some());
    }

    #[test]
    fn test_lock_key_is_per_doctor() {
        let doctor = Uuid::new_v4();
        assert_eq!(doctor_lock_key(doctor), format!("doctor:{}", doctor));
    }
}
