//! Which records a role may see.

use uuid::Uuid;

use crate::{Appointment, AppointmentDetails, Lead};

/// Role restricted to its own and unclaimed records
pub const CLOSER_ROLE: &str = "Closer";

/// Records that can be claimed by a user
pub trait Assignable {
    fn assigned_to(&self) -> Option<Uuid>;
}

impl Assignable for Lead {
    fn assigned_to(&self) -> Option<Uuid> {
        self.assigned_to
    }
}

impl Assignable for Appointment {
    fn assigned_to(&self) -> Option<Uuid> {
        self.assigned_to
    }
}

impl Assignable for AppointmentDetails {
    fn assigned_to(&self) -> Option<Uuid> {
        self.appointment.assigned_to
    }
}

/// A Closer sees records assigned to them or to nobody; other roles see all
pub fn is_visible(assigned_to: Option<Uuid>, caller_id: Uuid, role_name: &str) -> bool {
    if role_name != CLOSER_ROLE {
        return true;
    }
    match assigned_to {
        None => true,
        Some(owner) => owner == caller_id,
    }
}

pub fn filter_visible<T: Assignable>(records: Vec<T>, caller_id: Uuid, role_name: &str) -> Vec<T> {
    records
        .into_iter()
        .filter(|record| is_visible(record.assigned_to(), caller_id, role_name))
        .collect()
}
