use shared::{
    visibility::is_visible, AppointmentDetails, Lead, MeetingDetails, PipelineDetails, Profile,
    Role, RowFilter, ScheduleBlock, Table, TableSubscription,
};
use uuid::Uuid;

use super::{Record, Scope, SyncMode};

impl Record for Lead {
    const TABLE: Table = Table::Leads;
    const SYNC_MODE: SyncMode = SyncMode::Patch;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_visible(&self, scope: &Scope) -> bool {
        is_visible(self.assigned_to, scope.user_id, &scope.role_name)
    }
}

/// Joined with lead and assignee names, so changes trigger a refetch
impl Record for AppointmentDetails {
    const TABLE: Table = Table::Appointments;
    const SYNC_MODE: SyncMode = SyncMode::Refetch;

    fn id(&self) -> Uuid {
        self.appointment.id
    }

    fn is_visible(&self, scope: &Scope) -> bool {
        is_visible(self.appointment.assigned_to, scope.user_id, &scope.role_name)
    }
}

impl Record for MeetingDetails {
    const TABLE: Table = Table::Meetings;
    const SYNC_MODE: SyncMode = SyncMode::Refetch;

    fn id(&self) -> Uuid {
        self.meeting.id
    }
}

impl Record for ScheduleBlock {
    const TABLE: Table = Table::ScheduleBlocks;
    const SYNC_MODE: SyncMode = SyncMode::Patch;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Record for Profile {
    const TABLE: Table = Table::Profiles;
    const SYNC_MODE: SyncMode = SyncMode::Patch;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Record for Role {
    const TABLE: Table = Table::Roles;
    const SYNC_MODE: SyncMode = SyncMode::Patch;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Record for PipelineDetails {
    const TABLE: Table = Table::Pipelines;
    const SYNC_MODE: SyncMode = SyncMode::Refetch;

    fn id(&self) -> Uuid {
        self.pipeline.id
    }

    // Columns carry no company_id; the hub still scopes them to the tenant
    fn subscriptions(company_id: Uuid) -> Vec<TableSubscription> {
        vec![
            TableSubscription::all(Table::Pipelines).with_filter(RowFilter::eq("company_id", company_id)),
            TableSubscription::all(Table::PipelineColumns),
        ]
    }
}
