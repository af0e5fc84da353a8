use anyhow::Result;
use shared::{Appointment, AppointmentDetails};
use uuid::Uuid;

use super::Database;

const APPOINTMENT_COLUMNS: &str =
    "id, company_id, lead_id, assigned_to, date, time, duration, status, notes, created_at";

const DETAILS_QUERY: &str = r#"
    SELECT a.id, a.company_id, a.lead_id, a.assigned_to, a.date, a.time, a.duration, a.status,
           a.notes, a.created_at, l.name AS lead_name, p.full_name AS assignee_name
    FROM appointments a
    LEFT JOIN leads l ON l.id = a.lead_id
    LEFT JOIN profiles p ON p.id = a.assigned_to
"#;

impl Database {
    /// Appointments joined with lead and assignee names
    pub async fn list_appointment_details(&self, company_id: Uuid) -> Result<Vec<AppointmentDetails>> {
        let rows = sqlx::query_as::<_, AppointmentDetails>(&format!(
            "{} WHERE a.company_id = ? ORDER BY a.date ASC, a.time ASC",
            DETAILS_QUERY
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_appointment_details(
        &self,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AppointmentDetails>> {
        let row = sqlx::query_as::<_, AppointmentDetails>(&format!(
            "{} WHERE a.company_id = ? AND a.id = ?",
            DETAILS_QUERY
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_appointment(&self, company_id: Uuid, id: Uuid) -> Result<Option<Appointment>> {
        let row = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {} FROM appointments WHERE company_id = ? AND id = ?",
            APPOINTMENT_COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_appointment(&self, appointment: &Appointment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO appointments (id, company_id, lead_id, assigned_to, date, time, duration, status, notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(appointment.id)
        .bind(appointment.company_id)
        .bind(appointment.lead_id)
        .bind(appointment.assigned_to)
        .bind(appointment.date)
        .bind(appointment.time)
        .bind(appointment.duration)
        .bind(appointment.status)
        .bind(&appointment.notes)
        .bind(appointment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_appointment(&self, appointment: &Appointment) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE appointments SET assigned_to = ?, date = ?, time = ?, duration = ?, status = ?, notes = ?
            WHERE company_id = ? AND id = ?
            "#,
        )
        .bind(appointment.assigned_to)
        .bind(appointment.date)
        .bind(appointment.time)
        .bind(appointment.duration)
        .bind(appointment.status)
        .bind(&appointment.notes)
        .bind(appointment.company_id)
        .bind(appointment.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_appointment(&self, company_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM appointments WHERE company_id = ? AND id = ?")
            .bind(company_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
