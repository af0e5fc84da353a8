use anyhow::Result;
use shared::{Meeting, MeetingDetails, MeetingParticipant};
use std::collections::HashMap;
use uuid::Uuid;

use super::Database;

const MEETING_COLUMNS: &str =
    "id, company_id, title, date, time, duration, status, organizer_id, notes, created_at";

impl Database {
    pub async fn list_meetings(&self, company_id: Uuid) -> Result<Vec<MeetingDetails>> {
        let meetings = sqlx::query_as::<_, Meeting>(&format!(
            "SELECT {} FROM meetings WHERE company_id = ? ORDER BY date ASC, time ASC",
            MEETING_COLUMNS
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        let participants = sqlx::query_as::<_, MeetingParticipant>(
            r#"
            SELECT mp.meeting_id, mp.profile_id
            FROM meeting_participants mp
            JOIN meetings m ON m.id = mp.meeting_id
            WHERE m.company_id = ?
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_meeting: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for participant in participants {
            by_meeting
                .entry(participant.meeting_id)
                .or_default()
                .push(participant.profile_id);
        }

        Ok(meetings
            .into_iter()
            .map(|meeting| MeetingDetails {
                participants: by_meeting.remove(&meeting.id).unwrap_or_default(),
                meeting,
            })
            .collect())
    }

    pub async fn get_meeting(&self, company_id: Uuid, id: Uuid) -> Result<Option<MeetingDetails>> {
        let meeting = sqlx::query_as::<_, Meeting>(&format!(
            "SELECT {} FROM meetings WHERE company_id = ? AND id = ?",
            MEETING_COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(meeting) = meeting else {
            return Ok(None);
        };

        let participants: Vec<Uuid> =
            sqlx::query_scalar("SELECT profile_id FROM meeting_participants WHERE meeting_id = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        Ok(Some(MeetingDetails {
            meeting,
            participants,
        }))
    }

    pub async fn insert_meeting(&self, details: &MeetingDetails) -> Result<()> {
        let meeting = &details.meeting;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO meetings (id, company_id, title, date, time, duration, status, organizer_id, notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(meeting.id)
        .bind(meeting.company_id)
        .bind(&meeting.title)
        .bind(meeting.date)
        .bind(meeting.time)
        .bind(meeting.duration)
        .bind(meeting.status)
        .bind(meeting.organizer_id)
        .bind(&meeting.notes)
        .bind(meeting.created_at)
        .execute(&mut *tx)
        .await?;

        for profile_id in &details.participants {
            sqlx::query("INSERT OR IGNORE INTO meeting_participants (meeting_id, profile_id) VALUES (?, ?)")
                .bind(meeting.id)
                .bind(profile_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Rewrites the meeting row and replaces the participant set
    pub async fn update_meeting(&self, details: &MeetingDetails) -> Result<()> {
        let meeting = &details.meeting;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE meetings SET title = ?, date = ?, time = ?, status = ?
            WHERE company_id = ? AND id = ?
            "#,
        )
        .bind(&meeting.title)
        .bind(meeting.date)
        .bind(meeting.time)
        .bind(meeting.status)
        .bind(meeting.company_id)
        .bind(meeting.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM meeting_participants WHERE meeting_id = ?")
            .bind(meeting.id)
            .execute(&mut *tx)
            .await?;

        for profile_id in &details.participants {
            sqlx::query("INSERT OR IGNORE INTO meeting_participants (meeting_id, profile_id) VALUES (?, ?)")
                .bind(meeting.id)
                .bind(profile_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_meeting(&self, company_id: Uuid, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM meeting_participants WHERE meeting_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM meetings WHERE company_id = ? AND id = ?")
            .bind(company_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
