//! Schedule-block overlap checks.
//!
//! Recurring blocks are matched by their stored dates only; no recurrence
//! expansion happens here.

use chrono::{NaiveDate, NaiveTime, Timelike};
use uuid::Uuid;

use crate::{BlockType, ScheduleBlock};

fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

fn covers_date(block: &ScheduleBlock, date: NaiveDate) -> bool {
    let end = block.end_date.unwrap_or(block.start_date);
    block.start_date <= date && date <= end
}

fn blocks_slot(block: &ScheduleBlock, time: Option<NaiveTime>, duration_minutes: u32) -> bool {
    match block.block_type {
        BlockType::FullDay => true,
        BlockType::TimeSlot => match (time, block.start_time, block.end_time) {
            (Some(time), Some(block_start), Some(block_end)) => {
                let start = minute_of_day(time);
                let end = start + i64::from(duration_minutes);
                start < minute_of_day(block_end) && end > minute_of_day(block_start)
            }
            _ => false,
        },
    }
}

/// First block of `user_id` that makes the slot unavailable
pub fn blocking_block<'a>(
    date: NaiveDate,
    time: Option<NaiveTime>,
    duration_minutes: u32,
    user_id: Uuid,
    blocks: &'a [ScheduleBlock],
) -> Option<&'a ScheduleBlock> {
    blocks.iter().find(|block| {
        block.user_id == user_id
            && covers_date(block, date)
            && blocks_slot(block, time, duration_minutes)
    })
}

pub fn is_time_blocked(
    date: NaiveDate,
    time: Option<NaiveTime>,
    duration_minutes: u32,
    user_id: Uuid,
    blocks: &[ScheduleBlock],
) -> bool {
    blocking_block(date, time, duration_minutes, user_id, blocks).is_some()
}
