use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::calendar::dates::format_iso_date;
use crate::calendar::{Holiday, HolidayDate, InviteStatus};

pub const MEETING_TYPE: &str = "Meeting";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub status: InviteStatus,
    pub email: String,
    pub invited_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub creator_id: String,
    pub date: NaiveDate,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub participants: BTreeMap<String, ParticipantInfo>,
    pub created_at: i64,
}

impl Meeting {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time) / 60_000
    }

    pub fn accepted_participants(&self) -> impl Iterator<Item = &str> {
        self.participants
            .iter()
            .filter(|(_, p)| p.status == InviteStatus::Accepted)
            .map(|(id, _)| id.as_str())
    }

    pub fn pending_participants(&self) -> impl Iterator<Item = &str> {
        self.participants
            .iter()
            .filter(|(_, p)| p.status == InviteStatus::Pending)
            .map(|(id, _)| id.as_str())
    }

    /// The entry that mirrors this meeting into a personal meeting calendar.
    pub fn to_holiday(&self) -> Holiday {
        Holiday {
            id: self.id.clone(),
            name: self.title.clone(),
            description: self.description.clone(),
            date: HolidayDate {
                iso: format_iso_date(self.date),
                start_date: Some(format_iso_date(self.date)),
                end_date: Some(format_iso_date(self.date)),
                start_time: format_millis_time(self.start_time),
                end_time: format_millis_time(self.end_time),
            },
            repeat: vec![],
            types: vec![MEETING_TYPE.to_string()],
            country_code: None,
        }
    }
}

fn format_millis_time(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.with_timezone(&Local).format("%H:%M").to_string())
}
