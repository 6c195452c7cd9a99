use chrono::NaiveDate;
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::calendar::{normalize_email, InviteStatus, Meeting, ParticipantInfo};
use crate::clock::Clock;
use crate::sync::calendar_remote::CalendarRemote;
use crate::sync::document_store::{self, DocumentStore, MEETINGS, StoreError, USER_MEETING_INVITES, WriteBatch};
use crate::sync::error::RemoteError;
use crate::sync::holiday_remote::holiday_path;

fn meeting_path(meeting_id: &str) -> String {
    format!("{}/{}", MEETINGS, meeting_id)
}

fn meeting_invite_pointer(user_id: &str, meeting_id: &str) -> String {
    format!("{}/{}/{}", USER_MEETING_INVITES, user_id, meeting_id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMeeting {
    pub title: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: i64,
    pub end_time: i64,
    pub participant_emails: Vec<String>,
}

#[derive(Clone)]
pub struct MeetingRemote {
    store: Arc<dyn DocumentStore>,
    calendars: CalendarRemote,
    clock: Arc<dyn Clock>,
}

impl MeetingRemote {
    pub fn new(store: Arc<dyn DocumentStore>, calendars: CalendarRemote, clock: Arc<dyn Clock>) -> Self {
        Self { store, calendars, clock }
    }

    /// Stores the meeting, invites every participant, and mirrors the meeting
    /// into the creator's meeting calendar.
    pub async fn create_meeting(&self, creator_id: &str, request: NewMeeting) -> Result<Meeting, RemoteError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(RemoteError::InvalidInput("meeting title is empty".to_string()));
        }
        if request.end_time <= request.start_time {
            return Err(RemoteError::InvalidInput("meeting must end after it starts".to_string()));
        }

        let emails: BTreeSet<String> = request
            .participant_emails
            .iter()
            .map(|e| normalize_email(e))
            .filter(|e| !e.is_empty())
            .collect();
        let users = self.calendars.users();
        let resolved = try_join_all(emails.iter().map(|email| users.find_user_by_email(email))).await?;

        let now = self.clock.now_millis();
        let mut participants = BTreeMap::new();
        for (email, user) in emails.iter().zip(resolved) {
            let user = user.ok_or_else(|| RemoteError::UserNotFound(email.clone()))?;
            if user.id == creator_id {
                continue;
            }
            participants.insert(
                user.id,
                ParticipantInfo {
                    status: InviteStatus::Pending,
                    email: email.clone(),
                    invited_at: now,
                    responded_at: None,
                },
            );
        }

        let meeting = Meeting {
            id: self.store.push_key(),
            title: title.to_string(),
            description: request.description.filter(|d| !d.trim().is_empty()),
            creator_id: creator_id.to_string(),
            date: request.date,
            start_time: request.start_time,
            end_time: request.end_time,
            participants,
            created_at: now,
        };

        let creator_calendar = self.calendars.ensure_meeting_calendar(creator_id).await?;

        let mut batch = WriteBatch::new();
        batch.put_serialized(meeting_path(&meeting.id), &meeting)?;
        for participant in meeting.participants.keys() {
            batch.put(meeting_invite_pointer(participant, &meeting.id), true);
        }
        batch.put_serialized(holiday_path(&creator_calendar, &meeting.id), &meeting.to_holiday())?;
        self.store.update(batch).await?;

        tracing::info!("Created meeting {} with {} participants", meeting.id, meeting.participants.len());
        Ok(meeting)
    }

    pub async fn get_meeting(&self, meeting_id: &str) -> Result<Option<Meeting>, RemoteError> {
        let meeting = document_store::read::<Meeting>(self.store.as_ref(), &meeting_path(meeting_id)).await?;
        Ok(meeting.map(|mut m| {
            m.id = meeting_id.to_string();
            m
        }))
    }

    async fn require_meeting(&self, meeting_id: &str) -> Result<Meeting, RemoteError> {
        self.get_meeting(meeting_id)
            .await?
            .ok_or_else(|| RemoteError::MeetingNotFound(meeting_id.to_string()))
    }

    pub async fn get_meeting_invites(&self, user_id: &str) -> Result<Vec<Meeting>, RemoteError> {
        let ids = document_store::read_keys(self.store.as_ref(), &format!("{}/{}", USER_MEETING_INVITES, user_id)).await?;
        let meetings = try_join_all(ids.iter().map(|id| self.get_meeting(id))).await?;

        let mut pending: Vec<Meeting> = meetings
            .into_iter()
            .flatten()
            .filter(|m| m.participants.get(user_id).is_some_and(|p| p.status == InviteStatus::Pending))
            .collect();
        pending.sort_by_key(|m| m.start_time);
        Ok(pending)
    }

    pub async fn get_created_meetings(&self, creator_id: &str) -> Result<Vec<Meeting>, RemoteError> {
        let found = self.store.find_by_child(MEETINGS, "creatorId", creator_id).await?;

        let mut meetings = Vec::with_capacity(found.len());
        for (id, value) in found {
            let mut meeting: Meeting = serde_json::from_value(value).map_err(|source| StoreError::DecodeError {
                path: meeting_path(&id),
                source,
            })?;
            meeting.id = id;
            meetings.push(meeting);
        }
        meetings.sort_by_key(|m| m.start_time);
        Ok(meetings)
    }

    pub async fn respond_to_meeting(&self, user_id: &str, meeting_id: &str, accept: bool) -> Result<Meeting, RemoteError> {
        let mut meeting = self.require_meeting(meeting_id).await?;
        let participant = meeting
            .participants
            .get_mut(user_id)
            .filter(|p| p.status == InviteStatus::Pending)
            .ok_or_else(|| RemoteError::NoPendingInvite(format!("{} on meeting {}", user_id, meeting_id)))?;

        let now = self.clock.now_millis();
        participant.status = if accept { InviteStatus::Accepted } else { InviteStatus::Declined };
        participant.responded_at = Some(now);

        let base = format!("{}/participants/{}", meeting_path(meeting_id), user_id);
        let mut batch = WriteBatch::new();
        batch.put(format!("{}/status", base), if accept { "accepted" } else { "declined" });
        batch.put(format!("{}/respondedAt", base), now);
        batch.delete(meeting_invite_pointer(user_id, meeting_id));

        if accept {
            let calendar_id = self.calendars.ensure_meeting_calendar(user_id).await?;
            batch.put_serialized(holiday_path(&calendar_id, meeting_id), &meeting.to_holiday())?;
        }
        self.store.update(batch).await?;

        tracing::info!("{} {} meeting {}", user_id, if accept { "accepted" } else { "declined" }, meeting_id);
        Ok(meeting)
    }

    /// Removes the meeting, outstanding invites, and every mirrored entry.
    pub async fn cancel_meeting(&self, requester_id: &str, meeting_id: &str) -> Result<(), RemoteError> {
        let meeting = self.require_meeting(meeting_id).await?;
        if meeting.creator_id != requester_id {
            return Err(RemoteError::PermissionDenied(format!("only the creator can cancel {}", meeting_id)));
        }

        let mut mirrored: Vec<&str> = vec![meeting.creator_id.as_str()];
        mirrored.extend(meeting.accepted_participants());
        let calendar_ids = try_join_all(mirrored.iter().map(|u| self.calendars.meeting_calendar_id(u))).await?;

        let mut batch = WriteBatch::new();
        batch.delete(meeting_path(meeting_id));
        for participant in meeting.participants.keys() {
            batch.delete(meeting_invite_pointer(participant, meeting_id));
        }
        for calendar_id in calendar_ids.into_iter().flatten() {
            batch.delete(holiday_path(&calendar_id, meeting_id));
        }
        self.store.update(batch).await?;

        tracing::info!("Cancelled meeting {}", meeting_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{User, MEETING_TYPE};
    use crate::clock::FixedClock;
    use crate::sync::document_store::MemoryDocumentStore;
    use crate::sync::holiday_remote::HolidayRemote;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        store: Arc<MemoryDocumentStore>,
        calendars: CalendarRemote,
        holidays: HolidayRemote,
        meetings: MeetingRemote,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryDocumentStore::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
        let calendars = CalendarRemote::new(store.clone(), clock.clone());
        for (id, email) in [("alice", "alice@x.com"), ("bob", "bob@x.com"), ("carol", "carol@x.com")] {
            calendars.users().save_user(&User::new(id, email)).await.unwrap();
        }
        let holidays = HolidayRemote::new(store.clone(), calendars.clone());
        let meetings = MeetingRemote::new(store.clone(), calendars.clone(), clock);
        Fixture { store, calendars, holidays, meetings }
    }

    fn request(emails: &[&str]) -> NewMeeting {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap().timestamp_millis();
        NewMeeting {
            title: "Sync".into(),
            description: None,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            start_time: start,
            end_time: start + 30 * 60_000,
            participant_emails: emails.iter().map(|e| e.to_string()).collect(),
        }
    }

    async fn mirrored_in(f: &Fixture, user_id: &str, meeting_id: &str) -> bool {
        let Some(calendar_id) = f.calendars.meeting_calendar_id(user_id).await.unwrap() else {
            return false;
        };
        f.holidays.get_holiday(&calendar_id, meeting_id).await.unwrap().is_some()
    }

    #[tokio::test]
    async fn create_invites_participants_and_mirrors_for_creator() {
        let f = fixture().await;

        let meeting = f.meetings.create_meeting("alice", request(&["BOB@x.com", "carol@x.com", "alice@x.com"])).await.unwrap();

        assert_eq!(meeting.participants.len(), 2);
        assert_eq!(f.meetings.get_meeting_invites("bob").await.unwrap().len(), 1);
        assert_eq!(f.meetings.get_meeting_invites("carol").await.unwrap().len(), 1);
        assert!(mirrored_in(&f, "alice", &meeting.id).await);
        assert!(!mirrored_in(&f, "bob", &meeting.id).await);

        let calendar_id = f.calendars.meeting_calendar_id("alice").await.unwrap().unwrap();
        let entry = f.holidays.get_holiday(&calendar_id, &meeting.id).await.unwrap().unwrap();
        assert_eq!(entry.types, vec![MEETING_TYPE]);
    }

    #[tokio::test]
    async fn create_rejects_unknown_participant() {
        let f = fixture().await;

        let result = f.meetings.create_meeting("alice", request(&["bob@x.com", "ghost@x.com"])).await;

        assert!(matches!(result, Err(RemoteError::UserNotFound(ref e)) if e == "ghost@x.com"));
        assert!(f.meetings.get_meeting_invites("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_inverted_times() {
        let f = fixture().await;
        let mut bad = request(&[]);
        bad.end_time = bad.start_time;

        let result = f.meetings.create_meeting("alice", bad).await;

        assert!(matches!(result, Err(RemoteError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn accepting_mirrors_into_participant_calendar() {
        let f = fixture().await;
        let meeting = f.meetings.create_meeting("alice", request(&["bob@x.com"])).await.unwrap();

        let updated = f.meetings.respond_to_meeting("bob", &meeting.id, true).await.unwrap();

        assert_eq!(updated.participants["bob"].status, InviteStatus::Accepted);
        assert!(updated.participants["bob"].responded_at.is_some());
        assert!(mirrored_in(&f, "bob", &meeting.id).await);
        assert!(f.meetings.get_meeting_invites("bob").await.unwrap().is_empty());
        let stored = f.meetings.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn declining_does_not_mirror() {
        let f = fixture().await;
        let meeting = f.meetings.create_meeting("alice", request(&["bob@x.com"])).await.unwrap();

        f.meetings.respond_to_meeting("bob", &meeting.id, false).await.unwrap();

        assert!(!mirrored_in(&f, "bob", &meeting.id).await);
        let again = f.meetings.respond_to_meeting("bob", &meeting.id, true).await;
        assert!(matches!(again, Err(RemoteError::NoPendingInvite(_))));
    }

    #[tokio::test]
    async fn cancel_cleans_up_everywhere() {
        let f = fixture().await;
        let meeting = f.meetings.create_meeting("alice", request(&["bob@x.com", "carol@x.com"])).await.unwrap();
        f.meetings.respond_to_meeting("bob", &meeting.id, true).await.unwrap();

        let denied = f.meetings.cancel_meeting("bob", &meeting.id).await;
        assert!(matches!(denied, Err(RemoteError::PermissionDenied(_))));

        f.meetings.cancel_meeting("alice", &meeting.id).await.unwrap();

        assert_eq!(f.meetings.get_meeting(&meeting.id).await.unwrap(), None);
        assert!(!mirrored_in(&f, "alice", &meeting.id).await);
        assert!(!mirrored_in(&f, "bob", &meeting.id).await);
        assert!(f.meetings.get_meeting_invites("carol").await.unwrap().is_empty());
        assert_eq!(f.store.get(USER_MEETING_INVITES).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lists_meetings_created_by_user() {
        let f = fixture().await;
        f.meetings.create_meeting("alice", request(&["bob@x.com"])).await.unwrap();
        f.meetings.create_meeting("bob", request(&["carol@x.com"])).await.unwrap();

        let created = f.meetings.get_created_meetings("alice").await.unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].creator_id, "alice");
    }
}
