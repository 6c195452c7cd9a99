use futures::future::try_join_all;
use std::sync::Arc;

use crate::calendar::{Calendar, InviteStatus, SharedUserInfo, User};
use crate::clock::Clock;
use crate::sync::document_store::{
    self, CALENDARS, DocumentStore, MEETING_CALENDARS, USER_CALENDARS, USER_INVITES, WriteBatch,
};
use crate::sync::error::RemoteError;
use crate::sync::user_remote::UserRemote;

pub const MEETING_CALENDAR_TITLE: &str = "Meetings";

pub(crate) fn calendar_path(calendar_id: &str) -> String {
    format!("{}/{}", CALENDARS, calendar_id)
}

pub(crate) fn member_path(calendar_id: &str, user_id: &str) -> String {
    format!("{}/{}/sharedWith/{}", CALENDARS, calendar_id, user_id)
}

pub(crate) fn membership_pointer(user_id: &str, calendar_id: &str) -> String {
    format!("{}/{}/{}", USER_CALENDARS, user_id, calendar_id)
}

pub(crate) fn invite_pointer(user_id: &str, calendar_id: &str) -> String {
    format!("{}/{}/{}", USER_INVITES, user_id, calendar_id)
}

pub(crate) fn meeting_calendar_pointer(user_id: &str) -> String {
    format!("{}/{}", MEETING_CALENDARS, user_id)
}

#[derive(Clone)]
pub struct CalendarRemote {
    store: Arc<dyn DocumentStore>,
    users: UserRemote,
    clock: Arc<dyn Clock>,
}

impl CalendarRemote {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        let users = UserRemote::new(store.clone());
        Self { store, users, clock }
    }

    pub fn users(&self) -> &UserRemote {
        &self.users
    }

    fn build_calendar(&self, owner_id: &str, title: &str, description: Option<String>) -> Result<Calendar, RemoteError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(RemoteError::InvalidInput("calendar title is empty".to_string()));
        }
        let mut calendar = Calendar::new(self.store.push_key(), title, owner_id, self.clock.now_millis());
        calendar.description = description.filter(|d| !d.trim().is_empty());
        Ok(calendar)
    }

    fn creation_batch(calendar: &Calendar) -> Result<WriteBatch, RemoteError> {
        let mut batch = WriteBatch::new();
        batch.put_serialized(calendar_path(&calendar.id), calendar)?;
        batch.put(membership_pointer(&calendar.owner_id, &calendar.id), true);
        Ok(batch)
    }

    pub async fn create_calendar(
        &self,
        owner_id: &str,
        title: &str,
        description: Option<String>,
    ) -> Result<Calendar, RemoteError> {
        let calendar = self.build_calendar(owner_id, title, description)?;
        self.store.update(Self::creation_batch(&calendar)?).await?;
        tracing::info!("Created calendar {} for {}", calendar.id, owner_id);
        Ok(calendar)
    }

    pub async fn get_calendar(&self, calendar_id: &str) -> Result<Option<Calendar>, RemoteError> {
        let calendar = document_store::read::<Calendar>(self.store.as_ref(), &calendar_path(calendar_id)).await?;
        Ok(calendar.map(|mut c| {
            c.id = calendar_id.to_string();
            for (id, holiday) in c.holidays.iter_mut() {
                holiday.id = id.clone();
            }
            c
        }))
    }

    pub async fn require_calendar(&self, calendar_id: &str) -> Result<Calendar, RemoteError> {
        self.get_calendar(calendar_id)
            .await?
            .ok_or_else(|| RemoteError::CalendarNotFound(calendar_id.to_string()))
    }

    async fn get_calendars(&self, ids: &[String]) -> Result<Vec<Calendar>, RemoteError> {
        let calendars = try_join_all(ids.iter().map(|id| self.get_calendar(id))).await?;
        let found: Vec<Calendar> = calendars.into_iter().flatten().collect();
        if found.len() < ids.len() {
            tracing::warn!("{} calendar pointers refer to missing calendars", ids.len() - found.len());
        }
        Ok(found)
    }

    /// Every calendar the user is a member of, resolved through the
    /// `user_calendars` reverse index.
    pub async fn get_user_calendars(&self, user_id: &str) -> Result<Vec<Calendar>, RemoteError> {
        let ids = document_store::read_keys(self.store.as_ref(), &format!("{}/{}", USER_CALENDARS, user_id)).await?;
        tracing::info!("Fetching {} calendars for {}", ids.len(), user_id);
        self.get_calendars(&ids).await
    }

    pub async fn update_calendar(
        &self,
        editor_id: &str,
        calendar_id: &str,
        title: &str,
        description: Option<String>,
    ) -> Result<Calendar, RemoteError> {
        let mut calendar = self.require_calendar(calendar_id).await?;
        if !calendar.can_edit(editor_id) {
            return Err(RemoteError::PermissionDenied(format!("{} cannot edit {}", editor_id, calendar_id)));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(RemoteError::InvalidInput("calendar title is empty".to_string()));
        }

        let base = calendar_path(calendar_id);
        let description = description.filter(|d| !d.trim().is_empty());
        let mut batch = WriteBatch::new();
        batch.put(format!("{}/title", base), title);
        match &description {
            Some(d) => batch.put(format!("{}/description", base), d.as_str()),
            None => batch.delete(format!("{}/description", base)),
        };
        self.store.update(batch).await?;

        calendar.title = title.to_string();
        calendar.description = description;
        Ok(calendar)
    }

    /// Removes the calendar together with every membership and invite
    /// pointer that refers to it.
    pub async fn delete_calendar(&self, requester_id: &str, calendar_id: &str) -> Result<(), RemoteError> {
        let calendar = self.require_calendar(calendar_id).await?;
        if !calendar.is_owner(requester_id) {
            return Err(RemoteError::PermissionDenied(format!("only the owner can delete {}", calendar_id)));
        }

        let mut batch = WriteBatch::new();
        batch.delete(calendar_path(calendar_id));
        batch.delete(membership_pointer(&calendar.owner_id, calendar_id));
        for participant in calendar.participant_ids() {
            batch.delete(membership_pointer(participant, calendar_id));
            batch.delete(invite_pointer(participant, calendar_id));
        }
        self.store.update(batch).await?;

        tracing::info!("Deleted calendar {} and {} participant pointers", calendar_id, calendar.shared_with.len());
        Ok(())
    }

    pub async fn share_calendar(
        &self,
        inviter_id: &str,
        calendar_id: &str,
        invitee_email: &str,
        can_edit: bool,
        can_share: bool,
    ) -> Result<User, RemoteError> {
        let calendar = self.require_calendar(calendar_id).await?;
        if !calendar.can_share(inviter_id) {
            return Err(RemoteError::PermissionDenied(format!("{} cannot share {}", inviter_id, calendar_id)));
        }

        let invitee = self
            .users
            .find_user_by_email(invitee_email)
            .await?
            .ok_or_else(|| RemoteError::UserNotFound(invitee_email.trim().to_string()))?;

        if invitee.id == inviter_id {
            return Err(RemoteError::InvalidInput("cannot invite yourself".to_string()));
        }
        if let Some(existing) = calendar.member(&invitee.id)
            && existing.status != InviteStatus::Declined
        {
            return Err(RemoteError::AlreadyParticipant(invitee.email.clone()));
        }

        let info = SharedUserInfo::invited(can_edit, can_share, self.clock.now_millis());
        let mut batch = WriteBatch::new();
        batch.put_serialized(member_path(calendar_id, &invitee.id), &info)?;
        batch.put(invite_pointer(&invitee.id, calendar_id), true);
        self.store.update(batch).await?;

        tracing::info!("Invited {} to calendar {}", invitee.id, calendar_id);
        Ok(invitee)
    }

    pub async fn get_pending_invites(&self, user_id: &str) -> Result<Vec<Calendar>, RemoteError> {
        let ids = document_store::read_keys(self.store.as_ref(), &format!("{}/{}", USER_INVITES, user_id)).await?;
        let calendars = self.get_calendars(&ids).await?;
        Ok(calendars
            .into_iter()
            .filter(|c| c.member(user_id).is_some_and(|m| m.status == InviteStatus::Pending))
            .collect())
    }

    fn pending_entry<'a>(calendar: &'a Calendar, user_id: &str) -> Result<&'a SharedUserInfo, RemoteError> {
        calendar
            .member(user_id)
            .filter(|m| m.status == InviteStatus::Pending)
            .ok_or_else(|| RemoteError::NoPendingInvite(format!("{} on {}", user_id, calendar.id)))
    }

    /// Flips the invite to accepted and swaps the invite pointer for a
    /// membership pointer in one batch.
    pub async fn accept_invite(&self, user_id: &str, calendar_id: &str) -> Result<Calendar, RemoteError> {
        let mut calendar = self.require_calendar(calendar_id).await?;
        let mut entry = Self::pending_entry(&calendar, user_id)?.clone();
        let now = self.clock.now_millis();

        let base = member_path(calendar_id, user_id);
        let mut batch = WriteBatch::new();
        batch.put(format!("{}/status", base), "accepted");
        batch.put(format!("{}/acceptedAt", base), now);
        batch.delete(invite_pointer(user_id, calendar_id));
        batch.put(membership_pointer(user_id, calendar_id), true);
        self.store.update(batch).await?;

        entry.status = InviteStatus::Accepted;
        entry.accepted_at = Some(now);
        calendar.shared_with.insert(user_id.to_string(), entry);
        tracing::info!("{} accepted calendar {}", user_id, calendar_id);
        Ok(calendar)
    }

    pub async fn decline_invite(&self, user_id: &str, calendar_id: &str) -> Result<(), RemoteError> {
        let calendar = self.require_calendar(calendar_id).await?;
        Self::pending_entry(&calendar, user_id)?;

        let mut batch = WriteBatch::new();
        batch.put(format!("{}/status", member_path(calendar_id, user_id)), "declined");
        batch.delete(invite_pointer(user_id, calendar_id));
        self.store.update(batch).await?;

        tracing::info!("{} declined calendar {}", user_id, calendar_id);
        Ok(())
    }

    pub async fn update_permissions(
        &self,
        owner_id: &str,
        calendar_id: &str,
        user_id: &str,
        can_edit: bool,
        can_share: bool,
    ) -> Result<(), RemoteError> {
        let calendar = self.require_calendar(calendar_id).await?;
        if !calendar.is_owner(owner_id) {
            return Err(RemoteError::PermissionDenied(format!("only the owner can change rights on {}", calendar_id)));
        }
        if calendar.is_owner(user_id) || calendar.member(user_id).is_none() {
            return Err(RemoteError::InvalidInput(format!("{} is not a shared member", user_id)));
        }

        let base = member_path(calendar_id, user_id);
        let mut batch = WriteBatch::new();
        batch.put(format!("{}/canEdit", base), can_edit);
        batch.put(format!("{}/canShare", base), can_share);
        self.store.update(batch).await?;
        Ok(())
    }

    /// Owner revoking someone, or a member leaving on their own.
    pub async fn remove_participant(&self, requester_id: &str, calendar_id: &str, user_id: &str) -> Result<(), RemoteError> {
        let calendar = self.require_calendar(calendar_id).await?;
        if calendar.is_owner(user_id) {
            return Err(RemoteError::InvalidInput("the owner cannot leave their own calendar".to_string()));
        }
        if !calendar.is_owner(requester_id) && requester_id != user_id {
            return Err(RemoteError::PermissionDenied(format!("{} cannot remove {}", requester_id, user_id)));
        }
        if calendar.member(user_id).is_none() {
            return Err(RemoteError::InvalidInput(format!("{} is not a member of {}", user_id, calendar_id)));
        }

        let mut batch = WriteBatch::new();
        batch.delete(member_path(calendar_id, user_id));
        batch.delete(membership_pointer(user_id, calendar_id));
        batch.delete(invite_pointer(user_id, calendar_id));
        self.store.update(batch).await?;
        Ok(())
    }

    pub async fn get_shared_users(&self, calendar_id: &str) -> Result<Vec<(User, SharedUserInfo)>, RemoteError> {
        let calendar = self.require_calendar(calendar_id).await?;
        let ids: Vec<String> = calendar.participant_ids().map(str::to_string).collect();
        let users = self.users.get_users(&ids).await?;

        Ok(users
            .into_iter()
            .filter_map(|u| calendar.member(&u.id).cloned().map(|info| (u, info)))
            .collect())
    }

    pub async fn meeting_calendar_id(&self, user_id: &str) -> Result<Option<String>, RemoteError> {
        Ok(document_store::read::<String>(self.store.as_ref(), &meeting_calendar_pointer(user_id)).await?)
    }

    /// Returns the user's personal meeting calendar, creating it on first use.
    pub async fn ensure_meeting_calendar(&self, user_id: &str) -> Result<String, RemoteError> {
        if let Some(id) = self.meeting_calendar_id(user_id).await? {
            if self.get_calendar(&id).await?.is_some() {
                return Ok(id);
            }
            tracing::warn!("Meeting calendar {} of {} is gone, recreating", id, user_id);
        }

        let calendar = self.build_calendar(user_id, MEETING_CALENDAR_TITLE, None)?;
        let mut batch = Self::creation_batch(&calendar)?;
        batch.put(meeting_calendar_pointer(user_id), calendar.id.as_str());
        self.store.update(batch).await?;

        tracing::info!("Created meeting calendar {} for {}", calendar.id, user_id);
        Ok(calendar.id)
    }
}
