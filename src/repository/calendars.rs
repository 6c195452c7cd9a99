use crate::app::Session;
use crate::calendar::{Calendar, Holiday, User};
use crate::repository::offline::OfflineManager;
use crate::repository::RepositoryError;
use crate::storage::cache::CacheError;
use crate::sync::calendar_remote::CalendarRemote;
use crate::sync::holiday_remote::HolidayRemote;

fn keep_going(result: Result<(), CacheError>, action: &str) {
    if let Err(e) = result {
        tracing::warn!("Failed to {} in the local cache: {}", action, e);
    }
}

/// Custom calendars of the signed-in user, read cache-aside and written
/// through to the local cache once it holds the full set.
#[derive(Clone)]
pub struct CustomCalendarRepository {
    calendars: CalendarRemote,
    events: HolidayRemote,
    offline: OfflineManager,
}

impl CustomCalendarRepository {
    pub fn new(calendars: CalendarRemote, events: HolidayRemote, offline: OfflineManager) -> Self {
        Self { calendars, events, offline }
    }

    pub async fn get_user_calendars(&self, session: &Session, force_refresh: bool) -> Result<Vec<Calendar>, RepositoryError> {
        let user_id = session.user_id.as_str();
        if !force_refresh {
            let cached = self.offline.get_dashboard_calendars_offline(user_id)?;
            if !cached.is_empty() {
                tracing::debug!("Serving {} cached calendars for {}", cached.len(), user_id);
                return Ok(cached);
            }
        }

        match self.calendars.get_user_calendars(user_id).await {
            Ok(calendars) => {
                keep_going(self.offline.save_dashboard_calendars_offline(user_id, &calendars), "store calendars");
                Ok(calendars)
            }
            Err(e) => {
                tracing::warn!("Fetching calendars for {} failed: {}", user_id, e);
                let cached = self.offline.get_dashboard_calendars_offline(user_id)?;
                if cached.is_empty() {
                    return Err(e.into());
                }
                tracing::info!("Falling back to {} offline calendars", cached.len());
                Ok(cached)
            }
        }
    }

    pub async fn get_calendar_holidays(
        &self,
        session: &Session,
        calendar_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<Holiday>, RepositoryError> {
        if !force_refresh {
            let cached = self.offline.get_offline_custom_holidays(calendar_id)?;
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        match self.events.get_holidays(calendar_id).await {
            Ok(holidays) => {
                keep_going(self.offline.save_custom_holidays_offline(calendar_id, &holidays), "store events");
                Ok(holidays)
            }
            Err(e) => {
                tracing::warn!("Fetching events of {} for {} failed: {}", calendar_id, session.user_id, e);
                let cached = self.offline.get_offline_custom_holidays(calendar_id)?;
                if cached.is_empty() {
                    return Err(e.into());
                }
                Ok(cached)
            }
        }
    }

    pub async fn create_calendar(
        &self,
        session: &Session,
        title: &str,
        description: Option<String>,
    ) -> Result<Calendar, RepositoryError> {
        let calendar = self.calendars.create_calendar(&session.user_id, title, description).await?;
        keep_going(self.offline.save_calendar_offline(&session.user_id, &calendar), "store new calendar");
        Ok(calendar)
    }

    pub async fn update_calendar(
        &self,
        session: &Session,
        calendar_id: &str,
        title: &str,
        description: Option<String>,
    ) -> Result<Calendar, RepositoryError> {
        let calendar = self
            .calendars
            .update_calendar(&session.user_id, calendar_id, title, description)
            .await?;
        keep_going(self.offline.save_calendar_offline(&session.user_id, &calendar), "store calendar");
        Ok(calendar)
    }

    pub async fn delete_calendar(&self, session: &Session, calendar_id: &str) -> Result<(), RepositoryError> {
        self.calendars.delete_calendar(&session.user_id, calendar_id).await?;
        keep_going(self.offline.remove_calendar_offline(calendar_id), "remove calendar");
        Ok(())
    }

    pub async fn share_calendar(
        &self,
        session: &Session,
        calendar_id: &str,
        email: &str,
        can_edit: bool,
        can_share: bool,
    ) -> Result<User, RepositoryError> {
        let invitee = self
            .calendars
            .share_calendar(&session.user_id, calendar_id, email, can_edit, can_share)
            .await?;
        keep_going(self.offline.invalidate_user_calendars(&session.user_id), "invalidate calendars");
        Ok(invitee)
    }

    pub async fn pending_invites(&self, session: &Session) -> Result<Vec<Calendar>, RepositoryError> {
        Ok(self.calendars.get_pending_invites(&session.user_id).await?)
    }

    pub async fn accept_invite(&self, session: &Session, calendar_id: &str) -> Result<Calendar, RepositoryError> {
        let calendar = self.calendars.accept_invite(&session.user_id, calendar_id).await?;
        keep_going(self.offline.save_calendar_offline(&session.user_id, &calendar), "store accepted calendar");
        let holidays: Vec<Holiday> = calendar.holidays.values().cloned().collect();
        keep_going(self.offline.save_custom_holidays_offline(calendar_id, &holidays), "store events");
        Ok(calendar)
    }

    pub async fn decline_invite(&self, session: &Session, calendar_id: &str) -> Result<(), RepositoryError> {
        Ok(self.calendars.decline_invite(&session.user_id, calendar_id).await?)
    }

    pub async fn leave_calendar(&self, session: &Session, calendar_id: &str) -> Result<(), RepositoryError> {
        self.calendars
            .remove_participant(&session.user_id, calendar_id, &session.user_id)
            .await?;
        keep_going(self.offline.invalidate_user_calendars(&session.user_id), "invalidate calendars");
        Ok(())
    }

    pub async fn add_event(&self, session: &Session, calendar_id: &str, holiday: Holiday) -> Result<Holiday, RepositoryError> {
        let holiday = self.events.add_holiday(&session.user_id, calendar_id, holiday).await?;
        keep_going(self.offline.save_custom_holiday_offline(calendar_id, &holiday), "store event");
        Ok(holiday)
    }

    pub async fn update_event(&self, session: &Session, calendar_id: &str, holiday: &Holiday) -> Result<(), RepositoryError> {
        self.events.update_holiday(&session.user_id, calendar_id, holiday).await?;
        keep_going(self.offline.save_custom_holiday_offline(calendar_id, holiday), "store event");
        Ok(())
    }

    pub async fn delete_event(&self, session: &Session, calendar_id: &str, holiday_id: &str) -> Result<(), RepositoryError> {
        self.events.delete_holiday(&session.user_id, calendar_id, holiday_id).await?;
        keep_going(self.offline.remove_custom_holiday_offline(calendar_id, holiday_id), "remove event");
        Ok(())
    }
}
