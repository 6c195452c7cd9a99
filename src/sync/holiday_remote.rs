use std::sync::Arc;

use crate::calendar::Holiday;
use crate::sync::calendar_remote::{CalendarRemote, calendar_path};
use crate::sync::document_store::{self, DocumentStore, StoreError};
use crate::sync::error::RemoteError;

pub(crate) fn holiday_path(calendar_id: &str, holiday_id: &str) -> String {
    format!("{}/holidays/{}", calendar_path(calendar_id), holiday_id)
}

/// User-created events stored inside a custom calendar.
#[derive(Clone)]
pub struct HolidayRemote {
    store: Arc<dyn DocumentStore>,
    calendars: CalendarRemote,
}

impl HolidayRemote {
    pub fn new(store: Arc<dyn DocumentStore>, calendars: CalendarRemote) -> Self {
        Self { store, calendars }
    }

    async fn check_editor(&self, editor_id: &str, calendar_id: &str) -> Result<(), RemoteError> {
        let calendar = self.calendars.require_calendar(calendar_id).await?;
        if !calendar.can_edit(editor_id) {
            return Err(RemoteError::PermissionDenied(format!("{} cannot edit {}", editor_id, calendar_id)));
        }
        Ok(())
    }

    fn validate(holiday: &Holiday) -> Result<(), RemoteError> {
        if holiday.name.trim().is_empty() {
            return Err(RemoteError::InvalidInput("event name is empty".to_string()));
        }
        if holiday.local_date().is_none() {
            return Err(RemoteError::InvalidInput(format!("unreadable event date '{}'", holiday.date.iso)));
        }
        Ok(())
    }

    async fn write(&self, calendar_id: &str, holiday: &Holiday) -> Result<(), RemoteError> {
        let value = serde_json::to_value(holiday).map_err(StoreError::from)?;
        self.store.set(&holiday_path(calendar_id, &holiday.id), value).await?;
        Ok(())
    }

    pub async fn add_holiday(&self, editor_id: &str, calendar_id: &str, mut holiday: Holiday) -> Result<Holiday, RemoteError> {
        Self::validate(&holiday)?;
        self.check_editor(editor_id, calendar_id).await?;

        if holiday.id.trim().is_empty() {
            holiday.id = self.store.push_key();
        }
        self.write(calendar_id, &holiday).await?;
        tracing::info!("Added event {} to calendar {}", holiday.id, calendar_id);
        Ok(holiday)
    }

    pub async fn update_holiday(&self, editor_id: &str, calendar_id: &str, holiday: &Holiday) -> Result<(), RemoteError> {
        Self::validate(holiday)?;
        self.check_editor(editor_id, calendar_id).await?;
        if self.get_holiday(calendar_id, &holiday.id).await?.is_none() {
            return Err(RemoteError::EventNotFound(holiday.id.clone()));
        }
        self.write(calendar_id, holiday).await
    }

    pub async fn delete_holiday(&self, editor_id: &str, calendar_id: &str, holiday_id: &str) -> Result<(), RemoteError> {
        self.check_editor(editor_id, calendar_id).await?;
        if self.get_holiday(calendar_id, holiday_id).await?.is_none() {
            return Err(RemoteError::EventNotFound(holiday_id.to_string()));
        }
        self.store.remove(&holiday_path(calendar_id, holiday_id)).await?;
        tracing::info!("Deleted event {} from calendar {}", holiday_id, calendar_id);
        Ok(())
    }

    pub async fn get_holiday(&self, calendar_id: &str, holiday_id: &str) -> Result<Option<Holiday>, RemoteError> {
        if holiday_id.trim().is_empty() {
            return Ok(None);
        }
        let holiday = document_store::read::<Holiday>(self.store.as_ref(), &holiday_path(calendar_id, holiday_id)).await?;
        Ok(holiday.map(|mut h| {
            h.id = holiday_id.to_string();
            h
        }))
    }

    pub async fn get_holidays(&self, calendar_id: &str) -> Result<Vec<Holiday>, RemoteError> {
        let children = document_store::read_children::<Holiday>(
            self.store.as_ref(),
            &format!("{}/holidays", calendar_path(calendar_id)),
        )
        .await?;

        let mut holidays: Vec<Holiday> = children
            .into_iter()
            .map(|(id, mut h)| {
                h.id = id;
                h
            })
            .collect();
        holidays.sort_by(|a, b| a.date.iso.cmp(&b.date.iso).then_with(|| a.name.cmp(&b.name)));
        Ok(holidays)
    }
}
