use thiserror::Error;

use crate::sync::document_store::StoreError;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Calendar not found: {0}")]
    CalendarNotFound(String),
    #[error("Event not found: {0}")]
    EventNotFound(String),
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),
    #[error("No user registered with email {0}")]
    UserNotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("User {0} is already a participant")]
    AlreadyParticipant(String),
    #[error("No pending invite for {0}")]
    NoPendingInvite(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Store(e) if e.is_transient())
    }
}
