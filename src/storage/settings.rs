use std::sync::Arc;

use crate::app::Session;
use crate::storage::preferences::{Preferences, PrefsError};

const LOGGED_IN: &str = "is_logged_in";
const USER_ID: &str = "user_id";
const USER_EMAIL: &str = "user_email";
const DARK_MODE: &str = "dark_mode";
const LOCALE: &str = "locale";

/// Session flag plus the small display preferences.
#[derive(Debug, Clone)]
pub struct AppSettings {
    prefs: Arc<Preferences>,
}

impl AppSettings {
    pub fn new(prefs: Arc<Preferences>) -> Self {
        Self { prefs }
    }

    pub fn save_session(&self, session: &Session) -> Result<(), PrefsError> {
        self.prefs.edit(vec![
            (LOGGED_IN.into(), Some(true.into())),
            (USER_ID.into(), Some(session.user_id.clone().into())),
            (USER_EMAIL.into(), Some(session.email.clone().into())),
        ])
    }

    pub fn current_session(&self) -> Option<Session> {
        if !self.prefs.get_bool(LOGGED_IN).unwrap_or(false) {
            return None;
        }
        Some(Session {
            user_id: self.prefs.get_string(USER_ID)?,
            email: self.prefs.get_string(USER_EMAIL).unwrap_or_default(),
        })
    }

    pub fn clear_session(&self) -> Result<(), PrefsError> {
        self.prefs.edit(vec![
            (LOGGED_IN.into(), Some(false.into())),
            (USER_ID.into(), None),
            (USER_EMAIL.into(), None),
        ])
    }

    pub fn dark_mode(&self) -> bool {
        self.prefs.get_bool(DARK_MODE).unwrap_or(false)
    }

    pub fn set_dark_mode(&self, enabled: bool) -> Result<(), PrefsError> {
        self.prefs.set(DARK_MODE, enabled)
    }

    pub fn locale(&self) -> Option<String> {
        self.prefs.get_string(LOCALE)
    }

    pub fn set_locale(&self, locale: &str) -> Result<(), PrefsError> {
        self.prefs.set(LOCALE, locale)
    }
}
