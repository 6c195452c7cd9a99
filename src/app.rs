use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::calendar::{normalize_email, User};
use crate::clock::{Clock, SystemClock};
use crate::notify::{Notifier, ReminderWorker, WorkerSettings};
use crate::repository::{CustomCalendarRepository, HolidayRepository, OfflineManager, RepositoryError};
use crate::storage::cache::{CacheError, LocalCache, StoredUser};
use crate::storage::config::Config;
use crate::storage::dashboard::DashboardSlots;
use crate::storage::holiday_cache::HolidayCache;
use crate::storage::preferences::{Preferences, PrefsError};
use crate::storage::settings::AppSettings;
use crate::sync::calendar_remote::CalendarRemote;
use crate::sync::document_store::{DocumentStore, MemoryDocumentStore};
use crate::sync::holiday_api::{CalendarificClient, HolidayApi};
use crate::sync::holiday_remote::HolidayRemote;
use crate::sync::meeting_remote::MeetingRemote;
use crate::sync::rest_store::RestDocumentStore;
use crate::sync::user_remote::UserRemote;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Local cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Preferences error: {0}")]
    Prefs(#[from] PrefsError),
}

/// The signed-in user, passed explicitly to everything that acts on
/// their behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
        }
    }
}

impl From<&StoredUser> for Session {
    fn from(stored: &StoredUser) -> Self {
        Self::new(stored.user.id.clone(), stored.user.email.clone())
    }
}

/// Storage and network handles the context is assembled from.
pub struct Backends {
    pub clock: Arc<dyn Clock>,
    pub cache: Arc<LocalCache>,
    pub app_prefs: Arc<Preferences>,
    pub holiday_prefs: Arc<Preferences>,
    pub dashboard_prefs: Arc<Preferences>,
    pub store: Arc<dyn DocumentStore>,
    pub holiday_api: Arc<dyn HolidayApi>,
}

pub struct AppContext {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub settings: AppSettings,
    pub dashboard: DashboardSlots,
    pub offline: OfflineManager,
    pub users: UserRemote,
    pub meetings: MeetingRemote,
    pub calendars: CustomCalendarRepository,
    pub holidays: HolidayRepository,
}

impl AppContext {
    pub fn open(config: &Config) -> Result<Self, AppError> {
        let cache = LocalCache::open(&config.database_path())?;

        let store: Arc<dyn DocumentStore> = if config.remote.database_url.trim().is_empty() {
            tracing::warn!("No database URL configured, using an in-process store");
            Arc::new(MemoryDocumentStore::new())
        } else {
            tracing::info!("Using remote store at {}", config.remote.database_url);
            Arc::new(
                RestDocumentStore::new(config.remote.database_url.trim())
                    .with_auth_token(config.remote.auth_token.clone()),
            )
        };

        let api_key = config.holiday_api_key();
        if api_key.is_empty() {
            tracing::warn!("No holiday API key configured");
        }
        let holiday_api = CalendarificClient::new(api_key).with_base_url(config.holiday_api.base_url.clone());

        let backends = Backends {
            clock: Arc::new(SystemClock),
            cache: Arc::new(cache),
            app_prefs: Arc::new(Preferences::open(config.prefs_path("app"))?),
            holiday_prefs: Arc::new(Preferences::open(config.prefs_path("holiday_cache"))?),
            dashboard_prefs: Arc::new(Preferences::open(config.prefs_path("dashboard"))?),
            store,
            holiday_api: Arc::new(holiday_api),
        };
        Ok(Self::from_backends(config.clone(), backends))
    }

    pub fn from_backends(config: Config, backends: Backends) -> Self {
        let Backends { clock, cache, app_prefs, holiday_prefs, dashboard_prefs, store, holiday_api } = backends;

        let offline = OfflineManager::new(cache, clock.clone())
            .with_retention_days(i64::from(config.storage.offline_retention_days));
        let holiday_cache =
            HolidayCache::new(holiday_prefs, clock.clone()).with_ttl_days(i64::from(config.storage.holiday_cache_days));

        let remote_calendars = CalendarRemote::new(store.clone(), clock.clone());
        let events = HolidayRemote::new(store.clone(), remote_calendars.clone());
        let meetings = MeetingRemote::new(store, remote_calendars.clone(), clock.clone());

        Self {
            settings: AppSettings::new(app_prefs),
            dashboard: DashboardSlots::new(dashboard_prefs),
            users: remote_calendars.users().clone(),
            meetings,
            calendars: CustomCalendarRepository::new(remote_calendars, events, offline.clone()),
            holidays: HolidayRepository::new(holiday_api, holiday_cache, offline.clone()),
            offline,
            clock,
            config,
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.settings.current_session()
    }

    /// Stores the outcome of a successful online sign-in: the profile is
    /// pushed remotely and the account becomes the device's primary user.
    pub async fn record_login(&self, user: &User, password: Option<&str>) -> Result<Session, RepositoryError> {
        self.users.save_user(user).await?;
        self.offline.save_primary_user(user, password)?;
        let session = Session::new(user.id.clone(), normalize_email(&user.email));
        self.settings.save_session(&session)?;
        Ok(session)
    }

    /// Creates a new account with a fresh id and signs it in.
    pub async fn register(&self, email: &str, password: &str) -> Result<Session, RepositoryError> {
        let user = User::new(Uuid::new_v4().simple().to_string(), normalize_email(email));
        self.record_login(&user, Some(password)).await
    }

    pub fn login_offline(&self, email: &str, password: &str) -> Result<Option<Session>, RepositoryError> {
        let Some(stored) = self.offline.validate_offline_login(email, password)? else {
            return Ok(None);
        };
        let session = Session::from(&stored);
        self.settings.save_session(&session)?;
        Ok(Some(session))
    }

    pub fn logout(&self) -> Result<(), RepositoryError> {
        if let Some(session) = self.current_session() {
            tracing::info!("Logging out {}", session.user_id);
        }
        self.settings.clear_session()?;
        Ok(())
    }

    pub fn reminder_worker(&self, notifier: Arc<dyn Notifier>) -> ReminderWorker {
        ReminderWorker::new(
            self.offline.clone(),
            self.calendars.clone(),
            self.holidays.clone(),
            self.dashboard.clone(),
            notifier,
            self.clock.clone(),
            WorkerSettings::from_config(&self.config.notifications),
        )
    }
}
