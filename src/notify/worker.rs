use chrono::{Datelike, Days, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::app::Session;
use crate::calendar::{Holiday, MEETING_TYPE};
use crate::clock::Clock;
use crate::notify::{Notifier, Reminder, HOME_DEEP_LINK};
use crate::repository::{CustomCalendarRepository, HolidayRepository, OfflineManager, RepositoryError};
use crate::storage::config::NotificationsConfig;
use crate::storage::dashboard::DashboardSlots;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub check_interval: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub default_country: String,
}

impl WorkerSettings {
    pub fn from_config(config: &NotificationsConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(u64::from(config.check_interval_hours.max(1)) * 3600),
            retry_delay: Duration::from_secs(u64::from(config.retry_delay_minutes) * 60),
            max_retries: config.max_retries,
            default_country: config.default_country.trim().to_uppercase(),
        }
    }
}

/// Looks one day ahead for the primary user and raises a reminder for
/// every public holiday and calendar event that falls on it.
pub struct ReminderWorker {
    offline: OfflineManager,
    calendars: CustomCalendarRepository,
    holidays: HolidayRepository,
    dashboard: DashboardSlots,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: WorkerSettings,
}

impl ReminderWorker {
    pub fn new(
        offline: OfflineManager,
        calendars: CustomCalendarRepository,
        holidays: HolidayRepository,
        dashboard: DashboardSlots,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: WorkerSettings,
    ) -> Self {
        Self { offline, calendars, holidays, dashboard, notifier, clock, settings }
    }

    /// One pass; returns how many reminders were sent.
    pub async fn run_once(&self) -> Result<usize, RepositoryError> {
        let Some(primary) = self.offline.get_primary_user()? else {
            tracing::debug!("No primary user, skipping reminder check");
            return Ok(0);
        };
        let session = Session::from(&primary);
        let Some(tomorrow) = self.clock.today().checked_add_days(Days::new(1)) else {
            return Ok(0);
        };

        let mut reminders = Vec::new();

        let mut countries = self.dashboard.public_countries(&session.user_id)?;
        if countries.is_empty() && !self.settings.default_country.is_empty() {
            countries.push(self.settings.default_country.clone());
        }
        for country in &countries {
            let holidays = self.holidays.get_public_holidays(country, tomorrow.year(), false).await?;
            reminders.extend(
                holidays
                    .iter()
                    .filter(|h| h.falls_on(tomorrow))
                    .map(|h| public_reminder(h, country, tomorrow)),
            );
        }

        for calendar in self.calendars.get_user_calendars(&session, true).await? {
            reminders.extend(
                calendar
                    .holidays_sorted()
                    .into_iter()
                    .filter(|h| h.falls_on(tomorrow))
                    .map(|h| custom_reminder(h, &calendar.title, tomorrow)),
            );
        }

        for reminder in &reminders {
            self.notifier.notify(reminder);
        }
        tracing::info!("Sent {} reminders for {} to {}", reminders.len(), tomorrow, session.user_id);
        Ok(reminders.len())
    }

    /// Runs a pass every `check_interval` until `shutdown` flips to true or
    /// its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Reminder worker started, interval {:?}", self.settings.check_interval);
        loop {
            if *shutdown.borrow() || !self.run_with_retries(&mut shutdown).await {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.check_interval) => {}
            }
        }
        tracing::info!("Reminder worker shutting down");
    }

    /// Returns false if shutdown was requested while waiting to retry.
    async fn run_with_retries(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let mut attempt = 0;
        loop {
            match self.run_once().await {
                Ok(_) => return true,
                Err(e) if attempt >= self.settings.max_retries => {
                    tracing::error!("Reminder check failed after {} retries: {}", attempt, e);
                    return true;
                }
                Err(e) => {
                    attempt += 1;
                    tracing::warn!(
                        "Reminder check failed (retryable: {}), retry {}/{} in {:?}: {}",
                        e.is_retryable(),
                        attempt,
                        self.settings.max_retries,
                        self.settings.retry_delay,
                        e
                    );
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
                _ = tokio::time::sleep(self.settings.retry_delay) => {}
            }
        }
    }
}

fn public_reminder(holiday: &Holiday, country: &str, date: NaiveDate) -> Reminder {
    Reminder {
        title: holiday.name.clone(),
        body: format!("Tomorrow is {} ({})", holiday.name, country),
        date,
        source: country.to_string(),
        deep_link: HOME_DEEP_LINK.to_string(),
    }
}

fn custom_reminder(holiday: &Holiday, calendar_title: &str, date: NaiveDate) -> Reminder {
    let body = match (&holiday.date.start_time, holiday.types.iter().any(|t| t == MEETING_TYPE)) {
        (Some(start), true) => format!("Meeting tomorrow at {}", start),
        _ => format!("Tomorrow in {}", calendar_title),
    };
    Reminder {
        title: holiday.name.clone(),
        body,
        date,
        source: calendar_title.to_string(),
        deep_link: HOME_DEEP_LINK.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::User;
    use crate::clock::FixedClock;
    use crate::storage::cache::LocalCache;
    use crate::storage::dashboard::{DashboardSlot, SlotType};
    use crate::storage::holiday_cache::HolidayCache;
    use crate::storage::preferences::Preferences;
    use crate::sync::calendar_remote::CalendarRemote;
    use crate::sync::document_store::MemoryDocumentStore;
    use crate::sync::holiday_api::{ApiError, MockHolidayApi};
    use crate::sync::holiday_remote::HolidayRemote;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Reminder>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, reminder: &Reminder) {
            self.sent.lock().unwrap().push(reminder.clone());
        }
    }

    fn holidays_body(country: &str) -> String {
        json!({
            "meta": { "code": 200 },
            "response": { "holidays": [
                { "name": "Independence Day", "country": { "id": country }, "date": { "iso": "2025-07-04" } },
                { "name": "Some Other Day", "country": { "id": country }, "date": { "iso": "2025-07-10" } }
            ]}
        })
        .to_string()
    }

    struct Fixture {
        offline: OfflineManager,
        calendars: CustomCalendarRepository,
        dashboard: DashboardSlots,
        notifier: Arc<RecordingNotifier>,
        worker: ReminderWorker,
    }

    fn fixture(api: MockHolidayApi, max_retries: u32) -> Fixture {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 7, 3, 12, 0, 0).unwrap()));
        let store = Arc::new(MemoryDocumentStore::new());
        let remote = CalendarRemote::new(store.clone(), clock.clone());
        let events = HolidayRemote::new(store, remote.clone());
        let offline = OfflineManager::new(Arc::new(LocalCache::open_in_memory().unwrap()), clock.clone());
        let prefs = Arc::new(Preferences::in_memory());
        let calendars = CustomCalendarRepository::new(remote, events, offline.clone());
        let holidays = HolidayRepository::new(Arc::new(api), HolidayCache::new(prefs.clone(), clock.clone()), offline.clone());
        let dashboard = DashboardSlots::new(prefs);
        let notifier = Arc::new(RecordingNotifier::default());
        let settings = WorkerSettings {
            check_interval: Duration::from_secs(3600),
            retry_delay: Duration::from_millis(1),
            max_retries,
            default_country: "US".into(),
        };

        let worker = ReminderWorker::new(
            offline.clone(),
            calendars.clone(),
            holidays,
            dashboard.clone(),
            notifier.clone(),
            clock,
            settings,
        );
        Fixture { offline, calendars, dashboard, notifier, worker }
    }

    #[tokio::test]
    async fn does_nothing_without_primary_user() {
        let f = fixture(MockHolidayApi::new(), 0);

        assert_eq!(f.worker.run_once().await.unwrap(), 0);
        assert!(f.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reminds_of_tomorrows_holidays_and_events() {
        let mut api = MockHolidayApi::new();
        api.expect_fetch_holidays_raw()
            .withf(|country, year| country == "US" && *year == 2025)
            .returning(|_, _| Ok(holidays_body("us")));
        let f = fixture(api, 0);
        f.offline.save_primary_user(&User::new("alice", "alice@x.com"), None).unwrap();
        let session = Session::new("alice", "alice@x.com");
        let calendar = f.calendars.create_calendar(&session, "Family", None).await.unwrap();
        f.calendars.add_event(&session, &calendar.id, Holiday::new("", "BBQ", "2025-07-04")).await.unwrap();
        f.calendars.add_event(&session, &calendar.id, Holiday::new("", "Later", "2025-08-01")).await.unwrap();

        let sent = f.worker.run_once().await.unwrap();

        assert_eq!(sent, 2);
        let reminders = f.notifier.sent.lock().unwrap().clone();
        let titles: Vec<&str> = reminders.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Independence Day", "BBQ"]);
        assert!(reminders.iter().all(|r| r.deep_link == HOME_DEEP_LINK));
        assert_eq!(reminders[1].source, "Family");
    }

    #[tokio::test]
    async fn uses_dashboard_countries_instead_of_default() {
        let mut api = MockHolidayApi::new();
        api.expect_fetch_holidays_raw()
            .withf(|country, _| country == "DE")
            .times(1)
            .returning(|_, _| Ok(holidays_body("de")));
        let f = fixture(api, 0);
        f.offline.save_primary_user(&User::new("alice", "alice@x.com"), None).unwrap();
        f.dashboard
            .set_slot("alice", 2, &DashboardSlot::new(SlotType::PublicHolidays, "de", "Germany"))
            .unwrap();

        assert_eq!(f.worker.run_once().await.unwrap(), 1);
        assert_eq!(f.notifier.sent.lock().unwrap()[0].source, "DE");
    }

    #[tokio::test]
    async fn failed_runs_are_retried_then_abandoned_until_next_tick() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut api = MockHolidayApi::new();
        api.expect_fetch_holidays_raw().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::RateLimited)
        });
        let f = fixture(api, 2);
        f.offline.save_primary_user(&User::new("alice", "alice@x.com"), None).unwrap();

        let worker = Arc::new(f.worker);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(rx).await }
        });

        for _ in 0..200 {
            if attempts.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_wait_ignores_updates_that_keep_running() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut api = MockHolidayApi::new();
        api.expect_fetch_holidays_raw().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::RateLimited)
        });
        let f = fixture(api, 1);
        f.offline.save_primary_user(&User::new("alice", "alice@x.com"), None).unwrap();
        let (tx, mut rx) = watch::channel(false);
        tx.send(false).unwrap();

        assert!(f.worker.run_with_retries(&mut rx).await);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        assert!(!f.worker.run_with_retries(&mut rx).await);
    }

    #[test]
    fn meeting_reminder_mentions_start_time() {
        let mut holiday = Holiday::new("m1", "Standup", "2025-07-04");
        holiday.types = vec![MEETING_TYPE.to_string()];
        holiday.date.start_time = Some("09:30".into());

        let reminder = custom_reminder(&holiday, "Meetings", NaiveDate::from_ymd_opt(2025, 7, 4).unwrap());

        assert_eq!(reminder.body, "Meeting tomorrow at 09:30");
    }

    #[test]
    fn settings_follow_config() {
        let config = NotificationsConfig {
            enabled: true,
            check_interval_hours: 24,
            retry_delay_minutes: 15,
            max_retries: 3,
            default_country: " us".into(),
        };

        let settings = WorkerSettings::from_config(&config);

        assert_eq!(settings.check_interval, Duration::from_secs(86_400));
        assert_eq!(settings.retry_delay, Duration::from_secs(900));
        assert_eq!(settings.default_country, "US");
    }
}
