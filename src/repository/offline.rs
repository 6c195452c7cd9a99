use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::calendar::{normalize_email, CachedHoliday, Calendar, Holiday, SourceType, User};
use crate::clock::Clock;
use crate::storage::cache::{cached_holiday, CacheError, LocalCache, StoredUser};

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Argon2id with a fresh salt, stored as a PHC string.
fn hash_password(password: &str) -> Result<String, CacheError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| CacheError::PasswordHash(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CacheError::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!("Unreadable password hash in the local cache: {}", e);
            false
        }
    }
}

/// Everything the app keeps on the device so it keeps working without a
/// connection: the known accounts, the dashboard calendars and the
/// holidays shown on it.
#[derive(Clone)]
pub struct OfflineManager {
    cache: Arc<LocalCache>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
}

impl OfflineManager {
    pub fn new(cache: Arc<LocalCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock,
            retention: chrono::Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention = chrono::Duration::days(days);
        self
    }

    /// Stores the profile. A `None` password keeps whatever hash is
    /// already on file.
    pub fn save_user(&self, user: &User, password: Option<&str>, stamp_login: bool) -> Result<(), CacheError> {
        let existing = self.cache.get_user(&user.id)?;

        let password_hash = match password {
            Some(password) => Some(hash_password(password)?),
            None => existing.as_ref().and_then(|e| e.password_hash.clone()),
        };
        let last_login = if stamp_login {
            Some(self.clock.now_millis())
        } else {
            existing.as_ref().and_then(|e| e.last_login)
        };

        let mut user = user.clone();
        user.email = normalize_email(&user.email);
        self.cache.upsert_user(&StoredUser {
            user,
            password_hash,
            is_primary: existing.is_some_and(|e| e.is_primary),
            last_login,
        })
    }

    /// Records a successful online login: the user becomes the only primary
    /// account on the device.
    pub fn save_primary_user(&self, user: &User, password: Option<&str>) -> Result<(), CacheError> {
        self.save_user(user, password, true)?;
        self.cache.clear_primary_flags()?;

        let Some(mut stored) = self.cache.get_user(&user.id)? else {
            return Ok(());
        };
        stored.is_primary = true;
        self.cache.upsert_user(&stored)?;
        tracing::info!("Primary user is now {}", user.id);
        Ok(())
    }

    pub fn get_primary_user(&self) -> Result<Option<StoredUser>, CacheError> {
        self.cache.get_primary_user()
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<StoredUser>, CacheError> {
        self.cache.get_user(user_id)
    }

    pub fn validate_offline_login(&self, email: &str, password: &str) -> Result<Option<StoredUser>, CacheError> {
        let email = normalize_email(email);
        let Some(mut stored) = self.cache.find_user_by_email(&email)? else {
            tracing::info!("Offline login failed: no cached account for {}", email);
            return Ok(None);
        };

        let valid = stored
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash));
        if !valid {
            tracing::info!("Offline login failed: wrong password for {}", email);
            return Ok(None);
        }

        let now = self.clock.now_millis();
        self.cache.set_last_login(&stored.user.id, now)?;
        stored.last_login = Some(now);
        tracing::info!("Offline login succeeded for {}", stored.user.id);
        Ok(Some(stored))
    }

    fn custom_rows(calendar: &Calendar, now: i64) -> Vec<CachedHoliday> {
        calendar
            .holidays
            .iter()
            .map(|(key, holiday)| {
                let mut holiday = holiday.clone();
                if holiday.id.trim().is_empty() {
                    holiday.id = if key.trim().is_empty() { Uuid::new_v4().simple().to_string() } else { key.clone() };
                }
                cached_holiday(holiday, SourceType::Custom, &calendar.id, None, now)
            })
            .collect()
    }

    /// Replaces the cached dashboard of `user_id` with `calendars` and their
    /// nested events.
    pub fn save_dashboard_calendars_offline(&self, user_id: &str, calendars: &[Calendar]) -> Result<(), CacheError> {
        let now = self.clock.now_millis();
        let holidays: Vec<_> = calendars.iter().flat_map(|c| Self::custom_rows(c, now)).collect();

        self.cache.replace_calendars(user_id, calendars, &holidays, now)?;
        tracing::debug!("Cached {} calendars with {} events for {}", calendars.len(), holidays.len(), user_id);
        Ok(())
    }

    pub fn get_dashboard_calendars_offline(&self, user_id: &str) -> Result<Vec<Calendar>, CacheError> {
        let mut calendars = Vec::new();
        for cached in self.cache.get_calendars(user_id)? {
            let mut calendar = cached.calendar;
            for row in self.cache.get_holidays(SourceType::Custom, &calendar.id, None)? {
                calendar.holidays.insert(row.holiday.id.clone(), row.holiday);
            }
            calendars.push(calendar);
        }
        Ok(calendars)
    }

    /// Writes one calendar into a dashboard that is already cached. A cold
    /// dashboard is left empty so the next read fetches the full set.
    pub fn save_calendar_offline(&self, user_id: &str, calendar: &Calendar) -> Result<(), CacheError> {
        if self.cache.get_calendars(user_id)?.is_empty() {
            tracing::debug!("No cached dashboard for {}, skipping write of {}", user_id, calendar.id);
            return Ok(());
        }
        self.cache.upsert_calendar(user_id, calendar, self.clock.now_millis())
    }

    pub fn remove_calendar_offline(&self, calendar_id: &str) -> Result<(), CacheError> {
        self.cache.delete_calendar(calendar_id)
    }

    pub fn invalidate_user_calendars(&self, user_id: &str) -> Result<(), CacheError> {
        tracing::debug!("Invalidating cached calendars of {}", user_id);
        self.cache.delete_calendars_for(user_id)
    }

    pub fn save_public_holidays_offline(&self, country: &str, year: i32, holidays: &[Holiday]) -> Result<(), CacheError> {
        let country = country.trim().to_uppercase();
        let now = self.clock.now_millis();
        let rows: Vec<_> = holidays
            .iter()
            .map(|h| {
                let mut holiday = h.clone();
                holiday.country_code = Some(country.clone());
                cached_holiday(holiday, SourceType::Public, &country, Some(year), now)
            })
            .collect();

        self.cache.delete_holidays(SourceType::Public, &country, Some(year))?;
        self.cache.upsert_holidays(&rows)
    }

    pub fn get_offline_public_holidays(&self, country: &str, year: i32) -> Result<Vec<Holiday>, CacheError> {
        let country = country.trim().to_uppercase();
        let rows = self.cache.get_holidays(SourceType::Public, &country, Some(year))?;
        Ok(sorted(rows.into_iter().map(|r| r.holiday).collect()))
    }

    pub fn save_custom_holidays_offline(&self, calendar_id: &str, holidays: &[Holiday]) -> Result<(), CacheError> {
        let now = self.clock.now_millis();
        let rows: Vec<_> = holidays
            .iter()
            .map(|h| cached_holiday(h.clone(), SourceType::Custom, calendar_id, None, now))
            .collect();

        self.cache.delete_holidays(SourceType::Custom, calendar_id, None)?;
        self.cache.upsert_holidays(&rows)
    }

    /// Same rule as `save_calendar_offline`: a calendar whose events were
    /// never cached stays uncached.
    pub fn save_custom_holiday_offline(&self, calendar_id: &str, holiday: &Holiday) -> Result<(), CacheError> {
        if self.cache.get_holidays(SourceType::Custom, calendar_id, None)?.is_empty() {
            tracing::debug!("Events of {} are not cached, skipping write of {}", calendar_id, holiday.id);
            return Ok(());
        }
        let row = cached_holiday(holiday.clone(), SourceType::Custom, calendar_id, None, self.clock.now_millis());
        self.cache.upsert_holidays(&[row])
    }

    pub fn remove_custom_holiday_offline(&self, calendar_id: &str, holiday_id: &str) -> Result<(), CacheError> {
        self.cache.delete_holiday(&format!("{}_{}", calendar_id, holiday_id))
    }

    pub fn get_offline_custom_holidays(&self, calendar_id: &str) -> Result<Vec<Holiday>, CacheError> {
        let rows = self.cache.get_holidays(SourceType::Custom, calendar_id, None)?;
        Ok(sorted(rows.into_iter().map(|r| r.holiday).collect()))
    }

    /// Drops calendar and holiday rows older than the retention window.
    pub fn purge_stale(&self) -> Result<usize, CacheError> {
        let cutoff = self.clock.now_millis() - self.retention.num_milliseconds();
        let removed = self.cache.delete_cached_before(cutoff)?;
        if removed > 0 {
            tracing::info!("Purged {} stale offline rows", removed);
        }
        Ok(removed)
    }
}

fn sorted(mut holidays: Vec<Holiday>) -> Vec<Holiday> {
    holidays.sort_by(|a, b| a.date.iso.cmp(&b.date.iso).then_with(|| a.name.cmp(&b.name)));
    holidays
}
