use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::storage::preferences::{Preferences, PrefsError};

pub const DEFAULT_TTL_DAYS: i64 = 90;
const KEY_PREFIX: &str = "holiday_cache_";
const COUNTRIES_KEY: &str = "holiday_cache_countries";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    json: String,
    saved_at: i64,
}

/// Raw holiday API responses keyed by country and year.
#[derive(Clone)]
pub struct HolidayCache {
    prefs: Arc<Preferences>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl HolidayCache {
    pub fn new(prefs: Arc<Preferences>, clock: Arc<dyn Clock>) -> Self {
        Self {
            prefs,
            clock,
            ttl: chrono::Duration::days(DEFAULT_TTL_DAYS),
        }
    }

    pub fn with_ttl_days(mut self, days: i64) -> Self {
        self.ttl = chrono::Duration::days(days);
        self
    }

    fn key(country: &str, year: i32) -> String {
        format!("{}{}_{}", KEY_PREFIX, country.trim().to_uppercase(), year)
    }

    pub fn get(&self, country: &str, year: i32) -> Option<String> {
        self.read_fresh(&Self::key(country, year))
    }

    pub fn put(&self, country: &str, year: i32, json: &str) -> Result<(), PrefsError> {
        self.write(&Self::key(country, year), json)
    }

    pub fn invalidate(&self, country: &str, year: i32) -> Result<(), PrefsError> {
        self.prefs.remove(&Self::key(country, year))
    }

    pub fn get_countries(&self) -> Option<String> {
        self.read_fresh(COUNTRIES_KEY)
    }

    pub fn put_countries(&self, json: &str) -> Result<(), PrefsError> {
        self.write(COUNTRIES_KEY, json)
    }

    pub fn clear(&self) -> Result<(), PrefsError> {
        let writes = self
            .prefs
            .keys_with_prefix(KEY_PREFIX)
            .into_iter()
            .map(|k| (k, None))
            .collect();
        self.prefs.edit(writes)
    }

    fn write(&self, key: &str, json: &str) -> Result<(), PrefsError> {
        let entry = CacheEntry {
            json: json.to_string(),
            saved_at: self.clock.now_millis(),
        };
        self.prefs.set(key, serde_json::to_value(entry)?)
    }

    fn read_fresh(&self, key: &str) -> Option<String> {
        let value = self.prefs.get(key)?;

        let entry: CacheEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Dropping unreadable holiday cache entry {}: {}", key, e);
                self.drop_entry(key);
                return None;
            }
        };

        let age = self.clock.now_millis() - entry.saved_at;
        if age > self.ttl.num_milliseconds() {
            tracing::debug!("Holiday cache entry {} expired", key);
            self.drop_entry(key);
            return None;
        }

        Some(entry.json)
    }

    fn drop_entry(&self, key: &str) {
        if let Err(e) = self.prefs.remove(key) {
            tracing::warn!("Failed to remove holiday cache entry {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<FixedClock>, Arc<Preferences>, HolidayCache) {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let prefs = Arc::new(Preferences::in_memory());
        let cache = HolidayCache::new(prefs.clone(), clock.clone());
        (clock, prefs, cache)
    }

    #[test]
    fn returns_stored_json_within_ttl() {
        let (clock, _, cache) = setup();
        cache.put("us", 2025, r#"{"holidays":[]}"#).unwrap();

        clock.advance(chrono::Duration::days(89));

        assert_eq!(cache.get("US", 2025).as_deref(), Some(r#"{"holidays":[]}"#));
    }

    #[test]
    fn expires_after_ttl() {
        let (clock, prefs, cache) = setup();
        cache.put("US", 2025, "{}").unwrap();

        clock.advance(chrono::Duration::days(91));

        assert_eq!(cache.get("US", 2025), None);
        assert!(!prefs.contains("holiday_cache_US_2025"));
    }

    #[test]
    fn entries_are_keyed_by_country_and_year() {
        let (_, _, cache) = setup();
        cache.put("US", 2025, "a").unwrap();

        assert_eq!(cache.get("US", 2024), None);
        assert_eq!(cache.get("BR", 2025), None);
    }

    #[test]
    fn corrupt_entry_is_treated_as_absent() {
        let (_, prefs, cache) = setup();
        prefs.set("holiday_cache_US_2025", "not an entry").unwrap();

        assert_eq!(cache.get("US", 2025), None);
        assert!(!prefs.contains("holiday_cache_US_2025"));
    }

    #[test]
    fn clear_only_touches_cache_keys() {
        let (_, prefs, cache) = setup();
        prefs.set("dark_mode", true).unwrap();
        cache.put("US", 2025, "a").unwrap();
        cache.put_countries("[]").unwrap();

        cache.clear().unwrap();

        assert_eq!(cache.get("US", 2025), None);
        assert_eq!(cache.get_countries(), None);
        assert_eq!(prefs.get_bool("dark_mode"), Some(true));
    }

    #[test]
    fn custom_ttl_is_honored() {
        let (clock, prefs, _) = setup();
        let cache = HolidayCache::new(prefs, clock.clone()).with_ttl_days(1);
        cache.put("US", 2025, "a").unwrap();

        clock.advance(chrono::Duration::days(2));

        assert_eq!(cache.get("US", 2025), None);
    }
}
