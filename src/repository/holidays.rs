use std::sync::Arc;

use crate::calendar::{Country, Holiday};
use crate::repository::offline::OfflineManager;
use crate::repository::RepositoryError;
use crate::storage::holiday_cache::HolidayCache;
use crate::sync::holiday_api::{parse_holidays, HolidayApi};

/// Public holidays: fresh cache entry first, then the API, then whatever
/// was stored offline.
#[derive(Clone)]
pub struct HolidayRepository {
    api: Arc<dyn HolidayApi>,
    cache: HolidayCache,
    offline: OfflineManager,
}

impl HolidayRepository {
    pub fn new(api: Arc<dyn HolidayApi>, cache: HolidayCache, offline: OfflineManager) -> Self {
        Self { api, cache, offline }
    }

    pub async fn get_public_holidays(
        &self,
        country: &str,
        year: i32,
        force_refresh: bool,
    ) -> Result<Vec<Holiday>, RepositoryError> {
        let country = country.trim().to_uppercase();

        if !force_refresh && let Some(json) = self.cache.get(&country, year) {
            match parse_holidays(&json) {
                Ok(holidays) => {
                    tracing::debug!("Holiday cache hit for {} {}", country, year);
                    return Ok(holidays);
                }
                Err(e) => {
                    tracing::warn!("Cached holidays for {} {} are corrupt: {}", country, year, e);
                    if let Err(e) = self.cache.invalidate(&country, year) {
                        tracing::warn!("Failed to invalidate holiday cache entry: {}", e);
                    }
                }
            }
        }

        let body = match self.api.fetch_holidays_raw(&country, year).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Holiday API failed for {} {}: {}", country, year, e);
                let offline = self.offline.get_offline_public_holidays(&country, year)?;
                if offline.is_empty() {
                    return Err(e.into());
                }
                tracing::info!("Using {} offline holidays for {} {}", offline.len(), country, year);
                return Ok(offline);
            }
        };

        let holidays = parse_holidays(&body)?;
        if let Err(e) = self.cache.put(&country, year, &body) {
            tracing::warn!("Failed to cache holidays for {} {}: {}", country, year, e);
        }
        if let Err(e) = self.offline.save_public_holidays_offline(&country, year, &holidays) {
            tracing::warn!("Failed to store offline holidays for {} {}: {}", country, year, e);
        }
        Ok(holidays)
    }

    pub async fn get_countries(&self, force_refresh: bool) -> Result<Vec<Country>, RepositoryError> {
        if !force_refresh && let Some(json) = self.cache.get_countries() {
            match serde_json::from_str::<Vec<Country>>(&json) {
                Ok(countries) => return Ok(countries),
                Err(e) => tracing::warn!("Cached country list is corrupt: {}", e),
            }
        }

        let countries = self.api.fetch_countries().await?;
        match serde_json::to_string(&countries) {
            Ok(json) => {
                if let Err(e) = self.cache.put_countries(&json) {
                    tracing::warn!("Failed to cache country list: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize country list: {}", e),
        }
        Ok(countries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::cache::LocalCache;
    use crate::storage::preferences::Preferences;
    use crate::sync::holiday_api::{ApiError, MockHolidayApi};
    use chrono::{TimeZone, Utc};
    use mockall::Sequence;
    use serde_json::json;

    fn body() -> String {
        json!({
            "meta": { "code": 200 },
            "response": { "holidays": [
                { "name": "Independence Day", "country": { "id": "us" }, "date": { "iso": "2025-07-04" }, "urlid": "us/independence-day" }
            ]}
        })
        .to_string()
    }

    fn repository(api: MockHolidayApi) -> (Arc<FixedClock>, HolidayCache, HolidayRepository) {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()));
        let cache = HolidayCache::new(Arc::new(Preferences::in_memory()), clock.clone());
        let offline = OfflineManager::new(Arc::new(LocalCache::open_in_memory().unwrap()), clock.clone());
        (clock, cache.clone(), HolidayRepository::new(Arc::new(api), cache, offline))
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let mut api = MockHolidayApi::new();
        api.expect_fetch_holidays_raw()
            .withf(|country, year| country == "US" && *year == 2025)
            .times(1)
            .returning(|_, _| Ok(body()));
        let (_, _, repo) = repository(api);

        let first = repo.get_public_holidays("us ", 2025, false).await.unwrap();
        let second = repo.get_public_holidays("US", 2025, false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].name, "Independence Day");
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let mut api = MockHolidayApi::new();
        api.expect_fetch_holidays_raw().times(2).returning(|_, _| Ok(body()));
        let (clock, _, repo) = repository(api);

        repo.get_public_holidays("US", 2025, false).await.unwrap();
        clock.advance(chrono::Duration::days(91));
        repo.get_public_holidays("US", 2025, false).await.unwrap();
    }

    #[tokio::test]
    async fn api_failure_falls_back_to_offline_rows() {
        let mut api = MockHolidayApi::new();
        let mut seq = Sequence::new();
        api.expect_fetch_holidays_raw()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(body()));
        api.expect_fetch_holidays_raw()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ApiError::RateLimited));
        let (_, _, repo) = repository(api);

        repo.get_public_holidays("US", 2025, false).await.unwrap();
        let offline = repo.get_public_holidays("US", 2025, true).await.unwrap();

        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].country_code.as_deref(), Some("US"));
    }

    #[tokio::test]
    async fn api_failure_without_offline_rows_is_an_error() {
        let mut api = MockHolidayApi::new();
        api.expect_fetch_holidays_raw().returning(|_, _| Err(ApiError::RateLimited));
        let (_, _, repo) = repository(api);

        let err = repo.get_public_holidays("DE", 2025, false).await.unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_replaced() {
        let mut api = MockHolidayApi::new();
        api.expect_fetch_holidays_raw().times(1).returning(|_, _| Ok(body()));
        let (_, cache, repo) = repository(api);
        cache.put("US", 2025, "{ not json").unwrap();

        let holidays = repo.get_public_holidays("US", 2025, false).await.unwrap();

        assert_eq!(holidays.len(), 1);
        assert_eq!(cache.get("US", 2025), Some(body()));
    }

    #[tokio::test]
    async fn countries_are_cached() {
        let mut api = MockHolidayApi::new();
        api.expect_fetch_countries()
            .times(1)
            .returning(|| Ok(vec![Country { name: "Germany".into(), code: "DE".into() }]));
        let (_, _, repo) = repository(api);

        let first = repo.get_countries(false).await.unwrap();
        let second = repo.get_countries(false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second[0].code, "DE");
    }
}
