use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::calendar::{Country, Holiday, HolidayDate};

pub const DEFAULT_BASE_URL: &str = "https://calendarific.com/api/v2";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::HttpError(_) | ApiError::RateLimited)
    }
}

#[derive(Debug, Deserialize)]
struct Meta {
    code: u16,
    #[serde(default)]
    error_detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    meta: Meta,
    #[serde(default)]
    response: Option<T>,
}

#[derive(Debug, Deserialize)]
struct HolidayList {
    #[serde(default)]
    holidays: Vec<ApiHoliday>,
}

#[derive(Debug, Deserialize)]
struct ApiHoliday {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    country: Option<ApiCountryRef>,
    date: ApiDate,
    #[serde(default, rename = "type")]
    types: Vec<String>,
    #[serde(default)]
    urlid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCountryRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiDate {
    iso: String,
}

#[derive(Debug, Deserialize)]
struct CountryList {
    #[serde(default)]
    countries: Vec<ApiCountry>,
}

#[derive(Debug, Deserialize)]
struct ApiCountry {
    country_name: String,
    #[serde(rename = "iso-3166")]
    iso_3166: String,
}

/// Source of public-holiday data. Holidays come back as the raw response
/// body so callers can cache exactly what the API returned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HolidayApi: Send + Sync {
    async fn fetch_countries(&self) -> Result<Vec<Country>, ApiError>;

    async fn fetch_holidays_raw(&self, country: &str, year: i32) -> Result<String, ApiError>;
}

pub struct CalendarificClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl CalendarificClient {
    pub fn new(api_key: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<String, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("GET {} response status: {}", endpoint, status);

        if status == 401 {
            tracing::error!("Holiday API rejected the api key");
            return Err(ApiError::AuthenticationFailed);
        }

        if status == 404 {
            return Err(ApiError::NotFound(endpoint.to_string()));
        }

        if status == 429 {
            tracing::warn!("Holiday API rate limit exceeded");
            return Err(ApiError::RateLimited);
        }

        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!("Holiday API request failed. Status: {}, Body: {}", status, body);
            return Err(ApiError::RequestError(format!("Status {}: {}", status, body)));
        }
        Ok(body)
    }
}

#[async_trait]
impl HolidayApi for CalendarificClient {
    async fn fetch_countries(&self) -> Result<Vec<Country>, ApiError> {
        tracing::info!("Fetching supported countries");
        let body = self.get("countries", &[]).await?;
        let countries = parse_countries(&body)?;
        tracing::info!("Fetched {} countries", countries.len());
        Ok(countries)
    }

    async fn fetch_holidays_raw(&self, country: &str, year: i32) -> Result<String, ApiError> {
        let country = country.trim().to_uppercase();
        tracing::info!("Fetching holidays for {} {}", country, year);

        let body = self
            .get("holidays", &[("country", country), ("year", year.to_string())])
            .await?;

        // The API reports some failures in the body with a 200 status.
        check_meta(&body)?;
        Ok(body)
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<Envelope<T>, ApiError> {
    let envelope: Envelope<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| ApiError::ParseError(e.to_string()))?;
    check_envelope(&envelope.meta)?;

    // An empty result is sent as `"response": []` rather than an object.
    let response = match envelope.response {
        Some(value) if value.is_object() => {
            Some(serde_json::from_value(value).map_err(|e| ApiError::ParseError(e.to_string()))?)
        }
        _ => None,
    };
    Ok(Envelope { meta: envelope.meta, response })
}

fn check_envelope(meta: &Meta) -> Result<(), ApiError> {
    match meta.code {
        200 => Ok(()),
        401 => Err(ApiError::AuthenticationFailed),
        429 => Err(ApiError::RateLimited),
        code => Err(ApiError::RequestError(format!(
            "API code {}: {}",
            code,
            meta.error_detail.as_deref().unwrap_or("no detail")
        ))),
    }
}

fn check_meta(body: &str) -> Result<(), ApiError> {
    decode::<serde_json::Value>(body).map(|_| ())
}

fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Converts a raw holidays response into domain holidays.
pub fn parse_holidays(body: &str) -> Result<Vec<Holiday>, ApiError> {
    let envelope = decode::<HolidayList>(body)?;
    let Some(list) = envelope.response else {
        return Ok(vec![]);
    };

    Ok(list
        .holidays
        .into_iter()
        .map(|h| {
            let country_code = h.country.map(|c| c.id.to_uppercase());
            let iso_day: String = h.date.iso.chars().take(10).collect();
            let id = match h.urlid.filter(|u| !u.trim().is_empty()) {
                Some(urlid) => urlid,
                None => format!(
                    "{}_{}_{}",
                    country_code.as_deref().unwrap_or("xx").to_lowercase(),
                    iso_day,
                    slug(&h.name)
                ),
            };
            Holiday {
                id,
                name: h.name,
                description: h.description.filter(|d| !d.trim().is_empty()),
                date: HolidayDate::on(h.date.iso),
                repeat: vec![],
                types: h.types,
                country_code,
            }
        })
        .collect())
}

pub fn parse_countries(body: &str) -> Result<Vec<Country>, ApiError> {
    let envelope = decode::<CountryList>(body)?;
    let mut countries: Vec<Country> = envelope
        .response
        .map(|r| r.countries)
        .unwrap_or_default()
        .into_iter()
        .map(|c| Country {
            name: c.country_name,
            code: c.iso_3166.to_uppercase(),
        })
        .collect();
    countries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(countries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn holidays_body() -> serde_json::Value {
        json!({
            "meta": { "code": 200 },
            "response": {
                "holidays": [
                    {
                        "name": "New Year's Day",
                        "description": "First day of the year",
                        "country": { "id": "us", "name": "United States" },
                        "date": { "iso": "2025-01-01", "datetime": { "year": 2025, "month": 1, "day": 1 } },
                        "type": ["National holiday"],
                        "urlid": "us/new-year-day"
                    },
                    {
                        "name": "Daylight Saving Time starts",
                        "description": "",
                        "country": { "id": "us", "name": "United States" },
                        "date": { "iso": "2025-03-09T02:00:00-08:00" },
                        "type": ["Clock change/Daylight Saving Time"]
                    }
                ]
            }
        })
    }

    #[test]
    fn parses_holidays_and_derives_missing_ids() {
        let holidays = parse_holidays(&holidays_body().to_string()).unwrap();

        assert_eq!(holidays.len(), 2);
        assert_eq!(holidays[0].id, "us/new-year-day");
        assert_eq!(holidays[0].country_code.as_deref(), Some("US"));
        assert_eq!(holidays[0].types, vec!["National holiday"]);
        assert_eq!(holidays[1].id, "us_2025-03-09_daylight-saving-time-starts");
        assert_eq!(holidays[1].description, None);
    }

    #[test]
    fn empty_response_array_means_no_holidays() {
        let body = json!({ "meta": { "code": 200 }, "response": [] }).to_string();

        assert!(parse_holidays(&body).unwrap().is_empty());
    }

    #[test]
    fn error_code_in_body_is_reported() {
        let body = json!({ "meta": { "code": 401, "error_type": "auth failed" }, "response": [] }).to_string();

        assert!(matches!(parse_holidays(&body), Err(ApiError::AuthenticationFailed)));
    }

    #[test]
    fn malformed_body_is_parse_error() {
        assert!(matches!(parse_holidays("<html>"), Err(ApiError::ParseError(_))));
    }

    #[test]
    fn parses_countries_sorted_by_name() {
        let body = json!({
            "meta": { "code": 200 },
            "response": { "countries": [
                { "country_name": "Germany", "iso-3166": "DE" },
                { "country_name": "Austria", "iso-3166": "at" }
            ]}
        })
        .to_string();

        let countries = parse_countries(&body).unwrap();

        assert_eq!(
            countries,
            vec![
                Country { name: "Austria".into(), code: "AT".into() },
                Country { name: "Germany".into(), code: "DE".into() },
            ]
        );
    }

    #[test]
    fn client_has_default_base_url() {
        let client = CalendarificClient::new("key".to_string());

        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }

    #[tokio::test]
    async fn fetches_raw_holidays_with_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/holidays"))
            .and(query_param("api_key", "secret"))
            .and(query_param("country", "US"))
            .and(query_param("year", "2025"))
            .respond_with(ResponseTemplate::new(200).set_body_json(holidays_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = CalendarificClient::new("secret".to_string()).with_base_url(server.uri());
        let body = client.fetch_holidays_raw("us", 2025).await.unwrap();

        assert_eq!(parse_holidays(&body).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn maps_http_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/holidays"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/countries"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = CalendarificClient::new("key".to_string()).with_base_url(server.uri());

        let limited = client.fetch_holidays_raw("DE", 2025).await.unwrap_err();
        assert!(matches!(limited, ApiError::RateLimited));
        assert!(limited.is_transient());
        assert!(matches!(client.fetch_countries().await, Err(ApiError::AuthenticationFailed)));
    }
}
