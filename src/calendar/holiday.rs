use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::dates::parse_iso_to_local_date;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolidayDate {
    pub iso: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl HolidayDate {
    pub fn on(iso: impl Into<String>) -> Self {
        Self {
            iso: iso.into(),
            ..Self::default()
        }
    }
}

/// A public holiday or a user-created event inside a custom calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holiday {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: HolidayDate,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repeat: Vec<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

impl Holiday {
    pub fn new(id: impl Into<String>, name: impl Into<String>, iso: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            date: HolidayDate::on(iso),
            repeat: vec![],
            types: vec![],
            country_code: None,
        }
    }

    pub fn local_date(&self) -> Option<NaiveDate> {
        parse_iso_to_local_date(&self.date.iso)
    }

    pub fn falls_on(&self, date: NaiveDate) -> bool {
        self.local_date() == Some(date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Public,
    Custom,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Public => "public",
            SourceType::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(SourceType::Public),
            "custom" => Some(SourceType::Custom),
            _ => None,
        }
    }
}

/// A holiday row as persisted in the local cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedHoliday {
    pub local_id: String,
    pub holiday: Holiday,
    pub source_id: String,
    pub source_type: SourceType,
    pub year: Option<i32>,
    pub cached_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub name: String,
    pub code: String,
}
