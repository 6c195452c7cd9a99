use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::calendar::Holiday;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedUserInfo {
    pub status: InviteStatus,
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_share: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invited_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<i64>,
}

impl SharedUserInfo {
    pub fn owner(now_millis: i64) -> Self {
        Self {
            status: InviteStatus::Accepted,
            can_edit: true,
            can_share: true,
            invited_at: Some(now_millis),
            accepted_at: Some(now_millis),
        }
    }

    pub fn invited(can_edit: bool, can_share: bool, now_millis: i64) -> Self {
        Self {
            status: InviteStatus::Pending,
            can_edit,
            can_share,
            invited_at: Some(now_millis),
            accepted_at: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == InviteStatus::Accepted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calendar {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner_id: String,
    #[serde(default)]
    pub shared_with: BTreeMap<String, SharedUserInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub holidays: BTreeMap<String, Holiday>,
}

impl Calendar {
    pub fn new(id: impl Into<String>, title: impl Into<String>, owner_id: impl Into<String>, now_millis: i64) -> Self {
        let owner_id = owner_id.into();
        let mut shared_with = BTreeMap::new();
        shared_with.insert(owner_id.clone(), SharedUserInfo::owner(now_millis));
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            owner_id,
            shared_with,
            holidays: BTreeMap::new(),
        }
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    pub fn member(&self, user_id: &str) -> Option<&SharedUserInfo> {
        self.shared_with.get(user_id)
    }

    pub fn can_edit(&self, user_id: &str) -> bool {
        self.is_owner(user_id)
            || self.member(user_id).is_some_and(|m| m.is_accepted() && m.can_edit)
    }

    pub fn can_share(&self, user_id: &str) -> bool {
        self.is_owner(user_id)
            || self.member(user_id).is_some_and(|m| m.is_accepted() && m.can_share)
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = &str> {
        self.shared_with.keys().map(String::as_str)
    }

    pub fn holidays_sorted(&self) -> Vec<&Holiday> {
        let mut holidays: Vec<&Holiday> = self.holidays.values().collect();
        holidays.sort_by(|a, b| a.date.iso.cmp(&b.date.iso).then_with(|| a.name.cmp(&b.name)));
        holidays
    }
}
