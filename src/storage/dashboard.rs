use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::storage::preferences::{Preferences, PrefsError};

pub const MAX_SLOTS: usize = 8;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Slot index {0} is out of range")]
    SlotOutOfRange(usize),
    #[error("Preferences error: {0}")]
    PrefsError(#[from] PrefsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    /// Public holidays of a country; the slot id is the country code.
    PublicHolidays,
    CustomCalendar,
}

impl SlotType {
    fn as_str(&self) -> &'static str {
        match self {
            SlotType::PublicHolidays => "public",
            SlotType::CustomCalendar => "custom",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(SlotType::PublicHolidays),
            "custom" => Some(SlotType::CustomCalendar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSlot {
    pub slot_type: SlotType,
    pub id: String,
    pub name: String,
}

impl DashboardSlot {
    pub fn new(slot_type: SlotType, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slot_type,
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Home-screen calendar bindings, kept per user as three flat keys per slot.
#[derive(Debug, Clone)]
pub struct DashboardSlots {
    prefs: Arc<Preferences>,
}

impl DashboardSlots {
    pub fn new(prefs: Arc<Preferences>) -> Self {
        Self { prefs }
    }

    fn keys(user_id: &str, index: usize) -> [String; 3] {
        [
            format!("{}_slot_{}_type", user_id, index),
            format!("{}_slot_{}_id", user_id, index),
            format!("{}_slot_{}_name", user_id, index),
        ]
    }

    fn check(index: usize) -> Result<(), DashboardError> {
        if index >= MAX_SLOTS {
            return Err(DashboardError::SlotOutOfRange(index));
        }
        Ok(())
    }

    pub fn set_slot(&self, user_id: &str, index: usize, slot: &DashboardSlot) -> Result<(), DashboardError> {
        Self::check(index)?;
        let [type_key, id_key, name_key] = Self::keys(user_id, index);
        self.prefs.edit(vec![
            (type_key, Some(Value::from(slot.slot_type.as_str()))),
            (id_key, Some(Value::from(slot.id.as_str()))),
            (name_key, Some(Value::from(slot.name.as_str()))),
        ])?;
        Ok(())
    }

    pub fn get_slot(&self, user_id: &str, index: usize) -> Result<Option<DashboardSlot>, DashboardError> {
        Self::check(index)?;
        let [type_key, id_key, name_key] = Self::keys(user_id, index);

        let slot = self
            .prefs
            .get_string(&type_key)
            .and_then(|t| SlotType::parse(&t))
            .zip(self.prefs.get_string(&id_key))
            .map(|(slot_type, id)| DashboardSlot {
                slot_type,
                id,
                name: self.prefs.get_string(&name_key).unwrap_or_default(),
            });
        Ok(slot)
    }

    pub fn all_slots(&self, user_id: &str) -> Result<Vec<Option<DashboardSlot>>, DashboardError> {
        (0..MAX_SLOTS).map(|i| self.get_slot(user_id, i)).collect()
    }

    pub fn remove_slot(&self, user_id: &str, index: usize) -> Result<(), DashboardError> {
        Self::check(index)?;
        let writes = Self::keys(user_id, index).into_iter().map(|k| (k, None)).collect();
        self.prefs.edit(writes)?;
        Ok(())
    }

    pub fn public_countries(&self, user_id: &str) -> Result<Vec<String>, DashboardError> {
        let mut countries: Vec<String> = self
            .all_slots(user_id)?
            .into_iter()
            .flatten()
            .filter(|s| s.slot_type == SlotType::PublicHolidays)
            .map(|s| s.id.trim().to_uppercase())
            .collect();
        countries.sort();
        countries.dedup();
        Ok(countries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<Preferences>, DashboardSlots) {
        let prefs = Arc::new(Preferences::in_memory());
        (prefs.clone(), DashboardSlots::new(prefs))
    }

    fn slot(i: usize) -> DashboardSlot {
        if i % 2 == 0 {
            DashboardSlot::new(SlotType::PublicHolidays, format!("C{}", i), format!("Country {}", i))
        } else {
            DashboardSlot::new(SlotType::CustomCalendar, format!("cal{}", i), format!("Calendar {}", i))
        }
    }

    #[test]
    fn writing_all_slots_reads_back_the_same_triples() {
        let (_, slots) = setup();
        for i in 0..MAX_SLOTS {
            slots.set_slot("u1", i, &slot(i)).unwrap();
        }

        let read: Vec<Option<DashboardSlot>> = slots.all_slots("u1").unwrap();

        let expected: Vec<Option<DashboardSlot>> = (0..MAX_SLOTS).map(|i| Some(slot(i))).collect();
        assert_eq!(read, expected);
    }

    #[test]
    fn removing_a_slot_clears_exactly_its_three_keys() {
        let (prefs, slots) = setup();
        for i in 0..MAX_SLOTS {
            slots.set_slot("u1", i, &slot(i)).unwrap();
        }

        slots.remove_slot("u1", 3).unwrap();

        assert_eq!(slots.get_slot("u1", 3).unwrap(), None);
        assert!(!prefs.contains("u1_slot_3_type"));
        assert!(!prefs.contains("u1_slot_3_id"));
        assert!(!prefs.contains("u1_slot_3_name"));
        assert_eq!(prefs.keys_with_prefix("u1_slot_").len(), (MAX_SLOTS - 1) * 3);
        assert_eq!(slots.get_slot("u1", 4).unwrap(), Some(slot(4)));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let (_, slots) = setup();

        let result = slots.set_slot("u1", MAX_SLOTS, &slot(0));

        assert!(matches!(result, Err(DashboardError::SlotOutOfRange(8))));
    }

    #[test]
    fn slots_are_per_user() {
        let (_, slots) = setup();
        slots.set_slot("u1", 0, &slot(0)).unwrap();

        assert_eq!(slots.get_slot("u2", 0).unwrap(), None);
    }

    #[test]
    fn public_countries_lists_unique_public_slots() {
        let (_, slots) = setup();
        slots.set_slot("u1", 0, &DashboardSlot::new(SlotType::PublicHolidays, "us", "USA")).unwrap();
        slots.set_slot("u1", 1, &DashboardSlot::new(SlotType::PublicHolidays, "US", "USA again")).unwrap();
        slots.set_slot("u1", 2, &DashboardSlot::new(SlotType::CustomCalendar, "cal", "Mine")).unwrap();
        slots.set_slot("u1", 5, &DashboardSlot::new(SlotType::PublicHolidays, "BR", "Brazil")).unwrap();

        assert_eq!(slots.public_countries("u1").unwrap(), vec!["BR", "US"]);
    }
}
