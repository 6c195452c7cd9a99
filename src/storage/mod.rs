pub mod cache;
pub mod config;
pub mod dashboard;
pub mod holiday_cache;
pub mod preferences;
pub mod settings;

pub use cache::{CacheError, LocalCache, StoredUser};
pub use config::Config;
pub use dashboard::{DashboardSlot, DashboardSlots, SlotType, MAX_SLOTS};
pub use holiday_cache::HolidayCache;
pub use preferences::{Preferences, PrefsError};
pub use settings::AppSettings;
