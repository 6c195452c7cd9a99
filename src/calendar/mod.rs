pub mod calendar_type;
pub mod dates;
pub mod holiday;
pub mod meeting;
pub mod user;

pub use calendar_type::{Calendar, InviteStatus, SharedUserInfo};
pub use dates::{format_iso_date, parse_iso_to_local_date};
pub use holiday::{CachedHoliday, Country, Holiday, HolidayDate, SourceType};
pub use meeting::{Meeting, ParticipantInfo, MEETING_TYPE};
pub use user::{normalize_email, User};
