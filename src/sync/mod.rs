pub mod calendar_remote;
pub mod document_store;
pub mod error;
pub mod holiday_api;
pub mod holiday_remote;
pub mod meeting_remote;
pub mod rest_store;
pub mod user_remote;

pub use calendar_remote::{CalendarRemote, MEETING_CALENDAR_TITLE};
pub use document_store::{DocumentStore, MemoryDocumentStore, StoreError, WriteBatch};
pub use error::RemoteError;
pub use holiday_api::{ApiError, CalendarificClient, HolidayApi, parse_countries, parse_holidays};
pub use holiday_remote::HolidayRemote;
pub use meeting_remote::{MeetingRemote, NewMeeting};
pub use rest_store::RestDocumentStore;
pub use user_remote::{ProfileUpdate, UserRemote};
