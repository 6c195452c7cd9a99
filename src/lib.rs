pub mod app;
pub mod calendar;
pub mod clock;
pub mod notify;
pub mod repository;
pub mod storage;
pub mod sync;

pub use app::{AppContext, Session};
pub use calendar::{Calendar, Holiday, Meeting, User};
