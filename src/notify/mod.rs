pub mod worker;

pub use worker::{ReminderWorker, WorkerSettings};

use chrono::NaiveDate;

pub const HOME_DEEP_LINK: &str = "chronosync://home";

/// A "happening tomorrow" notice for one holiday or event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub title: String,
    pub body: String,
    pub date: NaiveDate,
    /// Country code for public holidays, calendar title for custom events.
    pub source: String,
    pub deep_link: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, reminder: &Reminder);
}

/// Writes reminders to the log. Used when no platform channel is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, reminder: &Reminder) {
        tracing::info!(
            date = %reminder.date,
            source = %reminder.source,
            link = %reminder.deep_link,
            "{}: {}",
            reminder.title,
            reminder.body
        );
    }
}
