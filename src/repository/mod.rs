pub mod calendars;
pub mod holidays;
pub mod offline;

pub use calendars::CustomCalendarRepository;
pub use holidays::HolidayRepository;
pub use offline::OfflineManager;

use thiserror::Error;

use crate::storage::cache::CacheError;
use crate::storage::dashboard::DashboardError;
use crate::storage::preferences::PrefsError;
use crate::sync::error::RemoteError;
use crate::sync::holiday_api::ApiError;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Local cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("Holiday API error: {0}")]
    Api(#[from] ApiError),
    #[error("Preferences error: {0}")]
    Prefs(#[from] PrefsError),
    #[error("Dashboard error: {0}")]
    Dashboard(#[from] DashboardError),
}

impl RepositoryError {
    /// True when the same call may succeed later, i.e. the failure came
    /// from the network rather than from the request itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Remote(e) => e.is_transient(),
            RepositoryError::Api(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::document_store::StoreError;

    #[test]
    fn network_failures_are_retryable() {
        let unavailable = RepositoryError::from(RemoteError::from(StoreError::Unavailable("down".into())));

        assert!(unavailable.is_retryable());
        assert!(RepositoryError::from(ApiError::RateLimited).is_retryable());
    }

    #[test]
    fn precondition_failures_are_not_retryable() {
        assert!(!RepositoryError::from(RemoteError::PermissionDenied("no".into())).is_retryable());
        assert!(!RepositoryError::from(ApiError::AuthenticationFailed).is_retryable());
        assert!(!RepositoryError::from(ApiError::ParseError("bad".into())).is_retryable());
    }
}
