use std::time::Duration;

pub const DEFAULT_FILE_NAME: &str = "vocabulary-data.json";
pub const FILE_FORMAT_VERSION: &str = "1.0";
pub const DEFAULT_AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_FORECAST_DAYS: u32 = 7;

/// Settings shared by the sync targets of one signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Opaque identity provided by the embedding application.
    pub user_id: String,
    pub file_name: String,
    pub auto_sync_interval: Duration,
    pub forecast_days: u32,
}

impl SyncConfig {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            file_name: DEFAULT_FILE_NAME.to_owned(),
            auto_sync_interval: DEFAULT_AUTO_SYNC_INTERVAL,
            forecast_days: DEFAULT_FORECAST_DAYS,
        }
    }

    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    #[must_use]
    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = interval;
        self
    }

    #[must_use]
    pub fn root(&self) -> String {
        format!("users/{}", self.user_id)
    }

    #[must_use]
    pub fn progress_path(&self) -> String {
        format!("{}/progress", self.root())
    }

    #[must_use]
    pub fn reset_path(&self) -> String {
        format!("{}/lastProgressReset", self.root())
    }

    #[must_use]
    pub fn lessons_path(&self) -> String {
        format!("{}/lections", self.root())
    }

    #[must_use]
    pub fn lesson_path(&self, id: &str) -> String {
        format!("{}/lections/{id}", self.root())
    }

    #[must_use]
    pub fn lesson_order_path(&self) -> String {
        format!("{}/lectionOrder", self.root())
    }
}
