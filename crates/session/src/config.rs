use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings shared by both roles.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where the farmer stores received files.
    pub download_dir: PathBuf,
    /// Where the uploader keeps generated tags.
    pub work_dir: PathBuf,
    /// Pause between two challenge cycles of one session.
    pub challenge_interval: Duration,
    /// Pause before the first challenge cycle.
    pub initial_delay: Duration,
    /// How long the farmer waits for both files in the final handoff step.
    pub transfer_timeout: Duration,
    /// Host the farmer advertises for its channel and transport endpoints.
    pub advertise_host: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./download/"),
            work_dir: PathBuf::from("./upload/"),
            challenge_interval: Duration::from_secs(30),
            initial_delay: Duration::ZERO,
            transfer_timeout: Duration::from_secs(120),
            advertise_host: "127.0.0.1".into(),
        }
    }
}
