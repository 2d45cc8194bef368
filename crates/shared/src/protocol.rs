use serde::{Deserialize, Serialize};

use crate::domain::ProgressReport;

/// Body of a successful batch submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitResponse {
    pub poll_url: String,
}

/// Body of a progress poll. Servers report progress as a JSON number that may
/// be fractional.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PollResponse {
    pub progress: f64,
    pub done: bool,
}

impl From<PollResponse> for ProgressReport {
    fn from(value: PollResponse) -> Self {
        let progress = if value.progress.is_finite() {
            value
                .progress
                .round()
                .clamp(0.0, f64::from(ProgressReport::MAX_PROGRESS)) as u8
        } else {
            0
        };
        ProgressReport::new(progress, value.done)
    }
}
