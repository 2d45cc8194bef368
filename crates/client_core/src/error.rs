use std::time::Duration;

use thiserror::Error;

use crate::controller::OperationState;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("failed to reach batch endpoint: {0}")]
    Transport(String),
    #[error("batch submission rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected submission response: {0}")]
    MalformedResponse(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("failed to reach poll endpoint: {0}")]
    Transport(String),
    #[error("poll returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected poll response: {0}")]
    MalformedResponse(String),
    #[error("operation still running after {elapsed:?}")]
    TimedOut { elapsed: Duration },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error("cannot submit while controller is {state:?}")]
    InvalidState { state: OperationState },
    #[error("operation request has no selected items")]
    EmptyRequest,
    #[error("operation was cancelled before submission completed")]
    Cancelled,
}
