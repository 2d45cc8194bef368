//! Client side of asynchronous batch actions: submit a selection, poll the
//! returned handle until the server reports completion, and notify observers
//! along the way.

pub mod controller;
pub mod error;
pub mod policy;
pub mod selection;
pub mod transport;

pub use controller::{AsyncOperationController, OperationEvent, OperationState};
pub use error::{ControllerError, PollError, SubmissionError};
pub use policy::PollPolicy;
pub use selection::{BatchActionForm, SelectionChange, SelectionSet};
pub use transport::{HttpTransport, OperationTransport};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
