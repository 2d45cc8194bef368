//! Submit, poll and complete one long-running batch operation.
//!
//! The controller owns at most one in-flight [`OperationHandle`]. A
//! successful submission spawns a poll task that sleeps for the policy
//! interval, queries the transport, applies the result and only then
//! schedules the next poll, so polls never overlap.
//!
//! Every operation is tagged with a generation number. `cancel()` bumps it
//! while holding the state lock, and poll results are applied under that same
//! lock after re-checking the generation. A response that arrives for a
//! cancelled or superseded operation is dropped without touching state or
//! notifying observers.

use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Instant,
};

use shared::domain::{OperationHandle, OperationRequest, ProgressReport};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    error::{ControllerError, PollError},
    policy::PollPolicy,
    transport::OperationTransport,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Submitting,
    Polling,
    Complete,
    Cancelled,
}

impl OperationState {
    /// Whether an operation is in flight and can be cancelled.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Submitting | Self::Polling)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationEvent {
    Submitted(OperationHandle),
    Progress(ProgressReport),
    Completed(ProgressReport),
    Failed(ControllerError),
    Cancelled,
}

type ReportObserver = Box<dyn Fn(&ProgressReport) + Send + Sync>;
type ErrorObserver = Box<dyn Fn(&ControllerError) + Send + Sync>;

#[derive(Default)]
struct Observers {
    progress: Vec<ReportObserver>,
    complete: Vec<ReportObserver>,
    error: Vec<ErrorObserver>,
}

#[derive(Default)]
struct ControllerInner {
    handle: Option<OperationHandle>,
    latest: Option<ProgressReport>,
    poll_task: Option<JoinHandle<()>>,
}

pub struct AsyncOperationController {
    transport: Arc<dyn OperationTransport>,
    policy: PollPolicy,
    generation: AtomicU64,
    // Transitions happen only while `inner` is locked, except the reset of an
    // abandoned submission in `abandon_submission`.
    state: watch::Sender<OperationState>,
    inner: Mutex<ControllerInner>,
    observers: Mutex<Observers>,
    events: broadcast::Sender<OperationEvent>,
}

impl AsyncOperationController {
    pub fn new(transport: Arc<dyn OperationTransport>, policy: PollPolicy) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(OperationState::Idle);
        Arc::new(Self {
            transport,
            policy,
            generation: AtomicU64::new(0),
            state,
            inner: Mutex::new(ControllerInner::default()),
            observers: Mutex::new(Observers::default()),
            events,
        })
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<OperationState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    pub async fn handle(&self) -> Option<OperationHandle> {
        self.inner.lock().await.handle.clone()
    }

    /// Most recent successful poll of the current or last operation.
    pub async fn latest_report(&self) -> Option<ProgressReport> {
        self.inner.lock().await.latest
    }

    /// Registers an observer for every successful poll.
    ///
    /// Observers run synchronously on the poll task and must not block.
    pub async fn on_progress<F>(&self, observer: F)
    where
        F: Fn(&ProgressReport) + Send + Sync + 'static,
    {
        self.observers.lock().await.progress.push(Box::new(observer));
    }

    /// Registers an observer for the terminal report. While it runs the
    /// controller reports [`OperationState::Complete`]; it resets to `Idle`
    /// once all completion observers have returned.
    pub async fn on_complete<F>(&self, observer: F)
    where
        F: Fn(&ProgressReport) + Send + Sync + 'static,
    {
        self.observers.lock().await.complete.push(Box::new(observer));
    }

    /// Registers an observer for failures that happen after submission was
    /// accepted. Submission failures are returned from [`Self::submit`].
    pub async fn on_error<F>(&self, observer: F)
    where
        F: Fn(&ControllerError) + Send + Sync + 'static,
    {
        self.observers.lock().await.error.push(Box::new(observer));
    }

    /// Submits `request` and starts polling the returned handle.
    ///
    /// Dropping this future before the server answers abandons the
    /// submission: the controller returns to `Idle` and a late handle is
    /// never polled.
    pub async fn submit(
        self: &Arc<Self>,
        request: OperationRequest,
    ) -> Result<OperationHandle, ControllerError> {
        let generation = {
            let mut inner = self.inner.lock().await;
            let state = self.state();
            if state != OperationState::Idle {
                return Err(ControllerError::InvalidState { state });
            }
            if request.is_empty() {
                return Err(ControllerError::EmptyRequest);
            }
            inner.latest = None;
            self.transition(OperationState::Submitting);
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        info!(
            generation,
            items = request.item_ids.len(),
            "submitting batch operation"
        );

        let pending = PendingSubmission {
            controller: self,
            generation,
            armed: true,
        };
        let result = self.transport.submit(&request).await;

        let mut inner = self.inner.lock().await;
        pending.disarm();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "discarding submission result of cancelled operation");
            return Err(ControllerError::Cancelled);
        }

        match result {
            Ok(handle) => {
                inner.handle = Some(handle.clone());
                inner.poll_task = Some(self.spawn_poll_task(generation, handle.clone()));
                self.transition(OperationState::Polling);
                let _ = self.events.send(OperationEvent::Submitted(handle.clone()));
                drop(inner);

                info!(handle = %handle, "batch operation accepted; polling");
                Ok(handle)
            }
            Err(err) => {
                self.transition(OperationState::Idle);
                drop(inner);

                warn!(error = %err, "batch submission failed");
                let err = ControllerError::from(err);
                let _ = self.events.send(OperationEvent::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// Stops the current operation. No observer fires for it once this
    /// returns. Calling it with nothing in flight is a no-op.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        let state = self.state();
        if !state.is_active() {
            debug!(?state, "cancel ignored; no operation in flight");
            return;
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = inner.poll_task.take() {
            task.abort();
        }
        let handle = inner.handle.take();
        self.transition(OperationState::Cancelled);
        info!(
            handle = handle.as_ref().map(OperationHandle::as_str),
            "batch operation cancelled"
        );
        let _ = self.events.send(OperationEvent::Cancelled);
        self.transition(OperationState::Idle);
    }

    /// Resets to `Idle` after a `submit` future was dropped mid-request,
    /// unless `cancel()` already claimed the operation.
    fn abandon_submission(&self, generation: u64) {
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let reset = self.state.send_if_modified(|state| {
            if *state != OperationState::Submitting {
                return false;
            }
            *state = OperationState::Idle;
            true
        });
        if reset {
            warn!(generation, "submission abandoned before the server answered");
            let _ = self.events.send(OperationEvent::Cancelled);
        }
    }

    fn transition(&self, next: OperationState) {
        let previous = self.state.send_replace(next);
        debug!(?previous, ?next, "operation state changed");
    }

    fn spawn_poll_task(self: &Arc<Self>, generation: u64, handle: OperationHandle) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.policy.interval;
        tokio::spawn(async move {
            let started = Instant::now();
            loop {
                sleep(interval).await;
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                let outcome = controller.poll_with_retry(&handle, started).await;
                if controller
                    .apply_poll_outcome(generation, outcome)
                    .await
                    .is_break()
                {
                    return;
                }
            }
        })
    }

    async fn poll_with_retry(
        &self,
        handle: &OperationHandle,
        started: Instant,
    ) -> Result<ProgressReport, PollError> {
        let attempts = self.policy.attempts_per_poll();
        let mut attempt = 1;
        loop {
            let result = match self.policy.timeout {
                Some(limit) => {
                    let remaining = limit.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        return Err(PollError::TimedOut {
                            elapsed: started.elapsed(),
                        });
                    }
                    // A poll that never answers must not outlive the deadline.
                    match timeout(remaining, self.transport.poll(handle)).await {
                        Ok(result) => result,
                        Err(_) => {
                            return Err(PollError::TimedOut {
                                elapsed: started.elapsed(),
                            })
                        }
                    }
                }
                None => self.transport.poll(handle).await,
            };

            match result {
                Ok(report) => return Ok(report),
                Err(err) if attempt < attempts => {
                    warn!(handle = %handle, attempt, error = %err, "poll failed; retrying");
                    attempt += 1;
                    sleep(self.policy.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn apply_poll_outcome(
        &self,
        generation: u64,
        outcome: Result<ProgressReport, PollError>,
    ) -> ControlFlow<()> {
        let observers = self.observers.lock().await;
        let mut inner = self.inner.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "discarding poll result of superseded operation");
            return ControlFlow::Break(());
        }

        let report = match outcome {
            Ok(report) => report,
            Err(err) => {
                inner.handle = None;
                inner.poll_task = None;
                self.transition(OperationState::Idle);
                warn!(error = %err, "polling failed; operation abandoned");

                let err = ControllerError::Poll(err);
                for observer in &observers.error {
                    observer(&err);
                }
                let _ = self.events.send(OperationEvent::Failed(err));
                return ControlFlow::Break(());
            }
        };

        inner.latest = Some(report);
        debug!(progress = report.progress, done = report.done, "poll succeeded");
        for observer in &observers.progress {
            observer(&report);
        }
        let _ = self.events.send(OperationEvent::Progress(report));
        if !report.done {
            return ControlFlow::Continue(());
        }

        let handle = inner.handle.take();
        inner.poll_task = None;
        self.transition(OperationState::Complete);
        info!(
            handle = handle.as_ref().map(OperationHandle::as_str),
            "batch operation complete"
        );
        for observer in &observers.complete {
            observer(&report);
        }
        self.transition(OperationState::Idle);
        let _ = self.events.send(OperationEvent::Completed(report));
        ControlFlow::Break(())
    }
}

/// Armed while `submit` awaits the transport.
struct PendingSubmission<'a> {
    controller: &'a AsyncOperationController,
    generation: u64,
    armed: bool,
}

impl PendingSubmission<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSubmission<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.abandon_submission(self.generation);
        }
    }
}

impl Drop for AsyncOperationController {
    fn drop(&mut self) {
        if let Some(task) = self.inner.get_mut().poll_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
