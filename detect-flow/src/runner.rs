//! DetectionRunner – owns the detection lifecycle `Idle → Processing → {Finished, Failed}` and
//! reconciles every transition into the [`AppStore`].
//!
//! ## Driving a job
//! * [`DetectionRunner::start`] / [`DetectionRunner::start_image`] submit the job and, once the
//!   server acknowledges it, move to `Processing(0)` and spawn a poller.
//! * The poller ticks every `poll_interval` and runs one poll cycle per tick until the job is
//!   terminal or the last runner clone is dropped. [`DetectionRunner::poll_once`] runs the same
//!   cycle on demand.
//! * On `finished` the report is fetched right away. If that fetch fails the job stays
//!   `Finished` without a report and [`DetectionRunner::retry_report`] fetches it again, so a
//!   flaky report request never re-runs the job.
//!
//! ## Generations
//! Every [`DetectionRunner::reset`] bumps a generation counter and aborts the poller. Each
//! request remembers the generation it was issued under; a response that comes back under an
//! older generation is dropped and only logged at debug level.
//!
//! ## Serialization
//! Start, poll and report requests share one async lock, so at most one of them is in flight.
//! `reset` never takes that lock and therefore never waits on the network.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    client::{DetectionClient, require_user_id},
    error::{DetectError, Result},
    store::AppStore,
    types::{DetectPhase, DetectionStatus, ImageType, JobAck, Report},
};

/// Default delay between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default number of consecutive poll failures that fail the job.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
    pub failure_threshold: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Still processing at the given progress.
    Progress(u8),
    /// The poll failed; `failures` consecutive failures so far, below the threshold.
    Retrying { failures: u32 },
    /// The job finished. `report_ready` is false when the report fetch failed.
    Finished { report_ready: bool },
    /// The job failed on the server or polling gave up.
    Failed,
    /// A reset happened while the request was in flight; the response was dropped.
    Stale,
    /// Nothing to poll: no job is processing.
    Inactive,
}

impl PollOutcome {
    pub fn keeps_polling(&self) -> bool {
        matches!(self, PollOutcome::Progress(_) | PollOutcome::Retrying { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PollOutcome::Finished { .. } | PollOutcome::Failed)
    }
}

enum StartRequest<'a> {
    Data,
    Image {
        image_type: ImageType,
        file_id: &'a str,
    },
}

enum Step {
    Done(PollOutcome),
    FetchReport,
}

#[derive(Default)]
struct Control {
    generation: u64,
    user_id: Option<String>,
    failures: u32,
    poller: Option<JoinHandle<()>>,
    last_error: Option<String>,
}

struct RunnerInner {
    client: DetectionClient,
    store: Arc<AppStore>,
    config: RunnerConfig,
    cycle: tokio::sync::Mutex<()>,
    control: Mutex<Control>,
}

impl Drop for RunnerInner {
    fn drop(&mut self) {
        let control = self
            .control
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(poller) = control.poller.take() {
            poller.abort();
        }
    }
}

/// Cheap to clone; clones drive the same job.
#[derive(Clone)]
pub struct DetectionRunner {
    inner: Arc<RunnerInner>,
}

impl DetectionRunner {
    pub fn new(client: DetectionClient, store: Arc<AppStore>, config: RunnerConfig) -> Self {
        let config = RunnerConfig {
            poll_interval: config.poll_interval.max(Duration::from_millis(1)),
            failure_threshold: config.failure_threshold.max(1),
        };

        Self {
            inner: Arc::new(RunnerInner {
                client,
                store,
                config,
                cycle: tokio::sync::Mutex::new(()),
                control: Mutex::new(Control::default()),
            }),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    pub fn status(&self) -> DetectionStatus {
        self.inner.store.detect_status()
    }

    pub fn generation(&self) -> u64 {
        self.control().generation
    }

    /// Display text of the last error absorbed by a poll or report cycle.
    pub fn last_error(&self) -> Option<String> {
        self.control().last_error.clone()
    }

    pub async fn start(&self, user_id: &str) -> Result<JobAck> {
        self.launch(user_id, StartRequest::Data).await
    }

    pub async fn start_image(
        &self,
        user_id: &str,
        image_type: ImageType,
        file_id: &str,
    ) -> Result<JobAck> {
        self.launch(
            user_id,
            StartRequest::Image {
                image_type,
                file_id,
            },
        )
        .await
    }

    async fn launch(&self, user_id: &str, request: StartRequest<'_>) -> Result<JobAck> {
        require_user_id(user_id)?;
        let _cycle = self.inner.cycle.lock().await;

        if self.inner.store.detect_status().status == DetectPhase::Processing {
            return Err(DetectError::caller("A detection is already in progress"));
        }

        let generation = self.reset();
        let result = match request {
            StartRequest::Data => self.inner.client.start(user_id).await,
            StartRequest::Image {
                image_type,
                file_id,
            } => {
                self.inner
                    .client
                    .start_image(user_id, image_type, file_id)
                    .await
            }
        };

        let ack = match result {
            Ok(ack) => ack,
            Err(err) => {
                warn!(user_id, error = %err, "Failed to start detection");
                return Err(err);
            }
        };

        let mut control = self.control();
        if control.generation != generation {
            debug!(
                user_id,
                generation,
                current = control.generation,
                "Dropping start acknowledgement issued before a reset"
            );
            return Err(DetectError::Cancelled(
                "Detection was reset before it started".to_string(),
            ));
        }

        control.user_id = Some(user_id.to_string());
        self.inner.store.set_current_report(None);
        self.inner
            .store
            .set_detect_status(DetectionStatus::processing(0));
        control.poller = Some(self.spawn_poller(generation));

        info!(user_id, generation, "Detection started");
        Ok(ack)
    }

    /// Cancel polling, invalidate in-flight requests and return to `Idle(0)`.
    ///
    /// Returns the new generation.
    pub fn reset(&self) -> u64 {
        let mut control = self.control();
        control.generation += 1;
        if let Some(poller) = control.poller.take() {
            poller.abort();
        }
        control.user_id = None;
        control.failures = 0;
        control.last_error = None;
        self.inner.store.set_detect_status(DetectionStatus::idle());

        debug!(generation = control.generation, "Detection reset");
        control.generation
    }

    /// Run one poll cycle now, outside the timer.
    pub async fn poll_once(&self) -> PollOutcome {
        let generation = self.generation();
        let outcome = self.run_cycle(generation).await;

        if outcome.is_terminal() {
            let mut control = self.control();
            if control.generation == generation {
                if let Some(poller) = control.poller.take() {
                    poller.abort();
                }
            }
        }
        outcome
    }

    /// Fetch the report again after a `Finished` job whose report could not be loaded.
    pub async fn retry_report(&self) -> Result<Report> {
        let _cycle = self.inner.cycle.lock().await;

        let (generation, user_id) = {
            let control = self.control();
            if self.inner.store.detect_status().status != DetectPhase::Finished {
                return Err(DetectError::caller(
                    "The report is only available after detection has finished",
                ));
            }
            let user_id = control
                .user_id
                .clone()
                .unwrap_or_else(|| self.inner.store.user_id());
            (control.generation, user_id)
        };

        let report = self
            .inner
            .client
            .fetch_report(&user_id)
            .await
            .inspect_err(|err| warn!(user_id = %user_id, error = %err, "Report retry failed"))?;

        let mut control = self.control();
        if control.generation != generation {
            debug!(user_id = %user_id, generation, "Dropping report retried before a reset");
            return Err(DetectError::Cancelled(
                "Detection was reset while the report was loading".to_string(),
            ));
        }

        control.last_error = None;
        self.inner.store.set_current_report(Some(report.clone()));
        info!(user_id = %user_id, "Detection report stored after retry");
        Ok(report)
    }

    /// Wait until the job leaves `Processing` and any report fetch in flight has settled.
    pub async fn settled(&self) -> DetectionStatus {
        let mut rx = self.inner.store.subscribe();
        let status = match rx
            .wait_for(|state| state.detect_status.status != DetectPhase::Processing)
            .await
        {
            Ok(state) => state.detect_status,
            Err(_) => self.status(),
        };

        if status.status == DetectPhase::Finished {
            let _cycle = self.inner.cycle.lock().await;
            return self.status();
        }
        status
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_poller(&self, generation: u64) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.config.poll_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                // The poller must not keep a dropped runner alive.
                let Some(inner) = inner.upgrade() else {
                    debug!(generation, "Runner dropped, poller stopped");
                    break;
                };
                let outcome = DetectionRunner { inner }.run_cycle(generation).await;
                if !outcome.keeps_polling() {
                    debug!(generation, ?outcome, "Poller stopped");
                    break;
                }
            }
        })
    }

    async fn run_cycle(&self, generation: u64) -> PollOutcome {
        let _cycle = self.inner.cycle.lock().await;

        let Some(user_id) = self.active_user(generation) else {
            return PollOutcome::Inactive;
        };

        let response = self.inner.client.poll(&user_id).await;
        match self.apply_poll(generation, response) {
            Step::Done(outcome) => outcome,
            Step::FetchReport => self.fetch_report(generation, &user_id).await,
        }
    }

    fn active_user(&self, generation: u64) -> Option<String> {
        let control = self.control();
        if control.generation != generation
            || self.inner.store.detect_status().status != DetectPhase::Processing
        {
            return None;
        }
        control.user_id.clone()
    }

    fn apply_poll(&self, generation: u64, response: Result<DetectionStatus>) -> Step {
        let mut control = self.control();
        if control.generation != generation {
            match &response {
                Ok(status) => debug!(
                    generation,
                    current = control.generation,
                    status = %status.status,
                    "Dropping stale poll response"
                ),
                Err(err) => debug!(
                    generation,
                    current = control.generation,
                    error = %err,
                    "Dropping stale poll failure"
                ),
            }
            return Step::Done(PollOutcome::Stale);
        }

        let store = &self.inner.store;
        match response {
            Ok(status) => {
                control.failures = 0;
                match status.status {
                    DetectPhase::Finished => {
                        store.set_detect_status(DetectionStatus::finished());
                        info!(generation, "Detection finished");
                        Step::FetchReport
                    }
                    DetectPhase::Failed => {
                        let last = store.detect_status().progress;
                        store.set_detect_status(DetectionStatus::failed(last));
                        control.last_error = Some("Detection failed".to_string());
                        warn!(generation, progress = last, "Detection failed on the server");
                        Step::Done(PollOutcome::Failed)
                    }
                    // `idle` from the server means the job is queued and not yet picked up.
                    DetectPhase::Processing | DetectPhase::Idle => {
                        store.set_detect_status(DetectionStatus::processing(status.progress));
                        Step::Done(PollOutcome::Progress(status.progress))
                    }
                }
            }
            Err(err) => {
                control.failures += 1;
                let failures = control.failures;
                control.last_error = Some(err.user_message());

                if failures >= self.inner.config.failure_threshold {
                    let last = store.detect_status().progress;
                    store.set_detect_status(DetectionStatus::failed(last));
                    warn!(
                        generation,
                        failures,
                        error = %err,
                        "Poll failure threshold reached, marking detection failed"
                    );
                    Step::Done(PollOutcome::Failed)
                } else {
                    warn!(generation, failures, error = %err, "Poll failed, retrying on next tick");
                    Step::Done(PollOutcome::Retrying { failures })
                }
            }
        }
    }

    async fn fetch_report(&self, generation: u64, user_id: &str) -> PollOutcome {
        let result = self.inner.client.fetch_report(user_id).await;

        let mut control = self.control();
        if control.generation != generation {
            debug!(user_id, generation, "Dropping stale report response");
            return PollOutcome::Stale;
        }

        match result {
            Ok(report) => {
                self.inner.store.set_current_report(Some(report));
                info!(user_id, "Detection report stored");
                PollOutcome::Finished { report_ready: true }
            }
            Err(err) => {
                warn!(user_id, error = %err, "Report fetch failed; detection stays finished");
                control.last_error = Some(err.user_message());
                PollOutcome::Finished {
                    report_ready: false,
                }
            }
        }
    }
}
