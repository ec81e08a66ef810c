//! The solving engine seam.
//!
//! A [`SolverBackend`] is the black box doing the actual extraction and plate
//! solving. It runs blocking on a worker thread owned by a [`SolverEngine`],
//! which is one engine *instance*: configured once, started once, and observed
//! through a log subscription and a one-shot completion subscription.
//!
//! Cancellation is cooperative. [`SolverEngine::abort`] only raises a flag that
//! the backend polls through [`RunContext::is_aborted`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::buffer::PlanarBuffer;
use crate::config::{EngineConfig, ProcessKind};
use crate::error::{Error, Result};
use crate::params::{SolveParameters, standard_profiles};
use crate::solution::Solution;

/// Log target of text emitted by backends.
pub const ENGINE_LOG_TARGET: &str = "platectl::engine";

/// How a backend run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// A solution was found.
    Solved(Solution),
    /// The run finished without a usable solution.
    NoSolution,
    /// The run failed.
    Failed(String),
    /// The run stopped because it was asked to.
    Aborted,
}

/// The extraction and solving algorithm behind an engine.
///
/// Backends read the image through [`PlanarBuffer::planes`] or [`PlanarBuffer::plane`].
///
/// Example:
/// ```rust
/// # use platectl::engine::{RunContext, RunOutcome, SolveRequest, SolverBackend};
/// struct Exposure;
///
/// impl SolverBackend for Exposure {
///     fn run(&self, request: &SolveRequest, ctx: &RunContext) -> RunOutcome {
///         let Some(planes) = request.buffer.planes() else {
///             return RunOutcome::Failed("expected 8 bit planes".to_owned());
///         };
///         let (channels, rows, cols) = planes.dim();
///         let mean = planes.iter().map(|&v| f64::from(v)).sum::<f64>() / planes.len() as f64;
///         ctx.log(&format!("{channels} planes of {cols}x{rows}, mean level {mean:.1}"));
///         if ctx.is_aborted() {
///             return RunOutcome::Aborted;
///         }
///         RunOutcome::NoSolution
///     }
/// }
/// ```
pub trait SolverBackend: Send + Sync + 'static {
    /// Built-in parameter profiles, in catalog order.
    fn builtin_profiles(&self) -> Vec<SolveParameters> {
        standard_profiles()
    }

    /// Process `request` to completion. Called on the engine's worker thread.
    ///
    /// Implementations should poll [`RunContext::is_aborted`] and return
    /// [`RunOutcome::Aborted`] soon after it turns true.
    fn run(&self, request: &SolveRequest, ctx: &RunContext) -> RunOutcome;
}

/// Input of a single run.
#[derive(Clone, Debug)]
pub struct SolveRequest {
    /// Planar image, shared read-only with the controller.
    pub buffer: Arc<PlanarBuffer>,
    /// Typed configuration of the run.
    pub config: EngineConfig,
}

/// Handle given to a running backend.
pub struct RunContext {
    shared: Arc<Shared>,
}

impl RunContext {
    /// Whether an abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.shared.abort.load(Ordering::Acquire)
    }

    /// Emit a line of log output.
    pub fn log(&self, text: &str) {
        info!(target: ENGINE_LOG_TARGET, "{text}");
        let sink = self.shared.log_sink.lock().clone();
        if let Some(sink) = sink {
            sink(text);
        }
    }
}

/// Lifecycle of one engine instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineStatus {
    /// Created, not configured.
    #[default]
    Idle,
    /// Configured, not started.
    Configured,
    /// Worker running.
    Running,
    /// Finished with a solution.
    Solved,
    /// Finished without a solution.
    Unsolved,
    /// Finished after an abort request.
    Aborted,
    /// Finished with an error.
    Failed,
}

impl EngineStatus {
    /// Whether the run has ended.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineStatus::Solved
                | EngineStatus::Unsolved
                | EngineStatus::Aborted
                | EngineStatus::Failed
        )
    }
}

/// What an engine reports to its completion subscriber.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    /// Terminal status.
    pub status: EngineStatus,
    /// The solution, if the run produced one.
    pub solution: Option<Solution>,
    /// Failure message, if the run failed.
    pub failure: Option<String>,
}

impl RunReport {
    /// Whether the engine reported a failure.
    pub fn failed(&self) -> bool {
        self.status == EngineStatus::Failed
    }

    /// Whether the engine finished solving.
    pub fn solving_done(&self) -> bool {
        self.status == EngineStatus::Solved
    }
}

/// Receives engine log lines.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;
/// Receives the completion report, once.
pub type ReadySink = Box<dyn FnOnce(&RunReport) + Send>;

#[derive(Default)]
struct State {
    status: EngineStatus,
    started: bool,
    finished: bool,
    solution: Option<Solution>,
    failure: Option<String>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    finished: Condvar,
    abort: AtomicBool,
    log_sink: Mutex<Option<LogSink>>,
    ready_sink: Mutex<Option<ReadySink>>,
}

/// A single engine instance bound to one planar buffer.
///
/// Dropping an instance unsubscribes everything. If its worker is still running,
/// the run is asked to abort and the worker is left to release its resources
/// once it returns.
pub struct SolverEngine {
    backend: Arc<dyn SolverBackend>,
    buffer: Arc<PlanarBuffer>,
    config: Option<EngineConfig>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for SolverEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverEngine")
            .field("status", &self.status())
            .field("process", &self.process_kind())
            .finish_non_exhaustive()
    }
}

impl SolverEngine {
    /// Create an idle instance.
    pub fn new(backend: Arc<dyn SolverBackend>, buffer: Arc<PlanarBuffer>) -> Self {
        Self {
            backend,
            buffer,
            config: None,
            shared: Arc::default(),
            worker: None,
        }
    }

    /// Install the configuration of the run. Not allowed once started.
    pub fn configure(&mut self, config: EngineConfig) -> Result<()> {
        if self.shared.state.lock().started {
            return Err(Error::InvalidState("engine already started"));
        }
        config.parameters.validate()?;
        self.config = Some(config);
        self.shared.state.lock().status = EngineStatus::Configured;
        Ok(())
    }

    /// The installed configuration.
    pub fn config(&self) -> Option<&EngineConfig> {
        self.config.as_ref()
    }

    /// Process kind of the installed configuration.
    pub fn process_kind(&self) -> Option<ProcessKind> {
        self.config.as_ref().map(|c| c.process)
    }

    /// Subscribe to log output, replacing any previous subscriber.
    pub fn subscribe_log(&self, sink: LogSink) {
        *self.shared.log_sink.lock() = Some(sink);
    }

    /// Subscribe to the completion report, replacing any previous subscriber.
    pub fn subscribe_ready(&self, sink: ReadySink) {
        *self.shared.ready_sink.lock() = Some(sink);
    }

    /// Drop all subscribers. Nothing is delivered to them afterwards.
    pub fn unsubscribe_all(&self) {
        self.shared.log_sink.lock().take();
        self.shared.ready_sink.lock().take();
    }

    /// Launch the configured run on a worker thread and return immediately.
    pub fn start(&mut self) -> Result<()> {
        let Some(config) = self.config.clone() else {
            return Err(Error::InvalidState("engine not configured"));
        };
        {
            let mut state = self.shared.state.lock();
            if state.started {
                return Err(Error::InvalidState("engine already started"));
            }
            state.started = true;
            state.status = EngineStatus::Running;
        }

        let request = SolveRequest {
            buffer: self.buffer.clone(),
            config,
        };
        let backend = self.backend.clone();
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("platectl-engine".into())
            .spawn(move || {
                let ctx = RunContext { shared };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.run(&request, &ctx)))
                    .unwrap_or_else(|_| RunOutcome::Failed("engine panicked".to_owned()));
                finish(&ctx.shared, outcome);
            });

        match spawned {
            Ok(worker) => self.worker = Some(worker),
            Err(err) => {
                error!("Failed to spawn engine worker: {err}");
                finish(&self.shared, RunOutcome::Failed(err.to_string()));
            }
        }
        Ok(())
    }

    /// Request cooperative cancellation. Never blocks.
    pub fn abort(&self) {
        if !self.shared.abort.swap(true, Ordering::AcqRel) {
            debug!("Abort requested.");
        }
    }

    /// Whether the worker has been started and has not finished.
    pub fn is_running(&self) -> bool {
        let state = self.shared.state.lock();
        state.started && !state.finished
    }

    /// Current status.
    pub fn status(&self) -> EngineStatus {
        self.shared.state.lock().status
    }

    /// Whether the run failed.
    pub fn failed(&self) -> bool {
        self.status() == EngineStatus::Failed
    }

    /// Whether the run produced a solution.
    pub fn solving_done(&self) -> bool {
        self.status() == EngineStatus::Solved
    }

    /// The solution of a solved run.
    pub fn solution(&self) -> Option<Solution> {
        self.shared.state.lock().solution
    }

    /// Block until the run has finished or `timeout` elapses.
    ///
    /// Returns whether the engine is no longer running. Returns immediately for
    /// an engine that was never started.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.started && !state.finished {
            if self.shared.finished.wait_until(&mut state, deadline).timed_out() {
                return !(state.started && !state.finished);
            }
        }
        true
    }
}

impl Drop for SolverEngine {
    fn drop(&mut self) {
        self.unsubscribe_all();
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.is_finished() {
            if worker.join().is_err() {
                warn!("Engine worker terminated abnormally.");
            }
        } else {
            debug!("Engine still running, deferring teardown until it finishes.");
            self.abort();
        }
    }
}

/// Record the terminal state, notify the completion subscriber, then wake waiters.
fn finish(shared: &Shared, outcome: RunOutcome) {
    let aborted = shared.abort.load(Ordering::Acquire);
    let (status, solution, failure) = match outcome {
        RunOutcome::Solved(solution) => (EngineStatus::Solved, Some(solution), None),
        RunOutcome::NoSolution if aborted => (EngineStatus::Aborted, None, None),
        RunOutcome::NoSolution => (EngineStatus::Unsolved, None, None),
        RunOutcome::Aborted => (EngineStatus::Aborted, None, None),
        RunOutcome::Failed(msg) => (EngineStatus::Failed, None, Some(msg)),
    };
    {
        let mut state = shared.state.lock();
        state.status = status;
        state.solution = solution;
        state.failure = failure.clone();
    }

    let report = RunReport {
        status,
        solution,
        failure,
    };
    let ready = shared.ready_sink.lock().take();
    if let Some(ready) = ready {
        ready(&report);
    }

    shared.state.lock().finished = true;
    shared.finished.notify_all();
}
