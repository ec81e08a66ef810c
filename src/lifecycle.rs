//! Single-flight lifecycle of solving engine instances.
//!
//! [`SolverLifecycleManager`] owns at most one current [`SolverEngine`]. Every
//! start replaces that instance, and each replacement bumps a generation
//! counter. Completion handlers carry the generation they were created for and
//! deliver only while it is still current, so a superseded instance that keeps
//! running can never report into a newer run.

use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::buffer::PlanarBuffer;
use crate::config::{EngineConfig, ProcessKind};
use crate::engine::{EngineStatus, RunReport, SolverBackend, SolverEngine};
use crate::error::{Error, Result};
use crate::solution::Solution;

/// Result of one solve, as published to the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveOutcome {
    /// `!failed && solving_done`.
    pub success: bool,
    /// The solution. Unspecified unless `success`.
    pub solution: Solution,
    /// Terminal engine status.
    pub status: EngineStatus,
    /// Failure message of a failed run.
    pub failure: Option<String>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl SolveOutcome {
    /// Why the run did not succeed, or `None` for a successful run.
    pub fn error(&self) -> Option<Error> {
        if self.success {
            return None;
        }
        Some(match &self.failure {
            Some(msg) => Error::EngineFailure(msg.clone()),
            None => Error::NoSolution,
        })
    }
}

/// Receives controller events.
///
/// Both methods are called from engine worker threads and must not call back
/// into the controller synchronously.
pub trait SolverListener: Send + Sync {
    /// A line of engine or controller log output. May be called any number of times.
    fn on_log_output(&self, text: &str);

    /// A solve finished. Called exactly once per start that is not superseded.
    fn on_solver_complete(&self, outcome: &SolveOutcome);
}

/// Controller events in channel form.
#[derive(Clone, Debug, PartialEq)]
pub enum ControllerEvent {
    /// See [`SolverListener::on_log_output`].
    Log(String),
    /// See [`SolverListener::on_solver_complete`].
    Complete(SolveOutcome),
}

impl SolverListener for Sender<ControllerEvent> {
    fn on_log_output(&self, text: &str) {
        let _ = self.send(ControllerEvent::Log(text.to_owned()));
    }

    fn on_solver_complete(&self, outcome: &SolveOutcome) {
        let _ = self.send(ControllerEvent::Complete(outcome.clone()));
    }
}

/// Externally visible lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// No run configured.
    Idle,
    /// A run is configured but not started.
    Configuring,
    /// A run is in progress.
    Running,
    /// The last run produced a solution.
    Completed,
    /// The last run was aborted.
    Aborted,
    /// The last run failed or found no solution.
    Failed,
}

/// Owner of the current engine instance.
pub struct SolverLifecycleManager {
    backend: Arc<dyn SolverBackend>,
    listener: Arc<dyn SolverListener>,
    engine: Option<SolverEngine>,
    generation: Arc<Mutex<u64>>,
    restart_timeout: Duration,
}

impl SolverLifecycleManager {
    /// Create a manager without an engine instance.
    pub fn new(
        backend: Arc<dyn SolverBackend>,
        listener: Arc<dyn SolverListener>,
        restart_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            listener,
            engine: None,
            generation: Arc::new(Mutex::new(0)),
            restart_timeout,
        }
    }

    /// The current engine instance.
    pub fn engine(&self) -> Option<&SolverEngine> {
        self.engine.as_ref()
    }

    /// Replace the current engine with a fresh one bound to `buffer`.
    ///
    /// The old instance is unlinked first. If it is still running it is asked
    /// to abort and torn down once it finishes; otherwise it is torn down now.
    pub fn reset(&mut self, buffer: Arc<PlanarBuffer>) {
        self.retire();

        let engine = SolverEngine::new(self.backend.clone(), buffer);
        let listener = self.listener.clone();
        engine.subscribe_log(Arc::new(move |text| listener.on_log_output(text)));
        self.engine = Some(engine);
    }

    /// Drop the current engine without creating a new one.
    pub fn release(&mut self) {
        self.retire();
    }

    /// Configure the current engine for a run.
    pub fn configure(&mut self, mut config: EngineConfig) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(Error::NoImage)?;
        if engine.is_running() {
            return Err(Error::InvalidState("cannot configure while solving"));
        }
        config.subframe = None;
        engine.configure(config)
    }

    /// Start a solve of `buffer` with `config`.
    ///
    /// A run that is still active is aborted first, and this call waits, up to
    /// the restart timeout, for it to report completion. Returns once the new
    /// run has been launched; its result arrives through
    /// [`SolverListener::on_solver_complete`].
    pub fn start(&mut self, buffer: Arc<PlanarBuffer>, config: EngineConfig) -> Result<()> {
        if let Some(engine) = self.engine.as_ref().filter(|e| e.is_running()) {
            self.abort();
            if !engine.wait_finished(self.restart_timeout) {
                warn!(
                    "Previous run did not stop within {:?}, superseding it.",
                    self.restart_timeout
                );
            }
        }

        self.reset(buffer);
        self.configure(config)?;

        let Some(engine) = self.engine.as_mut() else {
            return Err(Error::InvalidState("no engine instance"));
        };
        let token = *self.generation.lock();
        let generation = self.generation.clone();
        let listener = self.listener.clone();
        let started = Instant::now();
        engine.subscribe_ready(Box::new(move |report| {
            on_engine_ready(&generation, token, started, listener.as_ref(), report)
        }));

        info!("Starting solve, run {token}.");
        engine.start()
    }

    /// Ask the active solve to stop. No-op unless a solve is running and unsolved.
    pub fn abort(&self) {
        let Some(engine) = &self.engine else {
            return;
        };
        if engine.is_running()
            && engine.process_kind() == Some(ProcessKind::Solve)
            && !engine.solving_done()
        {
            engine.abort();
        }
    }

    /// Whether a run is in progress.
    pub fn is_active(&self) -> bool {
        self.engine.as_ref().is_some_and(SolverEngine::is_running)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        let Some(engine) = &self.engine else {
            return LifecycleState::Idle;
        };
        if engine.is_running() {
            return LifecycleState::Running;
        }
        match engine.status() {
            EngineStatus::Idle => LifecycleState::Idle,
            EngineStatus::Configured => LifecycleState::Configuring,
            EngineStatus::Running => LifecycleState::Running,
            EngineStatus::Solved => LifecycleState::Completed,
            EngineStatus::Aborted => LifecycleState::Aborted,
            EngineStatus::Unsolved | EngineStatus::Failed => LifecycleState::Failed,
        }
    }

    /// Unlink and drop the current engine, invalidating its completion handler.
    fn retire(&mut self) {
        *self.generation.lock() += 1;
        if let Some(engine) = self.engine.take() {
            engine.unsubscribe_all();
            if engine.is_running() {
                debug!("Aborting superseded engine instance.");
                engine.abort();
            }
        }
    }
}

impl Drop for SolverLifecycleManager {
    fn drop(&mut self) {
        self.retire();
    }
}

/// Completion handler of run `token`.
fn on_engine_ready(
    generation: &Mutex<u64>,
    token: u64,
    started: Instant,
    listener: &dyn SolverListener,
    report: &RunReport,
) {
    // Held while delivering so a concurrent reset waits for this event.
    let current = generation.lock();
    if *current != token {
        debug!("Ignoring completion of superseded run {token}.");
        return;
    }

    let elapsed = started.elapsed();
    debug!("Elapsed time = {:.3} s", elapsed.as_secs_f64());
    let success = !report.failed() && report.solving_done();
    let outcome = SolveOutcome {
        success,
        solution: report.solution.unwrap_or_default(),
        status: report.status,
        failure: report.failure.clone(),
        elapsed,
    };
    listener.on_solver_complete(&outcome);
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver};

    use super::*;
    use crate::engine::RunOutcome;
    use crate::params::SolveParameters;
    use crate::test_utils::{ScriptedBackend, Step, init_logger, test_buffer, test_solution};

    const WAIT: Duration = Duration::from_secs(5);

    fn manager(
        backend: &Arc<ScriptedBackend>,
        restart_timeout: Duration,
    ) -> (SolverLifecycleManager, Receiver<ControllerEvent>) {
        init_logger();
        let (tx, rx) = mpsc::channel();
        let manager = SolverLifecycleManager::new(backend.clone(), Arc::new(tx), restart_timeout);
        (manager, rx)
    }

    fn solve_config() -> EngineConfig {
        EngineConfig::solve(SolveParameters::default())
    }

    fn next_completion(rx: &Receiver<ControllerEvent>) -> SolveOutcome {
        let deadline = Instant::now() + WAIT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left).expect("no completion event") {
                ControllerEvent::Complete(outcome) => return outcome,
                ControllerEvent::Log(_) => continue,
            }
        }
    }

    fn no_more_completions(rx: &Receiver<ControllerEvent>) {
        std::thread::sleep(Duration::from_millis(50));
        let extra = rx
            .try_iter()
            .filter(|e| matches!(e, ControllerEvent::Complete(_)))
            .count();
        assert_eq!(extra, 0, "unexpected completion events");
    }

    #[test]
    fn successful_solve() {
        let backend = ScriptedBackend::new([Step::Solve]);
        let (mut manager, rx) = manager(&backend, WAIT);
        assert_eq!(manager.state(), LifecycleState::Idle);

        manager.start(test_buffer(), solve_config()).unwrap();
        let outcome = next_completion(&rx);
        assert!(outcome.success);
        assert_eq!(outcome.solution, test_solution());
        assert_eq!(outcome.error(), None);

        assert!(manager.engine().unwrap().wait_finished(WAIT));
        assert_eq!(manager.state(), LifecycleState::Completed);
        assert!(!manager.is_active());
        no_more_completions(&rx);
    }

    #[test]
    fn failures_reported_through_completion() {
        let backend = ScriptedBackend::new([Step::Fail("index missing"), Step::NoSolution]);
        let (mut manager, rx) = manager(&backend, WAIT);

        manager.start(test_buffer(), solve_config()).unwrap();
        let outcome = next_completion(&rx);
        assert!(!outcome.success);
        assert_eq!(outcome.status, EngineStatus::Failed);
        assert_eq!(outcome.error(), Some(Error::EngineFailure("index missing".into())));

        manager.start(test_buffer(), solve_config()).unwrap();
        let outcome = next_completion(&rx);
        assert!(!outcome.success);
        assert_eq!(outcome.error(), Some(Error::NoSolution));
        assert!(manager.engine().unwrap().wait_finished(WAIT));
        assert_eq!(manager.state(), LifecycleState::Failed);
    }

    #[test]
    fn abort_without_run_is_noop() {
        let backend = ScriptedBackend::new([]);
        let (mut manager, rx) = manager(&backend, WAIT);
        manager.abort();

        manager.reset(test_buffer());
        manager.abort();
        assert_eq!(manager.state(), LifecycleState::Idle);
        assert_eq!(backend.runs(), 0);
        no_more_completions(&rx);
    }

    #[test]
    fn abort_mid_run_still_completes_once() {
        let backend = ScriptedBackend::new([Step::Hold]);
        let (mut manager, rx) = manager(&backend, WAIT);

        manager.start(test_buffer(), solve_config()).unwrap();
        backend.wait_started();
        assert!(manager.is_active());
        assert_eq!(manager.state(), LifecycleState::Running);

        manager.abort();
        manager.abort();
        let outcome = next_completion(&rx);
        assert!(!outcome.success);
        assert_eq!(outcome.status, EngineStatus::Aborted);
        no_more_completions(&rx);
    }

    #[test]
    fn restart_waits_for_previous_run() {
        let backend = ScriptedBackend::new([Step::Hold, Step::Solve]);
        let (mut manager, rx) = manager(&backend, WAIT);

        manager.start(test_buffer(), solve_config()).unwrap();
        backend.wait_started();

        manager.start(test_buffer(), solve_config()).unwrap();
        // The first run was aborted and reported before the second was created.
        assert_eq!(backend.wait_outcome(), RunOutcome::Aborted);
        let first = next_completion(&rx);
        assert_eq!(first.status, EngineStatus::Aborted);

        let second = next_completion(&rx);
        assert!(second.success);
        assert_eq!(backend.runs(), 2);
        no_more_completions(&rx);
    }

    #[test]
    fn superseded_engine_cannot_deliver() {
        let backend = ScriptedBackend::new([Step::HoldIgnoringAbort, Step::Hold]);
        let (mut manager, rx) = manager(&backend, Duration::from_millis(20));

        manager.start(test_buffer(), solve_config()).unwrap();
        backend.wait_started();

        // The first run ignores the abort, so the restart gives up waiting.
        manager.start(test_buffer(), solve_config()).unwrap();
        backend.wait_started();

        // Finishing the stale run raises nothing.
        backend.release();
        assert_eq!(backend.wait_outcome(), RunOutcome::NoSolution);
        no_more_completions(&rx);

        manager.abort();
        let outcome = next_completion(&rx);
        assert_eq!(outcome.status, EngineStatus::Aborted);
        no_more_completions(&rx);
    }

    #[test]
    fn reset_discards_pending_completion() {
        let backend = ScriptedBackend::new([Step::Hold]);
        let (mut manager, rx) = manager(&backend, WAIT);

        manager.start(test_buffer(), solve_config()).unwrap();
        backend.wait_started();
        manager.reset(test_buffer());

        assert_eq!(backend.wait_outcome(), RunOutcome::Aborted);
        no_more_completions(&rx);
        assert_eq!(manager.state(), LifecycleState::Idle);
    }

    #[test]
    fn configure_requires_engine_and_idle() {
        let backend = ScriptedBackend::new([Step::Hold]);
        let (mut manager, _rx) = manager(&backend, WAIT);
        assert_eq!(manager.configure(solve_config()), Err(Error::NoImage));

        manager.start(test_buffer(), solve_config()).unwrap();
        backend.wait_started();
        assert_eq!(
            manager.configure(solve_config()),
            Err(Error::InvalidState("cannot configure while solving"))
        );
        manager.abort();
    }

    #[test]
    fn invalid_parameters_fail_synchronously() {
        let backend = ScriptedBackend::new([]);
        let (mut manager, rx) = manager(&backend, WAIT);
        let config = EngineConfig::solve(SolveParameters::default().with_keep(1, 2));

        assert!(matches!(
            manager.start(test_buffer(), config),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(backend.runs(), 0);
        assert_eq!(manager.state(), LifecycleState::Idle);
        no_more_completions(&rx);
    }

    #[test]
    fn subframe_cleared_and_logs_forwarded() {
        let backend = ScriptedBackend::new([Step::Solve]);
        let (mut manager, rx) = manager(&backend, WAIT);
        let mut config = solve_config();
        config.subframe = Some(crate::config::SubFrame {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        });

        manager.start(test_buffer(), config).unwrap();
        let logs: Vec<ControllerEvent> = rx.iter().take(2).collect();
        assert_eq!(logs[0], ControllerEvent::Log("scripted run started".into()));
        assert!(matches!(logs[1], ControllerEvent::Complete(_)));
        assert_eq!(backend.requests()[0].config.subframe, None);
    }
}
