//! Scripted backend and helpers shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buffer::{PlanarBuffer, SourceImage};
use crate::convert::convert;
use crate::engine::{RunContext, RunOutcome, SolveRequest, SolverBackend};
use crate::solution::{Parity, Solution};

const TIMEOUT: Duration = Duration::from_secs(5);

/// What a scripted run does.
#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// Return [`test_solution`].
    Solve,
    /// Finish without a solution.
    NoSolution,
    /// Fail with a message.
    Fail(&'static str),
    /// Panic inside the backend.
    Panic,
    /// Wait for [`ScriptedBackend::release`] or an abort. Released runs end unsolved.
    Hold,
    /// Wait for [`ScriptedBackend::release`], ignoring aborts.
    HoldIgnoringAbort,
}

#[derive(Default)]
struct Gate {
    started: usize,
    acknowledged: usize,
    holds: usize,
    released: usize,
    outcomes: VecDeque<RunOutcome>,
    requests: Vec<SolveRequest>,
}

/// A backend whose runs follow a script, one [`Step`] per run.
///
/// Runs beyond the end of the script solve immediately.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl ScriptedBackend {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        })
    }

    /// Let the oldest held run finish.
    pub(crate) fn release(&self) {
        self.gate.lock().released += 1;
        self.changed.notify_all();
    }

    /// Wait until one more run has started than was previously waited for.
    pub(crate) fn wait_started(&self) {
        let mut gate = self.wait_for(|gate| gate.started > gate.acknowledged, "run start");
        gate.acknowledged += 1;
    }

    /// Next outcome returned by a run, in completion order.
    pub(crate) fn wait_outcome(&self) -> RunOutcome {
        let mut gate = self.wait_for(|gate| !gate.outcomes.is_empty(), "run outcome");
        gate.outcomes.pop_front().unwrap()
    }

    /// Number of runs started so far.
    pub(crate) fn runs(&self) -> usize {
        self.gate.lock().started
    }

    /// Requests received so far, in start order.
    pub(crate) fn requests(&self) -> Vec<SolveRequest> {
        self.gate.lock().requests.clone()
    }

    fn wait_for(
        &self,
        ready: impl Fn(&Gate) -> bool,
        what: &str,
    ) -> parking_lot::MutexGuard<'_, Gate> {
        let deadline = Instant::now() + TIMEOUT;
        let mut gate = self.gate.lock();
        while !ready(&gate) {
            if self.changed.wait_until(&mut gate, deadline).timed_out() {
                panic!("timed out waiting for {what}");
            }
        }
        gate
    }

    fn hold(&self, ctx: &RunContext, honour_abort: bool) -> RunOutcome {
        let mut gate = self.gate.lock();
        let ticket = gate.holds;
        gate.holds += 1;
        loop {
            if gate.released > ticket {
                return RunOutcome::NoSolution;
            }
            if honour_abort && ctx.is_aborted() {
                return RunOutcome::Aborted;
            }
            // The abort flag is not tied to this condvar, so wake up periodically.
            self.changed.wait_for(&mut gate, Duration::from_millis(1));
        }
    }
}

impl SolverBackend for ScriptedBackend {
    fn run(&self, request: &SolveRequest, ctx: &RunContext) -> RunOutcome {
        let step = self.steps.lock().pop_front().unwrap_or(Step::Solve);
        ctx.log("scripted run started");
        {
            let mut gate = self.gate.lock();
            gate.started += 1;
            gate.requests.push(request.clone());
        }
        self.changed.notify_all();

        let outcome = match step {
            Step::Solve => RunOutcome::Solved(test_solution()),
            Step::NoSolution => RunOutcome::NoSolution,
            Step::Fail(msg) => RunOutcome::Failed(msg.to_owned()),
            Step::Panic => panic!("scripted panic"),
            Step::Hold => self.hold(ctx, true),
            Step::HoldIgnoringAbort => self.hold(ctx, false),
        };

        self.gate.lock().outcomes.push_back(outcome.clone());
        self.changed.notify_all();
        outcome
    }
}

/// The solution returned by [`Step::Solve`].
pub(crate) fn test_solution() -> Solution {
    Solution {
        ra: 65.,
        dec: 0.,
        orientation: 12.5,
        field_width: 30.,
        field_height: 20.,
        pixscale: 18.,
        parity: Parity::Negative,
    }
}

/// BGRA bytes of a `width`x`height` image filled with one colour.
pub(crate) fn constant_bgra(width: u32, height: u32, [r, g, b]: [u8; 3]) -> Vec<u8> {
    (0..width * height).flat_map(|_| [b, g, r, 255]).collect()
}

/// A small converted buffer.
pub(crate) fn test_buffer() -> Arc<PlanarBuffer> {
    let data = constant_bgra(4, 4, [10, 20, 30]);
    Arc::new(convert(SourceImage::bgra(4, 4, &data).unwrap()).unwrap())
}

/// Capture log output in tests.
pub(crate) fn init_logger() {
    let _ = simplelog::TestLogger::init(log::LevelFilter::Debug, simplelog::Config::default());
}
