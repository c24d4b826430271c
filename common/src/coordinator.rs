//! Turns a board request into a guessless field.
//!
//! Candidates are drawn by [`generate`] and checked by the [`Solver`] until
//! one needs no guess. With more than one worker configured the trials run
//! on a [`WorkerPool`], first field wins, and the rest are cancelled and
//! reaped before returning. Every call is bounded by an area check up front
//! and a time budget that grows with the area.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::field::{Field, FieldParams};
use crate::generator::generate;
use crate::guard::ResourceLimits;
use crate::pool::{CancelToken, Event, WorkerContext, WorkerPool};
use crate::solver::{Solver, SolverConfig, Verdict};
use crate::topology::{Coord, Topology};

/// One request for a new field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardRequest {
    params: FieldParams,
    guessless: bool,
    flagcount: Option<bool>,
}

impl BoardRequest {
    pub fn new(
        width: usize,
        height: usize,
        mine_count: usize,
        topology: Topology,
        start: Coord,
    ) -> Result<Self> {
        Ok(Self::from_params(FieldParams::new(
            width, height, mine_count, topology, start,
        )?))
    }

    pub fn from_params(params: FieldParams) -> Self {
        Self {
            params,
            guessless: true,
            flagcount: None,
        }
    }

    /// With `false`, the first candidate is returned unchecked.
    pub fn guessless(mut self, guessless: bool) -> Self {
        self.guessless = guessless;
        self
    }

    /// Whether the solver may use the number of mines left. Overrides the
    /// coordinator's solver configuration for this request.
    pub fn flagcount(mut self, flagcount: bool) -> Self {
        self.flagcount = Some(flagcount);
        self
    }

    pub fn params(&self) -> &FieldParams {
        &self.params
    }

    pub fn is_guessless(&self) -> bool {
        self.guessless
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Dispatching,
    WorkerRunning,
    Succeeded,
    TimedOut,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Parallel { workers: usize },
    Serial,
    /// The request opted out of validation.
    Unvalidated,
}

/// How one initialization went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitReport {
    pub state: CoordinatorState,
    pub mode: SearchMode,
    pub trials: u64,
    pub elapsed: Duration,
    pub budget: Duration,
    /// The worker whose field was taken, in parallel mode.
    pub winner: Option<usize>,
    pub workers_abandoned: usize,
}

#[derive(Debug, Clone)]
pub struct Initialized {
    pub field: Field,
    /// `None` for unvalidated requests.
    pub verdict: Option<Verdict>,
    pub report: InitReport,
}

/// Lifetime counters of a coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub trials: u64,
    pub workers_spawned: usize,
    /// Workers that have not exited yet, detached ones included.
    pub live_workers: usize,
}

struct Outcome {
    mode: SearchMode,
    found: Option<(Field, Option<Verdict>)>,
    winner: Option<usize>,
    abandoned: usize,
}

type Found = (Field, Verdict);

/// How long the parallel search waits per event when the budget has no
/// representable deadline.
const UNBOUNDED_WAIT: Duration = Duration::from_secs(3600);

/// Time left before `deadline`. `None` never runs out.
fn time_left(deadline: Option<Instant>) -> Duration {
    deadline.map_or(UNBOUNDED_WAIT, |deadline| deadline.saturating_duration_since(Instant::now()))
}

pub struct Coordinator {
    config: EngineConfig,
    limits: ResourceLimits,
    trials: AtomicU64,
    workers_spawned: AtomicUsize,
    live_workers: Arc<AtomicUsize>,
}

impl Coordinator {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let limits = config.limits()?;
        Ok(Self {
            config,
            limits,
            trials: AtomicU64::new(0),
            workers_spawned: AtomicUsize::new(0),
            live_workers: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            trials: self.trials.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            live_workers: self.live_workers.load(Ordering::SeqCst),
        }
    }

    pub fn initialize(&self, request: &BoardRequest) -> Result<Field> {
        self.initialize_detailed(request)
            .map(|initialized| initialized.field)
    }

    #[instrument(
        name = "initialize",
        skip_all,
        fields(
            width = request.params().width(),
            height = request.params().height(),
            mines = request.params().mine_count(),
            topology = %request.params().topology(),
        )
    )]
    pub fn initialize_detailed(&self, request: &BoardRequest) -> Result<Initialized> {
        let started = Instant::now();
        let params = *request.params();
        let mut state = CoordinatorState::Idle;

        if let Err(err) = self.limits.check_area(params.area()) {
            warn!(%err, "refusing board");
            return Err(err);
        }
        let budget = self.limits.time_budget(params.area());
        let deadline = started.checked_add(budget);
        if deadline.is_none() {
            debug!(budget_s = budget.as_secs(), "budget past the clock range, no deadline");
        }
        let solver = Solver::new(SolverConfig {
            use_mine_count: request
                .flagcount
                .unwrap_or(self.config.solver.use_mine_count),
            ..self.config.solver
        });
        let mut rng = self.master_rng();
        let trials = Arc::new(AtomicU64::new(0));
        transition(&mut state, CoordinatorState::Dispatching);

        let searched = if !request.guessless {
            trials.fetch_add(1, Ordering::Relaxed);
            Ok(Outcome {
                mode: SearchMode::Unvalidated,
                found: Some((generate(&params, &mut rng), None)),
                winner: None,
                abandoned: 0,
            })
        } else if self.limits.procs <= 1 {
            self.search_serial(&params, &solver, &mut rng, &trials, deadline, &mut state)
        } else {
            self.search_parallel(params, &solver, &mut rng, &trials, deadline, &mut state)
        };

        let trials = trials.load(Ordering::Relaxed);
        self.trials.fetch_add(trials, Ordering::Relaxed);
        conclude(searched, trials, started, budget, &mut state)
    }

    fn master_rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    fn search_serial(
        &self,
        params: &FieldParams,
        solver: &Solver,
        rng: &mut StdRng,
        trials: &AtomicU64,
        deadline: Option<Instant>,
        state: &mut CoordinatorState,
    ) -> Result<Outcome> {
        transition(state, CoordinatorState::WorkerRunning);
        let found = search(params, solver, rng, trials, &|| time_left(deadline).is_zero())?;
        Ok(Outcome {
            mode: SearchMode::Serial,
            found: found.map(|(field, verdict)| (field, Some(verdict))),
            winner: None,
            abandoned: 0,
        })
    }

    fn search_parallel(
        &self,
        params: FieldParams,
        solver: &Solver,
        rng: &mut StdRng,
        trials: &Arc<AtomicU64>,
        deadline: Option<Instant>,
        state: &mut CoordinatorState,
    ) -> Result<Outcome> {
        let seeds: Vec<u64> = (0..self.limits.procs).map(|_| rng.random()).collect();
        let job = {
            let solver = solver.clone();
            let trials = Arc::clone(trials);
            move |ctx: &WorkerContext<Result<Found>>| {
                let mut rng = StdRng::seed_from_u64(seeds[ctx.id()]);
                match search(&params, &solver, &mut rng, &trials, &|| ctx.is_cancelled()) {
                    Ok(Some(found)) => {
                        ctx.report(Ok(found));
                    }
                    Ok(None) => debug!(worker = ctx.id(), "worker cancelled"),
                    Err(err) => {
                        ctx.report(Err(err));
                    }
                }
            }
        };

        match self.spawn_workers(job) {
            Ok(pool) => self.collect(pool, deadline, state),
            Err(err) => {
                self.without_workers(err)?;
                self.search_serial(&params, solver, rng, trials, deadline, state)
            }
        }
    }

    /// Decides what a failed spawn means: `Ok` to search serially instead,
    /// or [`Error::NoViableField`] when the fallback is off.
    fn without_workers(&self, err: io::Error) -> Result<()> {
        if !self.limits.serial_fallback {
            return Err(Error::NoViableField(format!("cannot start workers: {err}")));
        }
        warn!(%err, "cannot start workers, searching serially");
        Ok(())
    }

    fn spawn_workers<F>(&self, job: F) -> io::Result<WorkerPool<Result<Found>>>
    where
        F: Fn(&WorkerContext<Result<Found>>) + Send + Sync + 'static,
    {
        let pool = WorkerPool::spawn(
            self.limits.procs,
            "guessless-worker",
            Arc::clone(&self.live_workers),
            CancelToken::new(),
            job,
        )?;
        self.workers_spawned.fetch_add(pool.len(), Ordering::Relaxed);
        Ok(pool)
    }

    /// Waits for the first field from `pool` and shuts the pool down.
    ///
    /// A worker error is passed on as is. Running out of workers without a
    /// field is [`Error::NoViableField`]; running out of time is `Ok` with
    /// nothing found.
    fn collect(
        &self,
        mut pool: WorkerPool<Result<Found>>,
        deadline: Option<Instant>,
        state: &mut CoordinatorState,
    ) -> Result<Outcome> {
        transition(state, CoordinatorState::WorkerRunning);
        debug!(workers = pool.len(), "workers dispatched");

        let result = loop {
            let remaining = time_left(deadline);
            if remaining.is_zero() {
                break Ok(None);
            }
            match pool.next_event(remaining) {
                Ok(Event::Report {
                    worker,
                    result: Ok(found),
                }) => break Ok(Some((worker, found))),
                Ok(Event::Report {
                    worker,
                    result: Err(err),
                }) => {
                    warn!(worker, %err, "worker failed");
                    break Err(err);
                }
                Ok(Event::Exited { worker }) => {
                    debug!(worker, "worker exited");
                    if pool.running() == 0 {
                        break Err(Error::NoViableField(
                            "every worker exited without a field".to_string(),
                        ));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(Error::NoViableField("worker channel closed".to_string()));
                }
            }
        };

        let workers = pool.len();
        let shutdown = pool.shutdown(self.limits.grace_period);
        let (winner, found) = match result? {
            Some((worker, (field, verdict))) => (Some(worker), Some((field, Some(verdict)))),
            None => (None, None),
        };
        Ok(Outcome {
            mode: SearchMode::Parallel { workers },
            found,
            winner,
            abandoned: shutdown.abandoned,
        })
    }
}

/// Maps a finished search onto the final state and the caller's result.
fn conclude(
    searched: Result<Outcome>,
    trials: u64,
    started: Instant,
    budget: Duration,
    state: &mut CoordinatorState,
) -> Result<Initialized> {
    let outcome = match searched {
        Ok(outcome) => outcome,
        Err(err) => {
            transition(state, CoordinatorState::Aborted);
            warn!(%err, trials, "initialization aborted");
            return Err(err);
        }
    };
    let Some((field, verdict)) = outcome.found else {
        transition(state, CoordinatorState::TimedOut);
        warn!(trials, budget_ms = budget.as_millis() as u64, "no guessless field in time");
        return Err(Error::TimeExceeded { budget, trials });
    };
    transition(state, CoordinatorState::Succeeded);

    let report = InitReport {
        state: *state,
        mode: outcome.mode,
        trials,
        elapsed: started.elapsed(),
        budget,
        winner: outcome.winner,
        workers_abandoned: outcome.abandoned,
    };
    info!(
        trials,
        elapsed_ms = report.elapsed.as_millis() as u64,
        mode = ?report.mode,
        score = ?verdict.map(|verdict| verdict.difficulty.score),
        "field initialized"
    );
    Ok(Initialized {
        field,
        verdict,
        report,
    })
}

fn transition(state: &mut CoordinatorState, next: CoordinatorState) {
    info!(from = ?state, to = ?next, "coordinator state");
    *state = next;
}

/// Generates and validates candidates until one is guessless or `stop`
/// returns true.
///
/// `trials` is incremented once per candidate. `stop` is also handed to the
/// solver, so a long validation is cut short too.
pub fn search<R: Rng + ?Sized>(
    params: &FieldParams,
    solver: &Solver,
    rng: &mut R,
    trials: &AtomicU64,
    stop: &dyn Fn() -> bool,
) -> Result<Option<Found>> {
    while !stop() {
        let field = generate(params, rng);
        let trial = trials.fetch_add(1, Ordering::Relaxed) + 1;
        let Some(verdict) = solver.solve_until(&field, stop)? else {
            return Ok(None);
        };
        if verdict.is_guessless() {
            debug!(trial, score = verdict.difficulty.score, "guessless candidate");
            return Ok(Some((field, verdict)));
        }
        trace!(trial, "candidate needs a guess");
    }
    Ok(None)
}
