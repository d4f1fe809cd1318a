//! Startup, readiness gating and shutdown of a listener group.
//!
//! # States
//! ```text
//! Idle → Starting → Probing → Ready → Draining → Stopped
//!           │          │        │
//!           └──────────┴────────┴──→ Failed
//! ```
//!
//! - Starting: every listener is launched on its own task; wait for each to
//!   report its bound address. Any bind failure fails the group.
//! - Probing: run every health check once per poll interval, concurrently,
//!   until one round passes completely or the readiness timeout elapses.
//! - Ready: wait for a stop request or for a listener to terminate.
//! - Draining: stop every listener and wait (bounded) for their sockets to
//!   be released.
//!
//! `run` is the only place that changes state; listener tasks and probe
//! tasks only report their results back to it.

use std::any::Any;
use std::fmt;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, FutureExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::health::{HealthCheck, ProbeError};
use crate::lifecycle::error::{CheckFailure, DrainReport, RuntimeCause, ShutdownFault, SupervisorError};
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;

/// Lifecycle state of a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting,
    Probing,
    Ready,
    Draining,
    Stopped,
    Failed,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Starting => "starting",
            SupervisorState::Probing => "probing",
            SupervisorState::Ready => "ready",
            SupervisorState::Draining => "draining",
            SupervisorState::Stopped => "stopped",
            SupervisorState::Failed => "failed",
        }
    }

    /// Stable numeric value used for the state gauge.
    pub fn ordinal(&self) -> u8 {
        match self {
            SupervisorState::Idle => 0,
            SupervisorState::Starting => 1,
            SupervisorState::Probing => 2,
            SupervisorState::Ready => 3,
            SupervisorState::Draining => 4,
            SupervisorState::Stopped => 5,
            SupervisorState::Failed => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::Stopped | SupervisorState::Failed)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing of the supervisor's phases.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Budget for the whole probing phase, not per check.
    pub readiness_timeout: Duration,
    /// Delay between the starts of two polling rounds.
    pub poll_interval: Duration,
    /// How long stopped listeners get to release their sockets.
    pub drain_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            drain_grace: Duration::from_secs(5),
        }
    }
}

/// Brings up a fixed set of listeners, gates on health checks, and owns the
/// listeners until the service stops.
pub struct Supervisor {
    listeners: Vec<Arc<dyn Listener>>,
    checks: Vec<HealthCheck>,
    config: SupervisorConfig,
    shutdown: Shutdown,
    state: watch::Sender<SupervisorState>,
    invoked: AtomicBool,
}

impl Supervisor {
    pub fn new(listeners: Vec<Arc<dyn Listener>>, checks: Vec<HealthCheck>, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            listeners,
            checks,
            config,
            shutdown: Shutdown::new(),
            state,
            invoked: AtomicBool::new(false),
        }
    }

    /// Handle used to request a drain from outside `run`.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run the whole lifecycle. May be called once.
    ///
    /// Returns after a requested drain (`Ok`, with any shutdown faults in the
    /// report) or as soon as the group fails (`Err`). In both cases every
    /// listener has been stopped before this returns.
    pub async fn run(&self) -> Result<DrainReport, SupervisorError> {
        if self.invoked.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyRunning);
        }

        self.transition(SupervisorState::Starting);
        tracing::info!(
            listeners = self.listeners.len(),
            checks = self.checks.len(),
            readiness_timeout = ?self.config.readiness_timeout,
            "Starting listeners"
        );
        let (mut fleet, bound) = Fleet::launch(&self.listeners);

        let bound = tokio::select! {
            biased;
            _ = self.shutdown.triggered() => return Ok(self.drain(&mut fleet).await),
            bound = future::join_all(bound) => bound,
        };

        let mut unbound = Vec::new();
        for (index, result) in bound.into_iter().enumerate() {
            match result {
                Ok(addr) => tracing::debug!(listener = %self.listeners[index].id(), address = %addr, "Listener ready to serve"),
                Err(_) => unbound.push(index),
            }
        }
        if !unbound.is_empty() {
            return Err(self.fail_bind(&mut fleet, &unbound).await);
        }

        self.transition(SupervisorState::Probing);
        let started = Instant::now();
        let deadline = started + self.config.readiness_timeout;
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_round: Vec<Option<Result<(), ProbeError>>> = self.checks.iter().map(|_| None).collect();
        let mut rounds: u32 = 0;

        loop {
            let round = tokio::select! {
                biased;
                _ = self.shutdown.triggered() => return Ok(self.drain(&mut fleet).await),
                Some(index) = fleet.next_exit() => return Err(self.fail_runtime(&mut fleet, index).await),
                _ = time::sleep_until(deadline) => return Err(self.fail_readiness(&mut fleet, last_round).await),
                round = async {
                    ticker.tick().await;
                    self.probe_round().await
                } => round,
            };

            rounds += 1;
            let healthy = round.iter().all(|result| matches!(result, Some(Ok(()))));
            last_round = round;
            if healthy {
                break;
            }
        }

        self.transition(SupervisorState::Ready);
        tracing::info!(elapsed = ?started.elapsed(), rounds, "All health checks passed; serving");

        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => Ok(self.drain(&mut fleet).await),
            Some(index) = fleet.next_exit() => Err(self.fail_runtime(&mut fleet, index).await),
        }
    }

    /// One polling round: every check on its own task, joined.
    async fn probe_round(&self) -> Vec<Option<Result<(), ProbeError>>> {
        let mut round = JoinSet::new();
        for (index, check) in self.checks.iter().enumerate() {
            let check = check.clone();
            round.spawn(async move { (index, check.probe().await) });
        }

        let mut results: Vec<Option<Result<(), ProbeError>>> = self.checks.iter().map(|_| None).collect();
        while let Some(joined) = round.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::warn!(error = %e, "Health check task failed"),
            }
        }
        results
    }

    async fn drain(&self, fleet: &mut Fleet) -> DrainReport {
        self.transition(SupervisorState::Draining);
        tracing::info!(listeners = self.listeners.len(), "Draining listeners");

        fleet.unwind(&self.listeners, self.config.drain_grace).await;
        let faults = self.settle(fleet, SupervisorState::Stopped);

        tracing::info!(faults = faults.len(), "All listeners stopped");
        DrainReport { faults }
    }

    async fn fail_bind(&self, fleet: &mut Fleet, unbound: &[usize]) -> SupervisorError {
        fleet.unwind(&self.listeners, self.config.drain_grace).await;

        let errors: Vec<ListenerError> = unbound
            .iter()
            .map(|&index| {
                let listener = self.listeners[index].id();
                match fleet.take(index) {
                    Some(Exit::Returned(Err(e))) => e,
                    Some(Exit::Panicked(message)) => ListenerError::Bind {
                        listener,
                        source: io::Error::other(format!("panicked before binding: {message}")),
                    },
                    _ => ListenerError::Bind {
                        listener,
                        source: io::Error::other("exited before reporting a bound address"),
                    },
                }
            })
            .collect();

        for e in &errors {
            tracing::error!(listener = %e.listener(), error = %e, "Listener failed to bind");
        }
        self.settle(fleet, SupervisorState::Failed);
        SupervisorError::Bind(errors)
    }

    async fn fail_readiness(&self, fleet: &mut Fleet, last_round: Vec<Option<Result<(), ProbeError>>>) -> SupervisorError {
        let failing: Vec<CheckFailure> = self
            .checks
            .iter()
            .zip(last_round)
            .filter_map(|(check, result)| match result {
                Some(Ok(())) => None,
                last => Some(CheckFailure {
                    check: check.name().to_string(),
                    last_error: last.and_then(Result::err),
                }),
            })
            .collect();

        for failure in &failing {
            tracing::error!(
                check = %failure.check,
                timeout = ?self.config.readiness_timeout,
                "Health check never passed"
            );
        }

        fleet.unwind(&self.listeners, self.config.drain_grace).await;
        self.settle(fleet, SupervisorState::Failed);
        SupervisorError::ReadinessTimeout {
            timeout: self.config.readiness_timeout,
            failing,
        }
    }

    async fn fail_runtime(&self, fleet: &mut Fleet, index: usize) -> SupervisorError {
        let listener = self.listeners[index].id();
        let cause = match fleet.take(index) {
            Some(Exit::Returned(Err(e))) => RuntimeCause::Error(e),
            Some(Exit::Panicked(message)) => RuntimeCause::Panicked(message),
            Some(Exit::Returned(Ok(()))) | None => RuntimeCause::ExitedCleanly,
        };
        tracing::error!(listener = %listener, state = %self.state(), cause = %cause, "Listener terminated unexpectedly");

        fleet.unwind(&self.listeners, self.config.drain_grace).await;
        self.settle(fleet, SupervisorState::Failed);
        SupervisorError::RuntimeFault { listener, cause }
    }

    /// Collect shutdown faults and enter the terminal state.
    fn settle(&self, fleet: &mut Fleet, terminal: SupervisorState) -> Vec<ShutdownFault> {
        let faults = fleet.faults(&self.listeners, self.config.drain_grace);
        for fault in &faults {
            tracing::warn!(error = %fault, "Listener did not shut down cleanly");
        }
        self.transition(terminal);
        faults
    }

    fn transition(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        metrics::record_state(next);
        tracing::debug!(from = %previous, to = %next, "Supervisor state changed");
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners: Vec<String> = self.listeners.iter().map(|l| l.id().to_string()).collect();
        f.debug_struct("Supervisor")
            .field("listeners", &listeners)
            .field("checks", &self.checks)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// How a listener task ended.
enum Exit {
    Returned(Result<(), ListenerError>),
    Panicked(String),
}

enum Slot {
    Running,
    Exited(Exit),
    /// Outcome already handed to the caller.
    Reported,
}

/// Listener tasks and what became of each of them.
struct Fleet {
    tasks: JoinSet<(usize, Exit)>,
    slots: Vec<Slot>,
}

impl Fleet {
    fn launch(listeners: &[Arc<dyn Listener>]) -> (Self, Vec<oneshot::Receiver<SocketAddr>>) {
        let mut tasks = JoinSet::new();
        let mut bound = Vec::with_capacity(listeners.len());

        for (index, listener) in listeners.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            let listener = Arc::clone(listener);
            tasks.spawn(async move {
                let exit = match AssertUnwindSafe(listener.start(tx)).catch_unwind().await {
                    Ok(result) => Exit::Returned(result),
                    Err(panic) => Exit::Panicked(panic_message(panic)),
                };
                (index, exit)
            });
            bound.push(rx);
        }

        let slots = listeners.iter().map(|_| Slot::Running).collect();
        (Self { tasks, slots }, bound)
    }

    /// Wait for the next listener task to finish; `None` once none are left.
    async fn next_exit(&mut self) -> Option<usize> {
        loop {
            match self.tasks.join_next().await? {
                Ok((index, exit)) => {
                    self.slots[index] = Slot::Exited(exit);
                    return Some(index);
                }
                Err(e) => tracing::warn!(error = %e, "Listener task cancelled"),
            }
        }
    }

    fn take(&mut self, index: usize) -> Option<Exit> {
        match mem::replace(&mut self.slots[index], Slot::Reported) {
            Slot::Exited(exit) => Some(exit),
            Slot::Running | Slot::Reported => None,
        }
    }

    /// Stop every listener, then wait up to `grace` for their tasks.
    async fn unwind(&mut self, listeners: &[Arc<dyn Listener>], grace: Duration) {
        for listener in listeners {
            listener.stop();
        }

        let deadline = Instant::now() + grace;
        while let Ok(Some(_)) = time::timeout_at(deadline, self.next_exit()).await {}

        // Whatever is still running after the grace period is abandoned.
        self.tasks.abort_all();
    }

    fn faults(&mut self, listeners: &[Arc<dyn Listener>], grace: Duration) -> Vec<ShutdownFault> {
        self.slots
            .iter_mut()
            .zip(listeners)
            .filter_map(|(slot, listener)| {
                let listener = listener.id();
                match mem::replace(slot, Slot::Reported) {
                    Slot::Running => Some(ShutdownFault::Unresponsive { listener, grace }),
                    Slot::Exited(Exit::Returned(Err(error))) => Some(ShutdownFault::Release { listener, error }),
                    Slot::Exited(Exit::Panicked(message)) => Some(ShutdownFault::Panicked { listener, message }),
                    Slot::Exited(Exit::Returned(Ok(()))) | Slot::Reported => None,
                }
            })
            .collect()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
