//! Scheduler driving engine cycles.
//!
//! A single background task runs cycles strictly sequentially. Control
//! state travels on a watch channel so pause/resume/stop set from any
//! other task are observed promptly: every sleep races the channel, and
//! an in-flight cycle is raced too, which cancels any pending retry
//! backoff inside it instead of waiting it out.

use crate::broker::BrokerApi;
use crate::config::RunnerConfig;
use crate::engine::cycle::{EngineError, StrategyEngine};
use crate::market;
use chrono::{Local, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Scheduler lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Control surface handed to whoever supervises the scheduler.
#[derive(Clone)]
pub struct RunnerHandle {
    tx: watch::Sender<RunState>,
}

impl RunnerHandle {
    pub fn pause(&self) {
        self.set(RunState::Paused);
    }

    pub fn resume(&self) {
        self.set(RunState::Running);
    }

    pub fn stop(&self) {
        self.set(RunState::Stopped);
    }

    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    fn set(&self, state: RunState) {
        self.tx.send_if_modified(|current| {
            // Stopped is terminal: no transition revives the scheduler.
            if *current == RunState::Stopped || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

pub struct Runner<B: BrokerApi> {
    engine: StrategyEngine<B>,
    config: RunnerConfig,
    state: watch::Receiver<RunState>,
}

impl<B: BrokerApi> Runner<B> {
    pub fn new(engine: StrategyEngine<B>, config: RunnerConfig) -> (Self, RunnerHandle) {
        let (tx, rx) = watch::channel(RunState::Running);
        (
            Self {
                engine,
                config,
                state: rx,
            },
            RunnerHandle { tx },
        )
    }

    /// Loop until stopped. Cycle failures are logged and followed by a
    /// cool-down; an authentication failure stops the scheduler, since
    /// trading cannot proceed without a valid session.
    pub async fn run(mut self) {
        info!("scheduler started");
        loop {
            let current_state = *self.state.borrow();
            match current_state {
                RunState::Stopped => break,
                RunState::Paused => {
                    self.wait(Duration::from_secs(self.config.pause_poll_secs)).await;
                    continue;
                }
                RunState::Running => {}
            }

            let hours = market::active_markets(Local::now().naive_local());
            if !hours.any() {
                debug!("all markets closed, idling");
                self.wait(Duration::from_secs(self.config.idle_interval_secs)).await;
                continue;
            }

            let mut control = self.state.clone();
            tokio::select! {
                _ = control.changed() => continue,
                result = self.engine.run_cycle(Utc::now(), Local::now().naive_local()) => {
                    match result {
                        Ok(report) => {
                            info!(
                                exits = report.exits,
                                entries = report.entries,
                                candidates = report.candidates,
                                "cycle complete"
                            );
                        }
                        Err(EngineError::Auth(e)) => {
                            error!(error = %e, "authentication failed, stopping scheduler");
                            break;
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                cooldown_secs = self.config.error_cooldown_secs,
                                "cycle failed, cooling down"
                            );
                            self.wait(Duration::from_secs(self.config.error_cooldown_secs)).await;
                            continue;
                        }
                    }
                }
            }

            self.wait(Duration::from_secs(self.config.check_interval_secs)).await;
        }
        info!("scheduler stopped");
    }

    /// Sleep that wakes early on any control-state change.
    async fn wait(&mut self, duration: Duration) {
        let mut control = self.state.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = control.changed() => {}
        }
    }
}
