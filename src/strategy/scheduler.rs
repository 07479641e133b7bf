//! Cooperative poll loop around the controller.
//!
//! One iteration reads price, checks drift, optionally rebalances and reports,
//! then sleeps. Only the sleep reacts to shutdown, so a rebalance in progress
//! always runs to its resting state.

use crate::config::Config;
use crate::error::HedgeError;
use crate::position::{Position, PositionStatus};
use crate::strategy::controller::RebalanceController;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timing and behavior switches for the loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub check_interval: Duration,
    /// First delay after an oracle failure; doubles per consecutive failure
    pub oracle_backoff: Duration,
    pub max_oracle_backoff: Duration,
    pub send_reports: bool,
    /// Redeploy a `Faulted` position whose legs are confirmed closed
    pub auto_recover_idle: bool,
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: config.strategy.check_interval(),
            oracle_backoff: Duration::from_secs(config.execution.oracle_backoff_secs),
            max_oracle_backoff: Duration::from_secs(config.execution.max_oracle_backoff_secs),
            send_reports: config.strategy.send_reports,
            auto_recover_idle: config.strategy.auto_recover_idle,
        }
    }
}

/// What a single iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Both legs opened
    Initialized,
    /// Active and inside the thresholds
    Held,
    /// Drift detected and both legs recreated
    Rebalanced,
    /// The position is (or just became) `Faulted`
    Faulted,
    /// No price; nothing was touched
    OracleUnavailable,
    /// A non-submission error prevented any action
    Skipped,
}

pub struct SchedulerLoop {
    controller: Arc<RebalanceController>,
    config: SchedulerConfig,
    position: Position,
    oracle_failures: u32,
}

impl SchedulerLoop {
    pub fn new(
        controller: Arc<RebalanceController>,
        config: SchedulerConfig,
        position: Position,
    ) -> Self {
        Self {
            controller,
            config,
            position,
            oracle_failures: 0,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Run one evaluation of the position.
    pub async fn run_iteration(&mut self) -> IterationOutcome {
        if self.config.auto_recover_idle && self.position.is_idle_fault() {
            info!("Recovering idle faulted position");
            match self.controller.recover(self.position.clone(), false).await {
                Ok(position) => self.position = position,
                Err(e) => warn!(error = %e, "Automatic recovery refused"),
            }
        }

        let outcome = match self.position.status {
            PositionStatus::Uninitialized => self.initialize().await,
            PositionStatus::Active => self.evaluate().await,
            PositionStatus::Rebalancing => {
                self.position = self
                    .controller
                    .reconcile_on_startup(self.position.clone())
                    .await;
                IterationOutcome::Faulted
            }
            PositionStatus::Faulted => {
                debug!("Position faulted; waiting for operator recovery");
                IterationOutcome::Faulted
            }
        };

        if outcome == IterationOutcome::OracleUnavailable {
            self.oracle_failures = self.oracle_failures.saturating_add(1);
        } else {
            self.oracle_failures = 0;
            if self.config.send_reports {
                self.report().await;
            }
        }

        outcome
    }

    async fn initialize(&mut self) -> IterationOutcome {
        match self
            .controller
            .initialize_position(self.position.clone())
            .await
        {
            Ok(position) => {
                let outcome = if position.is_active() {
                    IterationOutcome::Initialized
                } else {
                    IterationOutcome::Faulted
                };
                self.position = position;
                outcome
            }
            Err(HedgeError::Oracle(e)) => {
                warn!(error = %e, "Price unavailable; initialization deferred");
                IterationOutcome::OracleUnavailable
            }
            Err(e) => {
                error!(error = %e, "Initialization skipped");
                IterationOutcome::Skipped
            }
        }
    }

    async fn evaluate(&mut self) -> IterationOutcome {
        let price = match self.controller.current_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!(error = %e, "Price unavailable; skipping iteration");
                return IterationOutcome::OracleUnavailable;
            }
        };

        if !self.controller.check_drift_condition(&self.position, price) {
            return IterationOutcome::Held;
        }

        info!(
            %price,
            lower = %self.position.lower_price,
            upper = %self.position.upper_price,
            "Drift detected; rebalancing"
        );

        match self.controller.rebalance(self.position.clone()).await {
            Ok(position) => {
                let outcome = if position.is_active() {
                    IterationOutcome::Rebalanced
                } else {
                    IterationOutcome::Faulted
                };
                self.position = position;
                outcome
            }
            Err(e) => {
                warn!(error = %e, "Rebalance not started");
                IterationOutcome::Skipped
            }
        }
    }

    async fn report(&self) {
        match self.controller.generate_report(&self.position).await {
            Ok(report) => {
                info!(
                    status = %report.status,
                    price = %report.price,
                    deviation = %report.deviation,
                    hedge_size = %report.hedge_size,
                    net_delta = %report.net_delta,
                    "Status report"
                );
                self.controller.send_report(&report).await;
            }
            Err(e) => warn!(error = %e, "Report skipped"),
        }
    }

    /// Sleep before the next iteration.
    pub fn next_delay(&self, outcome: IterationOutcome) -> Duration {
        if outcome != IterationOutcome::OracleUnavailable {
            return self.config.check_interval;
        }

        let exponent = self.oracle_failures.saturating_sub(1).min(16);
        self.config
            .oracle_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_oracle_backoff)
    }

    /// Poll until `shutdown` flips to true, then return the last position.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Position {
        info!(
            interval = ?self.config.check_interval,
            status = %self.position.status,
            "Scheduler started"
        );

        while !*shutdown.borrow() {
            let outcome = self.run_iteration().await;
            let delay = self.next_delay(outcome);
            debug!(?outcome, ?delay, "Iteration complete");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(status = %self.position.status, "Scheduler stopped");
        self.position
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
///
/// Falls back to SIGINT alone if the SIGTERM handler cannot be installed.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received (SIGINT)");
                    }
                    _ = sigterm.recv() => {
                        info!("Shutdown signal received (SIGTERM)");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, listening for SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received (SIGINT)");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received (SIGINT)");
    }
}

/// Flip `shutdown` to true once `signal` resolves.
///
/// The loop only observes the flag between iterations, so an in-flight
/// rebalance reaches its resting state before `run` returns.
pub fn forward_shutdown<F>(signal: F, shutdown: watch::Sender<bool>) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        info!("🛑 Finishing current iteration before shutdown");
        let _ = shutdown.send(true);
    })
}
