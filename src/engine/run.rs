//! One armed run: jitter → target wait → submit → outcome → decrement → resubmit
//!
//! The steps are a straight sequence of awaits. Each suspension point is
//! followed by a generation check; a mismatch unwinds the run silently.

use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::scheduler::BidEngine;
use crate::domain::{
    decrement_round, BidSettings, DecrementOutcome, EngineState, GlobalParameters, TerminalReason,
};
use crate::driver::SubmitOutcome;
use crate::status::Status;

/// Floor for the target-time poll so a zero interval cannot spin
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A newer `start()`/`stop()` has invalidated this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Superseded;

type Step<T> = Result<T, Superseded>;

pub(super) struct RunContext {
    engine: BidEngine,
    generation: u64,
}

impl RunContext {
    pub(super) fn new(engine: BidEngine, generation: u64) -> Self {
        Self { engine, generation }
    }

    pub(super) async fn execute(self, settings: BidSettings) {
        match self.drive(&settings).await {
            Ok(reason) => self.engine.finish(self.generation, reason),
            Err(Superseded) => debug!(generation = self.generation, "run superseded"),
        }
    }

    async fn drive(&self, settings: &BidSettings) -> Step<TerminalReason> {
        let global = &settings.global;
        let item = &settings.item;
        if global.target_time().is_none() {
            return Ok(TerminalReason::InvalidSettings);
        }

        debug!(delay_ms = item.start_delay_ms, "waiting out start jitter");
        sleep(item.start_delay()).await;
        self.transition(EngineState::WaitingForTarget)?;

        if !self.wait_for_target(global).await? {
            return Ok(TerminalReason::InvalidSettings);
        }
        info!(generation = self.generation, "Target time reached");

        let mut prices = item.prices.clone();
        loop {
            self.transition(EngineState::Submitting)?;
            let outcome = self.submit_and_check(global.result_timeout()).await?;

            if outcome.succeeded {
                return Ok(TerminalReason::Success);
            }
            if !item.auto_decrement {
                info!("Submission failed and auto-decrement is disabled");
                return Ok(TerminalReason::SubmitFailed);
            }

            self.transition(EngineState::Decrementing)?;
            let next = match decrement_round(&prices, &item.min_prices, global.decrement_step) {
                DecrementOutcome::Next(next) => next,
                DecrementOutcome::FloorBreached {
                    index,
                    attempted,
                    floor,
                } => {
                    info!(
                        item = index + 1,
                        %attempted,
                        %floor,
                        "Item reached its minimum value"
                    );
                    return Ok(TerminalReason::MinValueReached);
                }
            };

            self.commit_prices(&next)?;
            prices = next;
            info!(?prices, "Resubmitting with new prices");

            if !self.apply_prices(&prices).await? {
                warn!(?prices, "Failed to apply new prices during resubmission");
                return Ok(TerminalReason::ApplyFailed);
            }

            sleep(global.resubmit_delay()).await;
            self.ensure_current()?;
        }
    }

    /// Poll until local time reaches today's target. Inclusive; no rollover to tomorrow.
    ///
    /// `false` if the target time cannot be built.
    async fn wait_for_target(&self, global: &GlobalParameters) -> Step<bool> {
        let poll = global.poll_interval().max(MIN_POLL_INTERVAL);
        loop {
            self.ensure_current()?;
            let now = self.engine.inner.clock.now();
            let Some(target) = global.target_on(now.date()) else {
                return Ok(false);
            };
            if now >= target {
                return Ok(true);
            }
            sleep(poll).await;
        }
    }

    async fn submit_and_check(&self, result_timeout: Duration) -> Step<SubmitOutcome> {
        let submitted = {
            let mut driver = self.engine.inner.driver.lock().await;
            driver.submit().await
        };
        self.ensure_current()?;
        if let Err(e) = submitted {
            warn!("Submit click failed: {}", e);
        }

        sleep(result_timeout).await;
        self.ensure_current()?;

        let checked = {
            let mut driver = self.engine.inner.driver.lock().await;
            driver.check_outcome().await
        };
        self.ensure_current()?;

        Ok(checked.unwrap_or_else(|e| {
            warn!("Outcome check failed, treating as not confirmed: {}", e);
            SubmitOutcome::failed()
        }))
    }

    async fn apply_prices(&self, prices: &[Decimal]) -> Step<bool> {
        let result = {
            let mut driver = self.engine.inner.driver.lock().await;
            driver.set_prices(prices).await
        };
        self.ensure_current()?;

        Ok(result.unwrap_or_else(|e| {
            warn!("Price write failed: {}", e);
            false
        }))
    }

    fn ensure_current(&self) -> Step<()> {
        if self.engine.lock_core().generation == self.generation {
            Ok(())
        } else {
            Err(Superseded)
        }
    }

    fn transition(&self, to: EngineState) -> Step<()> {
        let (from, snapshot) = {
            let mut core = self.engine.lock_core();
            if core.generation != self.generation {
                return Err(Superseded);
            }
            let from = core.state;
            core.state = to;
            (from, core.snapshot())
        };

        if !from.can_transition_to(to) {
            warn!(%from, %to, "unexpected state transition");
        }
        debug!(generation = self.generation, %from, %to, "state transition");
        self.engine.publish(snapshot);
        self.engine.report(Status::Engine(to));
        Ok(())
    }

    fn commit_prices(&self, prices: &[Decimal]) -> Step<()> {
        let snapshot = {
            let mut core = self.engine.lock_core();
            if core.generation != self.generation {
                return Err(Superseded);
            }
            core.working_prices = prices.to_vec();
            core.snapshot()
        };
        self.engine.publish(snapshot);
        Ok(())
    }
}
