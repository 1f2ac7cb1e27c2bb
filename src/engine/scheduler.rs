//! Bid engine: owns the run state machine
//!
//! `BidEngine` is a clone-friendly handle. All mutable state lives in one
//! `Core` behind a std mutex that is never held across an `.await`.
//!
//! Every `start()`/`stop()` bumps the run generation. The run task re-checks
//! its generation after each suspension point, so a timer belonging to an
//! earlier run can never act on a later one even if its abort races.

use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::run::RunContext;
use crate::domain::{BidSettings, EngineState, TerminalReason};
use crate::driver::SharedDriver;
use crate::status::{Status, StatusReporter};

/// Read-only view of the engine, published on every change
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub generation: u64,
    pub state: EngineState,
    pub last_outcome: Option<TerminalReason>,
    pub working_prices: Vec<Decimal>,
}

pub(super) struct Core {
    pub(super) generation: u64,
    pub(super) state: EngineState,
    settings: Option<BidSettings>,
    last_outcome: Option<TerminalReason>,
    pub(super) working_prices: Vec<Decimal>,
    task: Option<JoinHandle<()>>,
}

impl Core {
    pub(super) fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            generation: self.generation,
            state: self.state,
            last_outcome: self.last_outcome,
            working_prices: self.working_prices.clone(),
        }
    }
}

pub(super) struct Inner {
    core: Mutex<Core>,
    pub(super) driver: SharedDriver,
    pub(super) clock: Arc<dyn Clock>,
    reporter: Arc<dyn StatusReporter>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
}

/// Handle to the bid scheduler / retry engine
#[derive(Clone)]
pub struct BidEngine {
    pub(super) inner: Arc<Inner>,
}

impl BidEngine {
    pub fn new(
        driver: SharedDriver,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        let core = Core {
            generation: 0,
            state: EngineState::Idle,
            settings: None,
            last_outcome: None,
            working_prices: Vec::new(),
            task: None,
        };
        let (snapshot_tx, _) = watch::channel(core.snapshot());

        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(core),
                driver,
                clock,
                reporter,
                snapshot_tx,
            }),
        }
    }

    pub(super) fn lock_core(&self) -> MutexGuard<'_, Core> {
        // Core fields are always written whole, so a poisoned lock is still consistent
        self.inner
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn publish(&self, snapshot: EngineSnapshot) {
        self.inner.snapshot_tx.send_replace(snapshot);
    }

    pub(super) fn report(&self, status: Status) {
        self.inner.reporter.report(status);
    }

    /// Current engine view
    pub fn snapshot(&self) -> EngineSnapshot {
        self.lock_core().snapshot()
    }

    pub fn state(&self) -> EngineState {
        self.lock_core().state
    }

    /// Watch engine changes
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Stored parameters, if any
    pub fn settings(&self) -> Option<BidSettings> {
        self.lock_core().settings.clone()
    }

    /// Replace the stored parameters wholesale. A run in progress keeps its own copy.
    pub fn configure(&self, settings: BidSettings) {
        debug!(
            prices = ?settings.item.prices,
            floors = ?settings.item.min_prices,
            "settings stored"
        );
        self.lock_core().settings = Some(settings);
    }

    /// Store parameters and preview their prices on the page without arming.
    ///
    /// Returns the driver's acknowledgement.
    pub async fn apply(&self, settings: BidSettings) -> bool {
        let prices = settings.item.prices.clone();
        self.configure(settings);

        let result = {
            let mut driver = self.inner.driver.lock().await;
            driver.set_prices(&prices).await
        };

        let accepted = match result {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Price preview failed: {}", e);
                false
            }
        };

        if accepted {
            info!(?prices, "Settings applied to page");
            self.report(Status::PricesApplied);
        } else {
            warn!(?prices, "Page refused preview prices");
            self.report(Status::PriceApplyFailed);
        }
        accepted
    }

    /// Arm a new run with the stored parameters.
    ///
    /// Any previous run is stopped first. Returns the new run's generation, or
    /// the reason the start was refused (the engine state is left untouched then).
    pub async fn start(&self) -> Result<u64, TerminalReason> {
        let settings = match self.settings() {
            Some(settings) if !settings.is_empty() => settings,
            _ => {
                warn!("Cannot start: settings not received from panel");
                return Err(self.reject(TerminalReason::NoSettings));
            }
        };

        if let Err(e) = settings.validate() {
            warn!("Cannot start: {}", e);
            return Err(self.reject(TerminalReason::InvalidSettings));
        }

        let located = {
            let mut driver = self.inner.driver.lock().await;
            driver.locate_submit().await
        };
        match located {
            Ok(true) => {}
            Ok(false) => {
                warn!("Cannot start: submit button not found");
                return Err(self.reject(TerminalReason::PageElementMissing));
            }
            Err(e) => {
                warn!("Cannot start: submit lookup failed: {}", e);
                return Err(self.reject(TerminalReason::PageElementMissing));
            }
        }

        self.stop();

        let (generation, snapshot) = {
            let mut core = self.lock_core();
            core.generation += 1;
            core.state = EngineState::Armed;
            core.last_outcome = None;
            core.working_prices = settings.item.prices.clone();
            (core.generation, core.snapshot())
        };

        info!(generation, prices = ?snapshot.working_prices, "Run armed");
        self.publish(snapshot);
        self.report(Status::Engine(EngineState::Armed));

        let task = tokio::spawn(RunContext::new(self.clone(), generation).execute(settings));
        let mut core = self.lock_core();
        if core.generation == generation {
            core.task = Some(task);
        } else {
            task.abort();
        }
        Ok(generation)
    }

    /// Cancel every pending timer and return to `Idle`. Safe from any state.
    pub fn stop(&self) {
        let (task, snapshot) = {
            let mut core = self.lock_core();
            core.generation += 1;
            core.state = EngineState::Idle;
            (core.task.take(), core.snapshot())
        };

        if let Some(task) = task {
            task.abort();
        }

        debug!(generation = snapshot.generation, "All timers stopped");
        self.publish(snapshot);
        self.report(Status::Engine(EngineState::Idle));
    }

    fn reject(&self, reason: TerminalReason) -> TerminalReason {
        let snapshot = {
            let mut core = self.lock_core();
            core.last_outcome = Some(reason);
            core.snapshot()
        };
        self.publish(snapshot);
        self.report(Status::Rejected(reason));
        reason
    }

    /// Record a run's terminal outcome, then settle back to `Idle`.
    ///
    /// Ignored if the run has already been superseded.
    pub(super) fn finish(&self, generation: u64, reason: TerminalReason) {
        let snapshot = {
            let mut core = self.lock_core();
            if core.generation != generation {
                return;
            }
            core.state = EngineState::Terminated(reason);
            core.last_outcome = Some(reason);
            core.snapshot()
        };

        info!(generation, %reason, prices = ?snapshot.working_prices, "Run finished");
        self.publish(snapshot);
        self.report(Status::Engine(EngineState::Terminated(reason)));

        let snapshot = {
            let mut core = self.lock_core();
            if core.generation != generation {
                return;
            }
            core.generation += 1;
            core.state = EngineState::Idle;
            // The finishing task is the current one; dropping its handle detaches it
            core.task.take();
            core.snapshot()
        };
        self.publish(snapshot);
        self.report(Status::Engine(EngineState::Idle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GlobalParameters, ItemParameters};
    use crate::driver::{shared, DriverCall, PaperConfig, PaperDriver};
    use crate::engine::AnchoredClock;
    use crate::status::RecordingReporter;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn engine_with(config: PaperConfig) -> (BidEngine, crate::driver::PaperPage, Arc<RecordingReporter>) {
        let driver = PaperDriver::new(config);
        let page = driver.page();
        let reporter = Arc::new(RecordingReporter::new());
        let clock = AnchoredClock::new(
            NaiveDate::from_ymd_opt(2026, 10, 19)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        );
        let engine = BidEngine::new(shared(driver), Arc::new(clock), reporter.clone());
        (engine, page, reporter)
    }

    fn settings(target_hour: u32) -> BidSettings {
        BidSettings::new(
            GlobalParameters {
                target_hour,
                target_minute: 0,
                target_second: 0,
                decrement_step: dec!(0.50),
                poll_interval_ms: 500,
                result_timeout_ms: 1500,
                resubmit_delay_ms: 500,
            },
            ItemParameters {
                min_prices: vec![dec!(4.00)],
                prices: vec![dec!(5.00)],
                auto_decrement: true,
                start_delay_ms: 0,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_settings_is_rejected() {
        let (engine, page, reporter) = engine_with(PaperConfig::default());

        assert_eq!(engine.start().await, Err(TerminalReason::NoSettings));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.snapshot().last_outcome, Some(TerminalReason::NoSettings));
        assert_eq!(reporter.last(), Some(Status::Rejected(TerminalReason::NoSettings)));
        assert!(page.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_missing_submit_is_rejected() {
        let (engine, page, _) = engine_with(PaperConfig {
            submit_present: false,
            ..PaperConfig::default()
        });
        engine.configure(settings(13));

        assert_eq!(engine.start().await, Err(TerminalReason::PageElementMissing));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(page.calls(), vec![DriverCall::LocateSubmit]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_misaligned_floors_rejected() {
        let (engine, _, _) = engine_with(PaperConfig::default());
        let mut bad = settings(13);
        bad.item.min_prices.push(dec!(1));
        engine.configure(bad);

        assert_eq!(engine.start().await, Err(TerminalReason::InvalidSettings));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_start_leaves_running_run_alone() {
        let (engine, page, _) = engine_with(PaperConfig::default());
        engine.configure(settings(13));
        let generation = engine.start().await.unwrap();

        page.set_submit_present(false);
        assert_eq!(engine.start().await, Err(TerminalReason::PageElementMissing));

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.generation, generation);
        assert!(snapshot.state.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_previews_prices_without_arming() {
        let (engine, page, reporter) = engine_with(PaperConfig::default());

        assert!(engine.apply(settings(13)).await);
        assert_eq!(page.fields()[0], dec!(5.00));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(reporter.last(), Some(Status::PricesApplied));
        assert!(engine.settings().is_some());

        tokio::time::sleep(Duration::from_secs(3600 * 2)).await;
        assert_eq!(page.submissions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_idle_is_harmless() {
        let (engine, _, reporter) = engine_with(PaperConfig::default());
        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(reporter.last(), Some(Status::Engine(EngineState::Idle)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_subscription_sees_arming() {
        let (engine, _, _) = engine_with(PaperConfig::default());
        let mut rx = engine.subscribe();
        engine.configure(settings(13));
        engine.start().await.unwrap();

        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.working_prices, vec![dec!(5.00)]);
        assert!(seen.state.is_active());
    }
}
