//! Bid parameters pushed by the controller
//!
//! Field names follow the controller's wire format; the descriptive names are
//! accepted as aliases. Durations travel as integer milliseconds.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AutobidError, Result};

/// Parameters shared by every agent the controller drives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalParameters {
    pub target_hour: u32,
    pub target_minute: u32,
    pub target_second: u32,
    /// Amount subtracted from every item price per resubmission round
    #[serde(rename = "decrementValue", alias = "decrementStep")]
    pub decrement_step: Decimal,
    /// Wall-clock poll interval while waiting for the target time (ms)
    #[serde(rename = "checkDelay", alias = "pollInterval")]
    pub poll_interval_ms: u64,
    /// Delay between clicking submit and checking the outcome (ms)
    #[serde(rename = "resultCheckDelay", alias = "resultTimeout")]
    pub result_timeout_ms: u64,
    /// Delay between a successful price write and the next submission (ms)
    #[serde(rename = "resubmitDelay")]
    pub resubmit_delay_ms: u64,
}

impl GlobalParameters {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_millis(self.result_timeout_ms)
    }

    pub fn resubmit_delay(&self) -> Duration {
        Duration::from_millis(self.resubmit_delay_ms)
    }

    pub fn target_time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.target_hour, self.target_minute, self.target_second)
    }

    /// Target instant on the given calendar day. No rollover to the next day.
    pub fn target_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        self.target_time().map(|t| date.and_time(t))
    }
}

/// Parameters specific to this agent's listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemParameters {
    /// Per-item floors, positionally aligned with `prices`
    #[serde(rename = "minValues", alias = "minPrices")]
    pub min_prices: Vec<Decimal>,
    #[serde(rename = "skuPrices", alias = "prices")]
    pub prices: Vec<Decimal>,
    #[serde(rename = "autoDecrement", alias = "autoDecrementEnabled")]
    pub auto_decrement: bool,
    /// Start jitter chosen by the controller (ms); absent on previews
    #[serde(rename = "randomDelay", alias = "startDelay", default)]
    pub start_delay_ms: u64,
}

impl ItemParameters {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

/// Complete parameter set; always replaced wholesale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidSettings {
    #[serde(rename = "globalParams")]
    pub global: GlobalParameters,
    #[serde(rename = "specificParams")]
    pub item: ItemParameters,
}

impl BidSettings {
    pub fn new(global: GlobalParameters, item: ItemParameters) -> Self {
        Self { global, item }
    }

    /// Nothing to bid with
    pub fn is_empty(&self) -> bool {
        self.item.prices.is_empty()
    }

    /// Check the invariants a run relies on.
    pub fn validate(&self) -> Result<()> {
        if self.item.min_prices.len() != self.item.prices.len() {
            return Err(AutobidError::InvalidSettings(format!(
                "{} floors for {} prices",
                self.item.min_prices.len(),
                self.item.prices.len()
            )));
        }

        if self.global.decrement_step.is_sign_negative() {
            return Err(AutobidError::InvalidSettings(format!(
                "negative decrement step {}",
                self.global.decrement_step
            )));
        }

        if self.global.target_time().is_none() {
            return Err(AutobidError::InvalidSettings(format!(
                "invalid target time {:02}:{:02}:{:02}",
                self.global.target_hour, self.global.target_minute, self.global.target_second
            )));
        }

        Ok(())
    }
}
