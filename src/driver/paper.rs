//! Simulated page for dry runs
//!
//! Keeps the page model behind a shared handle so the outside world can watch
//! (and change) what the engine does to it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::{PageDriver, SubmitOutcome};
use crate::domain::{round2, ItemIdentity};
use crate::error::{AutobidError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub item_id: String,
    pub image_ref: String,
    /// Number of visible price fields on the page
    pub field_count: usize,
    /// Whether the submit control exists
    pub submit_present: bool,
    /// 1-based submission that gets confirmed; `None` never confirms
    pub succeed_on_attempt: Option<u32>,
    /// Refuse every price write
    pub reject_prices: bool,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            item_id: "1005000000000000".to_string(),
            image_ref: "https://example.invalid/item.jpg".to_string(),
            field_count: 4,
            submit_present: true,
            succeed_on_attempt: None,
            reject_prices: false,
        }
    }
}

/// One driver call as seen by the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Identify,
    LocateSubmit,
    SetPrices(Vec<Decimal>),
    Submit,
    CheckOutcome,
}

/// Most recent driver calls kept for inspection
pub const CALL_LOG_CAPACITY: usize = 1024;

#[derive(Debug)]
struct PageState {
    config: PaperConfig,
    fields: Vec<Decimal>,
    submissions: u32,
    dialog_open: bool,
    calls: VecDeque<DriverCall>,
}

impl PageState {
    fn record(&mut self, call: DriverCall) {
        if self.calls.len() == CALL_LOG_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

/// Clonable view of the simulated page
#[derive(Debug, Clone)]
pub struct PaperPage {
    state: Arc<Mutex<PageState>>,
}

impl PaperPage {
    pub fn new(config: PaperConfig) -> Self {
        let fields = vec![Decimal::ZERO; config.field_count];
        Self {
            state: Arc::new(Mutex::new(PageState {
                config,
                fields,
                submissions: 0,
                dialog_open: false,
                calls: VecDeque::with_capacity(CALL_LOG_CAPACITY),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PageState>> {
        self.state
            .lock()
            .map_err(|_| AutobidError::Driver("paper page lock poisoned".into()))
    }

    /// Current field values
    pub fn fields(&self) -> Vec<Decimal> {
        self.lock().map(|s| s.fields.clone()).unwrap_or_default()
    }

    pub fn submissions(&self) -> u32 {
        self.lock().map(|s| s.submissions).unwrap_or_default()
    }

    /// Recorded calls, oldest first; only the last [`CALL_LOG_CAPACITY`] are kept
    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock()
            .map(|s| s.calls.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every price vector the engine wrote, in order
    pub fn price_writes(&self) -> Vec<Vec<Decimal>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::SetPrices(prices) => Some(prices),
                _ => None,
            })
            .collect()
    }

    pub fn set_submit_present(&self, present: bool) {
        if let Ok(mut s) = self.lock() {
            s.config.submit_present = present;
        }
    }
}

/// [`PageDriver`] over a [`PaperPage`]
#[derive(Debug, Clone)]
pub struct PaperDriver {
    page: PaperPage,
}

impl PaperDriver {
    pub fn new(config: PaperConfig) -> Self {
        Self {
            page: PaperPage::new(config),
        }
    }

    pub fn page(&self) -> PaperPage {
        self.page.clone()
    }
}

#[async_trait]
impl PageDriver for PaperDriver {
    async fn identify_item(&mut self) -> Result<Option<ItemIdentity>> {
        let mut s = self.page.lock()?;
        s.record(DriverCall::Identify);
        if s.config.item_id.is_empty() || s.config.image_ref.is_empty() {
            return Ok(None);
        }
        Ok(Some(ItemIdentity::new(
            s.config.item_id.clone(),
            s.config.image_ref.clone(),
        )))
    }

    async fn locate_submit(&mut self) -> Result<bool> {
        let mut s = self.page.lock()?;
        s.record(DriverCall::LocateSubmit);
        Ok(s.config.submit_present)
    }

    async fn set_prices(&mut self, prices: &[Decimal]) -> Result<bool> {
        let mut s = self.page.lock()?;
        s.record(DriverCall::SetPrices(prices.to_vec()));

        if prices.is_empty() || s.config.reject_prices || prices.len() > s.fields.len() {
            debug!(
                requested = prices.len(),
                fields = s.fields.len(),
                "paper page refused price write"
            );
            return Ok(false);
        }

        for (field, price) in s.fields.iter_mut().zip(prices) {
            *field = round2(*price);
        }
        info!(?prices, "paper page prices written");
        Ok(true)
    }

    async fn submit(&mut self) -> Result<()> {
        let mut s = self.page.lock()?;
        s.record(DriverCall::Submit);
        if !s.config.submit_present {
            return Err(AutobidError::Driver("submit control not found".into()));
        }
        s.submissions += 1;
        s.dialog_open = s.config.succeed_on_attempt == Some(s.submissions);
        info!(attempt = s.submissions, fields = ?s.fields, "paper page submitted");
        Ok(())
    }

    async fn check_outcome(&mut self) -> Result<SubmitOutcome> {
        let mut s = self.page.lock()?;
        s.record(DriverCall::CheckOutcome);
        Ok(SubmitOutcome {
            succeeded: s.dialog_open,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_set_prices_requires_every_field() {
        let mut driver = PaperDriver::new(PaperConfig {
            field_count: 2,
            ..PaperConfig::default()
        });

        assert!(driver.set_prices(&[dec!(1.005), dec!(2)]).await.unwrap());
        assert_eq!(driver.page().fields(), vec![dec!(1.01), dec!(2.00)]);

        assert!(!driver.set_prices(&[dec!(1), dec!(2), dec!(3)]).await.unwrap());
        assert!(!driver.set_prices(&[]).await.unwrap());
        assert_eq!(driver.page().price_writes().len(), 3);
    }

    #[tokio::test]
    async fn test_confirmation_on_configured_attempt() {
        let mut driver = PaperDriver::new(PaperConfig {
            succeed_on_attempt: Some(2),
            ..PaperConfig::default()
        });

        driver.submit().await.unwrap();
        assert!(!driver.check_outcome().await.unwrap().succeeded);
        driver.submit().await.unwrap();
        assert!(driver.check_outcome().await.unwrap().succeeded);
        assert_eq!(driver.page().submissions(), 2);
    }

    #[tokio::test]
    async fn test_call_log_is_bounded() {
        let mut driver = PaperDriver::new(PaperConfig::default());
        for _ in 0..CALL_LOG_CAPACITY {
            driver.submit().await.unwrap();
        }
        driver.check_outcome().await.unwrap();

        let calls = driver.page().calls();
        assert_eq!(calls.len(), CALL_LOG_CAPACITY);
        assert_eq!(calls.last(), Some(&DriverCall::CheckOutcome));
        assert_eq!(driver.page().submissions(), CALL_LOG_CAPACITY as u32);
    }

    #[tokio::test]
    async fn test_identity_missing_until_rendered() {
        let mut driver = PaperDriver::new(PaperConfig {
            item_id: String::new(),
            ..PaperConfig::default()
        });
        assert_eq!(driver.identify_item().await.unwrap(), None);

        let mut driver = PaperDriver::new(PaperConfig::default());
        let identity = driver.identify_item().await.unwrap().unwrap();
        assert_eq!(identity.id, "1005000000000000");
    }
}
