//! Page driver capability surface
//!
//! The engine never touches the page directly; everything goes through
//! [`PageDriver`]. Two implementations ship with the agent:
//! - [`PaperDriver`]: an in-memory simulated page for dry runs and tests
//! - [`CdpDriver`]: drives a live browser tab over the DevTools protocol

pub mod cdp;
pub mod paper;

pub use cdp::{CdpConfig, CdpDriver, PageSelectors};
pub use paper::{DriverCall, PaperConfig, PaperDriver, PaperPage};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::ItemIdentity;
use crate::error::Result;

/// Whether a submission was confirmed by the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub succeeded: bool,
}

impl SubmitOutcome {
    pub fn succeeded() -> Self {
        Self { succeeded: true }
    }

    pub fn failed() -> Self {
        Self { succeeded: false }
    }
}

/// Operations the engine needs from the page.
///
/// Calls may be slow; callers never issue a second call while one is pending.
#[async_trait]
pub trait PageDriver: Send {
    /// Read the listing identity, `None` while the page has not rendered it yet
    async fn identify_item(&mut self) -> Result<Option<ItemIdentity>>;

    /// Whether the submit control is present
    async fn locate_submit(&mut self) -> Result<bool>;

    /// Write one price per field, in field order. `true` only if every field accepted its value.
    async fn set_prices(&mut self, prices: &[Decimal]) -> Result<bool>;

    /// Click submit
    async fn submit(&mut self) -> Result<()>;

    /// Inspect the page for the submission confirmation
    async fn check_outcome(&mut self) -> Result<SubmitOutcome>;
}

/// Driver handle shared by the engine's run task and settings previews
pub type SharedDriver = Arc<Mutex<dyn PageDriver>>;

pub fn shared<D: PageDriver + 'static>(driver: D) -> SharedDriver {
    Arc::new(Mutex::new(driver))
}
