//! Startup wiring: pick a page driver and wait for the listing identity

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DriverConfig, DriverMode};
use crate::domain::ItemIdentity;
use crate::driver::{shared, CdpDriver, PaperDriver, SharedDriver};
use crate::error::{AutobidError, Result};
use crate::status::{Status, StatusReporter};

/// Build the configured driver. `force_paper` overrides `driver.mode`.
pub async fn build_driver(config: &DriverConfig, force_paper: bool) -> Result<SharedDriver> {
    let mode = if force_paper {
        DriverMode::Paper
    } else {
        config.mode
    };

    match mode {
        DriverMode::Paper => {
            info!("Using simulated page (paper mode)");
            Ok(shared(PaperDriver::new(config.paper.clone())))
        }
        DriverMode::Cdp => {
            let driver = CdpDriver::connect(config.cdp.clone()).await?;
            info!("Attached to live page");
            Ok(shared(driver))
        }
    }
}

/// Poll the page until it exposes both the item id and image.
///
/// Lookup errors count as "not yet". Gives up after `max_attempts` lookups.
pub async fn discover_identity(
    driver: &SharedDriver,
    poll: Duration,
    max_attempts: u32,
    reporter: &dyn StatusReporter,
) -> Result<ItemIdentity> {
    reporter.report(Status::WaitingForInfo);

    for attempt in 1..=max_attempts.max(1) {
        let found = {
            let mut driver = driver.lock().await;
            driver.identify_item().await
        };

        match found {
            Ok(Some(identity)) => {
                info!(item = %identity, image = %identity.image_ref, "Item identified");
                return Ok(identity);
            }
            Ok(None) => debug!(attempt, "item info not rendered yet"),
            Err(e) => warn!(attempt, "Item lookup failed: {}", e),
        }

        if attempt < max_attempts {
            tokio::time::sleep(poll).await;
        }
    }

    reporter.report(Status::PageInfoFailed);
    Err(AutobidError::PageInfo(format!(
        "item id or image not found after {} attempts",
        max_attempts
    )))
}
