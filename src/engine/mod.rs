//! Bid Scheduler / Retry Engine
//!
//! Arms a timed submission, waits for the target wall-clock time, submits, and
//! on failure lowers every item price together and retries until success, a
//! floor breach, or `stop()`.

pub mod clock;
mod run;
pub mod scheduler;

pub use clock::{AnchoredClock, Clock, SystemClock};
pub use scheduler::{BidEngine, EngineSnapshot};
