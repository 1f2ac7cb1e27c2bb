pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod domain;
pub mod driver;
pub mod engine;
pub mod error;
pub mod session;
pub mod status;

pub use config::AppConfig;
pub use domain::{
    BidSettings, EngineState, GlobalParameters, ItemIdentity, ItemParameters, TerminalReason,
};
pub use driver::{PageDriver, SharedDriver, SubmitOutcome};
pub use engine::{BidEngine, EngineSnapshot};
pub use error::{AutobidError, Result};
pub use session::{ControlSession, LinkState, SessionHandle};
pub use status::{LogReporter, Status, StatusReporter};
