pub mod item;
pub mod params;
pub mod pricing;
pub mod state;

pub use item::*;
pub use params::*;
pub use pricing::*;
pub use state::*;
