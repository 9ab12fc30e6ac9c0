//! Data models for Roomhop

mod participant;
mod relay;
mod room;
mod snapshot;

pub use participant::*;
pub use relay::*;
pub use room::*;
pub use snapshot::*;
