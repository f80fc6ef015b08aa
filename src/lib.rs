//! Engine for inspecting captured game-relay packet sessions: protocol
//! identification, filtering, structural diffing, and the interaction
//! state that drives the terminal viewer.

pub mod config;
pub mod diff;
pub mod filter;
pub mod model;
pub mod protocol;
pub mod state;
pub mod store;

pub use model::{Direction, PacketRecord, SessionSummary, Value};
