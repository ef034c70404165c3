//! Source Adapters - Upstream Price Providers
//!
//! Concrete implementations of the `SourceAdapter` port:
//! - Terminal: proprietary terminal gateway over local TCP
//! - Socket: streaming WebSocket tick server
//! - Simulated: random-walk generator, the guaranteed fallback

pub mod simulated;
pub mod socket;
pub mod terminal;

pub use simulated::{SimulatedConfig, SimulatedFeed};
pub use socket::{SocketConfig, SocketFeed};
pub use terminal::{TerminalConfig, TerminalFeed};
