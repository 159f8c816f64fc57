//! Bridge core between the game event stream and the chat platform.
//!
//! ## Module Structure
//!
//! - `relay`: the `ChatPlatform` and `GameSink` capabilities
//! - `dispatcher`: serialized game → chat job queue
//! - `registry`: per-client identities and owned handles
//! - `geoip`: location correlation for connect greetings
//! - `inbound`: chat → game relay
//! - `sanitize`: escaping in both directions

pub mod dispatcher;
pub mod geoip;
pub mod inbound;
pub mod registry;
pub mod relay;
pub mod sanitize;

pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherOptions};
pub use inbound::InboundRelay;
pub use relay::{ChatPlatform, GameSink};
