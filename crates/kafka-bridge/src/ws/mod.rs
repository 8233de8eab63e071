//! WebSocket side of the bridge.
//!
//! - `connection`: lifecycle state, close signal, single-flight guard, outbound queue
//! - `pump`: inbound and outbound loops per connection
//! - `hub`: registry task owning the set of live connections

pub mod connection;
pub mod hub;
pub mod pump;

pub use connection::{
    payload_frame, ConnectionHandle, ConnectionState, InFlightGuard, OutboundQueue, SingleFlight,
};
pub use hub::{Hub, HubHandle};
pub use pump::{process_frame, DuplexPump};
