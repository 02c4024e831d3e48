//! Real-time fan-out for ride and group channels.
//!
//! Membership and live vehicle positions are process-local and never persisted.

pub mod hub;
pub mod location;
pub mod registry;

pub use hub::{CoordinationHub, HubConfig, HubError, HubStats};
pub use location::{LiveLocation, LocationCache};
pub use registry::{
    ChannelId, ChannelRegistry, ConnectionHandle, ConnectionId, DeliveryFailure, Frame, LocalChannelRegistry,
};
