//! # LoRa Reliable Link Layer
//!
//! This crate implements a reliable point-to-point messaging protocol for
//! half-duplex LoRa radios: station addressing, acknowledged delivery with
//! retry, and duplicate suppression, plus a hop-by-hop store-and-forward
//! relay built on top.
//!
//! ## Overview
//!
//! A [`Station`] is one addressable endpoint (addresses 1-999; 0 is the
//! anonymous/broadcast address). Every addressed frame carries a fixed
//! 11-byte ASCII header with origin, destination, and a 1-99 sequence id:
//!
//! ```text
//! OOO-DDD-SS|application bytes...
//! ```
//!
//! Reliable sends retransmit with randomized jitter until the peer's `ACK`
//! reply arrives; receivers acknowledge addressed data automatically and use
//! a 10-slot circular history to suppress duplicate deliveries caused by
//! retransmission on the shared channel.
//!
//! The radio itself stays behind the [`RadioTransport`] trait and time
//! behind [`Clock`], so the whole protocol runs against real vendor glue or
//! against the deterministic in-process channel in [`simulation`].
//!
//! ## Example
//!
//! ```rust
//! use loralink_core::prelude::*;
//! use loralink_core::simulation::{SimChannel, SimClock};
//!
//! let clock = SimClock::new();
//! let channel = SimChannel::new();
//!
//! let mut sender = Station::with_config(
//!     channel.endpoint(),
//!     clock.clone(),
//!     LinkConfig { seed: Some(1), ..Default::default() },
//! );
//! let mut receiver = Station::with_config(
//!     channel.endpoint(),
//!     clock.clone(),
//!     LinkConfig { seed: Some(2), ..Default::default() },
//! );
//!
//! sender.begin(5).unwrap();
//! receiver.begin(7).unwrap();
//! receiver.set_on_receive(|packet| {
//!     println!("got {:?}", String::from_utf8_lossy(&packet.data));
//! });
//!
//! receiver.listen_to_packet(0).unwrap();
//! sender.send_reliable_packet(b"hello", 7).unwrap();
//!
//! while sender.is_busy() || receiver.is_busy() {
//!     clock.advance(10);
//!     sender.process();
//!     receiver.process();
//! }
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod header;
pub mod relay;
pub mod simulation;
pub mod station;
pub mod transport;

// Re-export main types
pub use config::LinkConfig;
pub use dedup::DuplicateDetector;
pub use error::{LinkError, LinkResult};
pub use header::{PacketHeader, BROADCAST, HEADER_SIZE, MAX_ADDRESS, MAX_SEQUENCE};
pub use relay::{Relay, RelayConfig, RelayRecord};
pub use station::{LinkState, LinkStats, ReceivedPacket, Station, ACK_PAYLOAD};
pub use transport::{Clock, RadioEvent, RadioTransport, SystemClock};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::LinkConfig;
    pub use crate::error::{LinkError, LinkResult};
    pub use crate::header::PacketHeader;
    pub use crate::station::{LinkState, ReceivedPacket, Station};
    pub use crate::transport::{Clock, RadioEvent, RadioTransport};
}
