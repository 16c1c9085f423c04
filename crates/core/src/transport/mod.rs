//! Network transport layer for RTSP signaling and RTP/RTCP media delivery.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling, and,
//!   once SETUP negotiates `RTP/AVP/TCP;interleaved=`, RTP/RTCP blocks
//!   multiplexed onto the same socket via `$`-framing (RFC 2326 §10.12).
//!   One TCP connection per client, with a thread per connection.
//!
//! - **UDP** ([`udp`]): carries RTP media packets when SETUP negotiates
//!   `RTP/AVP;unicast;client_port=`. Each channel gets its own bound
//!   even/odd port pair (RFC 3550 §11).

pub mod tcp;
pub mod udp;

pub use udp::{spawn_inbound, UdpPortPair};
