//! # rtsp_endpoint — a two-role RTSP 1.0 session endpoint
//!
//! Speaks both sides of RTSP 1.0: a [`Server`] that streams registered
//! [`Mount`]s to clients, and a [`Client`] that pulls media from a remote
//! server or camera. Both roles share the same RTP/RTCP media plane, with
//! support for interleaved-TCP and UDP transport, H.264/AAC packetization,
//! and DTS/PTS reconciliation across the NTP↔RTP timebase gap.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet header format, SSRC generation, SR/RR exchange |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description generation/parsing |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | NAL unit packetization, FU-A fragmentation |
//! | [RFC 3640](https://tools.ietf.org/html/rfc3640) | AAC RTP payload | `hbr` mode AU-header batching |
//! | [RFC 2617](https://tools.ietf.org/html/rfc2617) | HTTP Digest auth | `WWW-Authenticate`/`Authorization` challenge-response |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Server / Client   — public API, roles    │
//! │  MountRegistry     — named stream endpoints│
//! ├──────────────────────────────────────────┤
//! │  Protocol          — RTSP parsing, SDP, digest│
//! │  Session           — state machine, transport│
//! │  Collaborators     — MediaSink trait (ANNOUNCE)│
//! ├──────────────────────────────────────────┤
//! │  Transport         — TCP control, UDP data │
//! │  Media             — RTP/RTCP, H.264/AAC codecs│
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use rtsp_endpoint::Server;
//!
//! let mut server = Server::new("0.0.0.0:8554");
//! server.start().unwrap();
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — High-level [`Server`] orchestrator and [`ServerConfig`].
//! - [`client`] — [`Client`] request/response engine for pulling media.
//! - [`mount`] — [`Mount`] (stream endpoint) and [`MountRegistry`].
//! - [`protocol`] — RTSP request/response parsing, method handling, SDP, digest auth.
//! - [`session`] — RTSP session state machine and transport negotiation.
//! - [`collaborators`] — [`MediaSink`] trait for `ANNOUNCE`/`RECORD`/segment listing.
//! - [`transport`] — TCP control-socket I/O, UDP RTP/RTCP port pairs.
//! - [`media`] — [`Packetizer`]/`FrameDecoder` traits, RTP/RTCP, H.264/AAC codecs.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod client;
pub mod collaborators;
pub mod error;
pub mod media;
pub mod mount;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use collaborators::{FrameSink, MediaSink, NullFrameSink, NullMediaSink, SinkError};
pub use error::{Result, RtspError};
pub use media::Packetizer;
pub use mount::{DEFAULT_MOUNT_PATH, Mount, MountRegistry};
pub use server::{Server, ServerConfig};
