//! High-level RTSP server orchestrator (spec §4.1, §4.3, §9 "one task per connection").

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use rand::Rng;

use crate::collaborators::{MediaSink, NullMediaSink};
use crate::error::{Result, RtspError};
use crate::media::EncodedFrame;
use crate::mount::MountRegistry;
use crate::protocol::digest::Credentials;
use crate::session::channel::ChannelContent;
use crate::session::SessionManager;
use crate::transport::tcp;

/// Digest credentials this server demands of `DESCRIBE`/`ANNOUNCE` callers
/// (spec §4.3: "On auth failure respond 401").
#[derive(Debug, Clone)]
pub struct ServerAuthConfig {
    pub realm: String,
    pub credentials: Credentials,
}

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from request URI/client address.
    pub public_host: Option<String>,
    /// Public RTSP port for future URL-based headers (e.g. RTP-Info).
    pub public_port: Option<u16>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// When set, `DESCRIBE`/`ANNOUNCE` require a matching Digest `Authorization`.
    pub auth: Option<ServerAuthConfig>,
    /// Digest nonce issued in challenges, fixed for the server's lifetime.
    pub nonce: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            public_port: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Stream".to_string(),
            auth: None,
            nonce: generate_nonce(),
        }
    }
}

fn generate_nonce() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// High-level RTSP server orchestrator.
///
/// Owns the session registry, the mount table media is published through,
/// and the pluggable [`MediaSink`] recording collaborator. Delegates TCP
/// connection handling to [`transport::tcp`](crate::transport::tcp); each
/// connection runs its own thread with its own [`crate::protocol::MethodHandler`].
pub struct Server {
    session_manager: SessionManager,
    running: Arc<AtomicBool>,
    bind_addr: String,
    mounts: MountRegistry,
    sink: Arc<dyn MediaSink>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    /// Create a server with custom protocol/SDP configuration.
    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        Self {
            session_manager: SessionManager::new(),
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            mounts: MountRegistry::new(),
            sink: Arc::new(NullMediaSink),
            config: Arc::new(config),
        }
    }

    /// Replace the default no-op recording sink with a custom one (spec §6).
    pub fn with_sink(mut self, sink: Arc<dyn MediaSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let session_manager = self.session_manager.clone();
        let mounts = self.mounts.clone();
        let sink = self.sink.clone();
        let config = self.config.clone();

        tracing::info!(addr = %self.bind_addr, "RTSP server listening");

        thread::spawn(move || {
            tcp::accept_loop(listener, session_manager, mounts, sink, config, running);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }

    /// Returns the server's protocol configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    /// Packetize `frame` through `mount` and push it to every session
    /// subscribed to that mount.
    ///
    /// `Metadata`/`CodecConfig` frames are gated out entirely (spec §4.6
    /// outbound gating). Each subscribed session gets its own `first_dts`
    /// anchor: the shared packetizer's output is cloned and re-timestamped
    /// per session via [`rtp::rewrite_timestamp`](crate::media::rtp::rewrite_timestamp)
    /// rather than re-packetized, since the packetizer is shared across
    /// every session subscribed to the mount. On an H.264 keyframe, a
    /// `FlFD` RTCP APP packet carrying that session's anchored `first_dts`
    /// is sent alongside the RTP (spec §4.7).
    pub fn publish_frame(&self, mount_path: &str, frame: &EncodedFrame) -> Result<()> {
        use crate::media::FrameKind;

        if matches!(frame.kind, FrameKind::Metadata | FrameKind::CodecConfig) {
            return Ok(());
        }

        let Some(mount) = self.mounts.get(mount_path) else {
            return Err(RtspError::MountNotFound(mount_path.to_string()));
        };

        let (content, scale, packets) = if frame.kind == FrameKind::Audio {
            (ChannelContent::Audio, 44.1, mount.packetize_audio(frame, 44.1))
        } else {
            (ChannelContent::Video, 90.0, mount.packetize_video(frame, 90.0))
        };

        if packets.is_empty() {
            return Ok(());
        }

        let channel_index = match content {
            ChannelContent::Video => 0,
            ChannelContent::Audio => 1,
        };
        let is_keyframe = content == ChannelContent::Video && crate::media::h264::is_keyframe(&frame.data);
        let ssrc = match content {
            ChannelContent::Video => mount.video_ssrc(),
            ChannelContent::Audio => mount.audio_ssrc(),
        };

        for session_id in mount.subscribed_session_ids() {
            let Some(session) = self.session_manager.get_session(&session_id) else { continue };
            if !session.is_playing() {
                continue;
            }
            let Some(channel) = session.channel(channel_index) else { continue };
            let client_addr = channel.transport().and_then(|t| t.client_addr());

            let first_dts = session.anchor_first_dts(frame.dts);
            let shifted_dts = frame.dts - first_dts;
            let rtp_timestamp = (shifted_dts as f64 * scale).round() as u32;

            for packet in &packets {
                let mut packet = packet.clone();
                crate::media::rtp::rewrite_timestamp(&mut packet, rtp_timestamp);
                match (channel.udp_pair(), client_addr) {
                    (Some(pair), Some(addr)) => {
                        let _ = pair.send_rtp_to(&packet, addr);
                    }
                    _ => {
                        let _ = channel.send_interleaved_rtp(&packet);
                    }
                }
            }

            if is_keyframe {
                if let Some(ssrc) = ssrc {
                    let app = crate::media::rtcp::build_first_dts_app(ssrc, first_dts);
                    match (channel.udp_pair(), client_addr) {
                        (Some(pair), Some(addr)) => {
                            let _ = pair.send_rtcp_to(&app, addr);
                        }
                        _ => {
                            let _ = channel.send_interleaved_rtcp(&app);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
