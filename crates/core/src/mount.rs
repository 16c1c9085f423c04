use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::media::{EncodedFrame, Packetizer};

pub const DEFAULT_MOUNT_PATH: &str = "/stream";

/// A snapshot of one track's codec metadata, used by the SDP encoder.
pub struct TrackDescription {
    pub payload_type: u8,
    pub sdp_attributes: Vec<String>,
}

/// A named stream endpoint (e.g. `/stream`, `/camera1`).
///
/// Owns up to two tracks — channel 0 (video) and channel 1 (audio), per the
/// fixed two-element channel model — and tracks which sessions are
/// subscribed. A mount with only a video packetizer is a valid,
/// video-only stream.
pub struct Mount {
    path: String,
    video: Option<Mutex<Box<dyn Packetizer>>>,
    audio: Option<Mutex<Box<dyn Packetizer>>>,
    session_ids: RwLock<Vec<String>>,
}

impl Mount {
    /// Create a mount with a video track only.
    pub fn new(path: &str, video_packetizer: Box<dyn Packetizer>) -> Self {
        Self {
            path: path.to_string(),
            video: Some(Mutex::new(video_packetizer)),
            audio: None,
            session_ids: RwLock::new(Vec::new()),
        }
    }

    /// Attach an audio track (channel 1) to this mount.
    pub fn with_audio(mut self, audio_packetizer: Box<dyn Packetizer>) -> Self {
        self.audio = Some(Mutex::new(audio_packetizer));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Packetize a video frame through channel 0's packetizer.
    pub fn packetize_video(&self, frame: &EncodedFrame, scale: f64) -> Vec<Vec<u8>> {
        match &self.video {
            Some(p) => p.lock().packetize(frame, scale),
            None => Vec::new(),
        }
    }

    /// Packetize an audio frame through channel 1's packetizer, if present.
    pub fn packetize_audio(&self, frame: &EncodedFrame, scale: f64) -> Vec<Vec<u8>> {
        match &self.audio {
            Some(p) => p.lock().packetize(frame, scale),
            None => Vec::new(),
        }
    }

    /// Video track's RTP payload type, for SETUP/Transport bookkeeping.
    pub fn video_payload_type(&self) -> Option<u8> {
        self.video.as_ref().map(|p| p.lock().payload_type())
    }

    /// Audio track's RTP payload type, if present.
    pub fn audio_payload_type(&self) -> Option<u8> {
        self.audio.as_ref().map(|p| p.lock().payload_type())
    }

    /// Video track's SSRC, for tagging sideband RTCP (e.g. `FlFD`) to the
    /// same source as the RTP stream.
    pub fn video_ssrc(&self) -> Option<u32> {
        self.video.as_ref().map(|p| p.lock().ssrc())
    }

    /// Audio track's SSRC, if present.
    pub fn audio_ssrc(&self) -> Option<u32> {
        self.audio.as_ref().map(|p| p.lock().ssrc())
    }

    /// Video track's next RTP sequence/timestamp, for `RTP-Info`.
    pub fn video_rtp_info(&self) -> Option<(u16, u32)> {
        self.video
            .as_ref()
            .map(|p| (p.lock().next_sequence(), p.lock().next_rtp_timestamp()))
    }

    /// Audio track's next RTP sequence/timestamp, for `RTP-Info`.
    pub fn audio_rtp_info(&self) -> Option<(u16, u32)> {
        self.audio
            .as_ref()
            .map(|p| (p.lock().next_sequence(), p.lock().next_rtp_timestamp()))
    }

    /// Video track description for SDP generation.
    pub fn video_info(&self) -> Option<TrackDescription> {
        self.video.as_ref().map(|p| {
            let p = p.lock();
            TrackDescription {
                payload_type: p.payload_type(),
                sdp_attributes: p.sdp_attributes(),
            }
        })
    }

    /// Audio track description for SDP generation.
    pub fn audio_info(&self) -> Option<TrackDescription> {
        self.audio.as_ref().map(|p| {
            let p = p.lock();
            TrackDescription {
                payload_type: p.payload_type(),
                sdp_attributes: p.sdp_attributes(),
            }
        })
    }

    /// Subscribe a session to this mount (called during SETUP).
    pub fn subscribe(&self, session_id: &str) {
        let mut ids = self.session_ids.write();
        if !ids.iter().any(|id| id == session_id) {
            ids.push(session_id.to_string());
            tracing::debug!(mount = %self.path, session_id, "session subscribed");
        }
    }

    /// Unsubscribe a session from this mount (called during TEARDOWN or disconnect).
    pub fn unsubscribe(&self, session_id: &str) {
        let mut ids = self.session_ids.write();
        if let Some(pos) = ids.iter().position(|id| id == session_id) {
            ids.swap_remove(pos);
            tracing::debug!(mount = %self.path, session_id, "session unsubscribed");
        }
    }

    /// Returns the list of subscribed session IDs.
    pub fn subscribed_session_ids(&self) -> Vec<String> {
        self.session_ids.read().clone()
    }
}

/// Registry of named mount points, keyed by path.
///
/// Supports a "default" mount that acts as a fallback when the requested
/// URI path doesn't match any registered mount. This ensures that clients
/// requesting any path (e.g. `/test`, `/live`) will be served by the
/// default stream when only one mount is configured.
#[derive(Clone)]
pub struct MountRegistry {
    mounts: Arc<RwLock<HashMap<String, Arc<Mount>>>>,
    /// Path of the default (fallback) mount, used when no exact match is found.
    default_path: Arc<RwLock<Option<String>>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self {
            mounts: Arc::new(RwLock::new(HashMap::new())),
            default_path: Arc::new(RwLock::new(None)),
        }
    }

    /// Register a new mount point. Replaces any existing mount at the same path.
    pub fn add(&self, path: &str, mount: Mount) -> Arc<Mount> {
        let mount = Arc::new(mount);
        self.mounts.write().insert(path.to_string(), mount.clone());
        tracing::info!(path, "mount registered");
        mount
    }

    /// Designate a mount path as the default fallback.
    ///
    /// When [`resolve_from_uri`](Self::resolve_from_uri) cannot find an
    /// exact match, it falls back to this mount. Typically set to
    /// [`DEFAULT_MOUNT_PATH`] by the server constructor.
    pub fn set_default(&self, path: &str) {
        *self.default_path.write() = Some(path.to_string());
    }

    /// Look up a mount by exact path.
    pub fn get(&self, path: &str) -> Option<Arc<Mount>> {
        self.mounts.read().get(path).cloned()
    }

    /// Resolve a mount from an RTSP URI.
    ///
    /// Tries an exact path match first. If no mount is found, falls back
    /// to the default mount (if one has been set via [`set_default`](Self::set_default)).
    ///
    /// This fallback ensures clients requesting any URI (e.g.
    /// `rtsp://host/test`) are served when only a single default stream
    /// is configured — matching the behavior of most RTSP server
    /// implementations.
    pub fn resolve_from_uri(&self, uri: &str) -> Option<Arc<Mount>> {
        let path = extract_mount_path(uri);
        self.get(path).or_else(|| {
            let default = self.default_path.read();
            default.as_ref().and_then(|p| self.get(p))
        })
    }

    /// Unsubscribe a session from all mounts (used during disconnect cleanup).
    pub fn unsubscribe_all(&self, session_id: &str) {
        let mounts = self.mounts.read();
        for mount in mounts.values() {
            mount.unsubscribe(session_id);
        }
    }
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the mount path from an RTSP URI.
///
/// `rtsp://host:8554/stream/track1` → `/stream`
/// `rtsp://host:8554/stream`        → `/stream`
/// `rtsp://host:8554/`              → `/`
/// `rtsp://host:8554`               → `/stream` (default)
/// `*`                               → `/stream` (default)
pub fn extract_mount_path(uri: &str) -> &str {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => DEFAULT_MOUNT_PATH,
        }
    } else if uri.starts_with('/') {
        uri
    } else {
        DEFAULT_MOUNT_PATH
    };

    // Strip track suffix: /stream/track1 → /stream
    if let Some(pos) = path.rfind("/track") {
        &path[..pos]
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_path_full_uri() {
        assert_eq!(
            extract_mount_path("rtsp://localhost:8554/stream"),
            "/stream"
        );
    }

    #[test]
    fn extract_path_with_track() {
        assert_eq!(
            extract_mount_path("rtsp://localhost:8554/stream/track1"),
            "/stream"
        );
    }

    #[test]
    fn extract_path_no_path() {
        assert_eq!(
            extract_mount_path("rtsp://localhost:8554"),
            DEFAULT_MOUNT_PATH
        );
    }

    #[test]
    fn extract_path_star() {
        assert_eq!(extract_mount_path("*"), DEFAULT_MOUNT_PATH);
    }

    #[test]
    fn extract_path_bare_path() {
        assert_eq!(extract_mount_path("/camera1"), "/camera1");
    }

    #[test]
    fn extract_path_with_camera_track() {
        assert_eq!(
            extract_mount_path("rtsp://10.0.0.1:8554/camera1/track1"),
            "/camera1"
        );
    }

    #[test]
    fn subscribe_unsubscribe() {
        let mount = Mount::new(
            "/test",
            Box::new(crate::media::h264::H264Packetizer::new(96, 0x1234)),
        );
        mount.subscribe("session1");
        mount.subscribe("session2");
        assert_eq!(mount.subscribed_session_ids().len(), 2);

        mount.unsubscribe("session1");
        assert_eq!(mount.subscribed_session_ids(), vec!["session2"]);
    }

    #[test]
    fn subscribe_idempotent() {
        let mount = Mount::new(
            "/test",
            Box::new(crate::media::h264::H264Packetizer::new(96, 0x1234)),
        );
        mount.subscribe("session1");
        mount.subscribe("session1");
        assert_eq!(mount.subscribed_session_ids().len(), 1);
    }

    #[test]
    fn registry_add_and_get() {
        let registry = MountRegistry::new();
        let p = Box::new(crate::media::h264::H264Packetizer::new(96, 0x1234));
        registry.add("/stream", Mount::new("/stream", p));

        assert!(registry.get("/stream").is_some());
        assert!(registry.get("/other").is_none());
    }

    #[test]
    fn registry_resolve_from_uri() {
        let registry = MountRegistry::new();
        let p = Box::new(crate::media::h264::H264Packetizer::new(96, 0x1234));
        registry.add("/stream", Mount::new("/stream", p));

        assert!(
            registry
                .resolve_from_uri("rtsp://localhost:8554/stream")
                .is_some()
        );
        assert!(
            registry
                .resolve_from_uri("rtsp://localhost:8554/stream/track1")
                .is_some()
        );
        // No default set — unknown path returns None
        assert!(
            registry
                .resolve_from_uri("rtsp://localhost:8554/other")
                .is_none()
        );
    }

    #[test]
    fn registry_resolve_fallback_to_default() {
        let registry = MountRegistry::new();
        let p = Box::new(crate::media::h264::H264Packetizer::new(96, 0x1234));
        registry.add("/stream", Mount::new("/stream", p));
        registry.set_default("/stream");

        // Exact match still works
        let mount = registry
            .resolve_from_uri("rtsp://localhost:8554/stream")
            .unwrap();
        assert_eq!(mount.path(), "/stream");

        // Unknown path falls back to default
        let mount = registry
            .resolve_from_uri("rtsp://localhost:8554/test")
            .unwrap();
        assert_eq!(mount.path(), "/stream");

        // Even an arbitrary path falls back
        let mount = registry
            .resolve_from_uri("rtsp://localhost:8554/anything")
            .unwrap();
        assert_eq!(mount.path(), "/stream");
    }

    #[test]
    fn registry_unsubscribe_all() {
        let registry = MountRegistry::new();
        let p1 = Box::new(crate::media::h264::H264Packetizer::new(96, 0x1234));
        let p2 = Box::new(crate::media::h264::H264Packetizer::new(96, 0x5678));
        registry.add("/stream1", Mount::new("/stream1", p1));
        registry.add("/stream2", Mount::new("/stream2", p2));

        registry.get("/stream1").unwrap().subscribe("sess1");
        registry.get("/stream2").unwrap().subscribe("sess1");

        registry.unsubscribe_all("sess1");

        assert!(
            registry
                .get("/stream1")
                .unwrap()
                .subscribed_session_ids()
                .is_empty()
        );
        assert!(
            registry
                .get("/stream2")
                .unwrap()
                .subscribed_session_ids()
                .is_empty()
        );
    }

    #[test]
    fn two_track_mount_exposes_both_payload_types() {
        let mount = Mount::new(
            "/stream",
            Box::new(crate::media::h264::H264Packetizer::new(96, 1)),
        )
        .with_audio(Box::new(crate::media::aac::AacPacketizer::new(
            97, 2, 44100, 2,
        )));
        assert_eq!(mount.video_payload_type(), Some(96));
        assert_eq!(mount.audio_payload_type(), Some(97));
        assert!(mount.has_audio());
    }

    #[test]
    fn ssrc_accessors_report_packetizer_ssrc() {
        let mount = Mount::new(
            "/stream",
            Box::new(crate::media::h264::H264Packetizer::new(96, 0xAAAA)),
        )
        .with_audio(Box::new(crate::media::aac::AacPacketizer::new(
            97, 0xBBBB, 44100, 2,
        )));
        assert_eq!(mount.video_ssrc(), Some(0xAAAA));
        assert_eq!(mount.audio_ssrc(), Some(0xBBBB));
    }
}
