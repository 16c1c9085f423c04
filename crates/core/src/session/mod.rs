//! RTSP session management (RFC 2326 §3, §12.37, spec §3).
//!
//! A [`Session`] is the per-connection state object shared by both roles:
//! created during SETUP (server) or `connect` (client), destroyed by
//! TEARDOWN/disconnect/timeout. It tracks the playback state machine, the
//! negotiated transport per channel, authentication state, and the
//! timebase-reconciliation fields (`first_dts`, audio/video drift).
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! SETUP         -> Ready
//! PLAY          -> Playing
//! PAUSE         -> Paused   (from Playing)
//! PLAY          -> Playing  (from Paused)
//! TEARDOWN      -> (removed)
//! TCP disconnect -> (removed, via cleanup)
//! ```

pub mod channel;
pub mod transport;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::protocol::digest::Credentials;
pub use channel::{Channel, ChannelContent};
pub use transport::Transport;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Which side of the RTSP exchange this Session implements (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Server,
    Client,
}

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Session created via SETUP, not yet playing.
    Ready,
    /// Media is being delivered (RTP packets sent to client).
    Playing,
    /// Delivery suspended; can resume via PLAY.
    Paused,
}

/// Whether PAUSE/resume semantics apply (spec §3 `flow_type`).
///
/// A `file`-flow source can be paused and resumed; a live `stream` source
/// cannot meaningfully pause upstream, so PAUSE only suspends delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    Stream,
    File,
}

/// Which method the client role uses to keep a session alive (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveMethod {
    GetParameter,
    Options,
    None,
}

/// Client-role authentication state (spec §3 `auth_state`).
#[derive(Debug, Clone)]
pub enum AuthState {
    None,
    Basic(Credentials),
    Digest {
        realm: String,
        nonce: String,
        qop: Option<String>,
        credentials: Credentials,
    },
}

/// A single RTSP session (spec §3), either server- or client-role.
///
/// Interior mutability via `RwLock`/atomics allows shared references across
/// the controller's event-loop thread and any cross-thread delivery paths
/// (e.g. `Server::publish_frame`).
pub struct Session {
    /// Unique session identifier (16-char hex string for server role, or
    /// learned from the peer's response for client role).
    pub id: RwLock<String>,
    /// The canonical presentation URL this session was created for.
    pub uri: String,
    pub role: SessionRole,
    /// Current playback state.
    state: RwLock<SessionState>,
    /// Session timeout in seconds (included in the `Session` response header).
    pub timeout_secs: u64,
    /// Monotonic outbound CSeq counter (client role).
    seq: AtomicU64,
    auth_state: RwLock<AuthState>,
    keepalive_method: RwLock<KeepaliveMethod>,
    paused: RwLock<bool>,
    flow_type: RwLock<FlowType>,
    /// Two fixed channel slots: index 0 (video), index 1 (audio).
    channels: [RwLock<Option<Arc<Channel>>>; 2],
    /// DTS of the first frame sent/received; set once (spec §3 invariant).
    first_dts: RwLock<Option<i64>>,
    audio_dts_shift: RwLock<i64>,
    shift_count: RwLock<u32>,
    /// DTS (ms-domain) of the most recently observed video frame, used as
    /// the reference point for inbound audio/video drift reconciliation.
    last_video_dts: RwLock<Option<i64>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &*self.id.read())
            .field("uri", &self.uri)
            .field("role", &self.role)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl Session {
    /// Create a new server-role session with a fresh auto-incrementing ID.
    pub fn new(uri: &str) -> Self {
        Self::with_role(uri, SessionRole::Server)
    }

    /// Create a new session with an explicit role. Client-role sessions
    /// start with an empty id, learned from the peer's first `Session`
    /// response header (spec §4.4).
    pub fn with_role(uri: &str, role: SessionRole) -> Self {
        let id = match role {
            SessionRole::Server => format!("{:016X}", SESSION_COUNTER.fetch_add(1, Ordering::SeqCst)),
            SessionRole::Client => String::new(),
        };
        Session {
            id: RwLock::new(id),
            uri: uri.to_string(),
            role,
            state: RwLock::new(SessionState::Ready),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            seq: AtomicU64::new(1),
            auth_state: RwLock::new(AuthState::None),
            keepalive_method: RwLock::new(KeepaliveMethod::GetParameter),
            paused: RwLock::new(false),
            flow_type: RwLock::new(FlowType::Stream),
            channels: [RwLock::new(None), RwLock::new(None)],
            first_dts: RwLock::new(None),
            audio_dts_shift: RwLock::new(0),
            shift_count: RwLock::new(0),
            last_video_dts: RwLock::new(None),
        }
    }

    pub fn id(&self) -> String {
        self.id.read().clone()
    }

    /// Learn the session id from a server response (client role), stripping
    /// any `;timeout=` suffix (spec §4.4).
    pub fn adopt_session_id(&self, raw: &str) {
        let token = raw.split(';').next().unwrap_or(raw).trim();
        *self.id.write() = token.to_string();
    }

    /// Next outbound CSeq, incrementing the counter (spec §4.4, §8 CSeq monotonicity).
    pub fn next_cseq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth_state.read().clone()
    }

    pub fn set_auth_state(&self, state: AuthState) {
        *self.auth_state.write() = state;
    }

    pub fn keepalive_method(&self) -> KeepaliveMethod {
        *self.keepalive_method.read()
    }

    pub fn set_keepalive_method(&self, method: KeepaliveMethod) {
        *self.keepalive_method.write() = method;
    }

    pub fn flow_type(&self) -> FlowType {
        *self.flow_type.read()
    }

    pub fn set_flow_type(&self, flow_type: FlowType) {
        *self.flow_type.write() = flow_type;
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.read()
    }

    pub fn set_paused(&self, paused: bool) {
        *self.paused.write() = paused;
    }

    /// Transition to a new playback state.
    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id(), old_state = ?*self.state.read(), new_state = ?state, "state transition");
        *self.state.write() = state;
    }

    pub fn get_state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_playing(&self) -> bool {
        *self.state.read() == SessionState::Playing
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id(), self.timeout_secs)
    }

    /// Install a channel into a fixed slot (0 or 1). Panics on out-of-range
    /// index — callers resolve `trackID=N` into `0` or `1` before calling.
    pub fn set_channel(&self, index: u8, channel: Arc<Channel>) {
        *self.channels[index as usize].write() = Some(channel);
    }

    pub fn channel(&self, index: u8) -> Option<Arc<Channel>> {
        self.channels.get(index as usize)?.read().clone()
    }

    /// Both channel slots, in index order, whichever are populated.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().filter_map(|c| c.read().clone()).collect()
    }

    /// Anchor `first_dts` the first time it is observed; subsequent calls
    /// are no-ops (spec §3 invariant: "set once per Session and never changes").
    pub fn anchor_first_dts(&self, dts: i64) -> i64 {
        let mut anchor = self.first_dts.write();
        if anchor.is_none() {
            *anchor = Some(dts);
        }
        anchor.unwrap()
    }

    pub fn first_dts(&self) -> Option<i64> {
        *self.first_dts.read()
    }

    /// Apply the audio/video drift clamp (spec §4.6, §8 "Audio drift clamp").
    ///
    /// Returns the (possibly clamped) audio DTS to forward. When the
    /// divergence between `audio_dts + shift` and `video_dts` exceeds
    /// 10,000 units, the audio DTS is clamped to `video_dts` and a new
    /// shift is recorded to absorb subsequent frames.
    pub fn reconcile_audio_drift(&self, audio_dts: i64, video_dts: i64) -> Result<i64> {
        const DRIFT_THRESHOLD: i64 = 10_000;

        let shift = *self.audio_dts_shift.read();
        let shifted = audio_dts + shift;
        if (video_dts - shifted).abs() <= DRIFT_THRESHOLD {
            return Ok(shifted);
        }

        let new_shift = audio_dts - video_dts;
        *self.audio_dts_shift.write() = new_shift;
        let mut count = self.shift_count.write();
        *count += 1;

        if *count <= 3 {
            tracing::warn!(
                session_id = %self.id(),
                audio_dts, video_dts, shift = new_shift, count = *count,
                "audio/video drift correction"
            );
        }
        if *count > 6 {
            return Err(crate::error::RtspError::TooManyAudioShift);
        }

        Ok(video_dts)
    }

    /// Record the latest inbound video DTS (ms-domain), the reference point
    /// [`reconcile_audio_drift`](Self::reconcile_audio_drift) drifts audio against.
    pub fn observe_video_dts(&self, dts: i64) {
        *self.last_video_dts.write() = Some(dts);
    }

    pub fn last_video_dts(&self) -> Option<i64> {
        *self.last_video_dts.read()
    }
}

/// Thread-safe registry of active sessions.
///
/// Backed by `parking_lot::RwLock` for fast concurrent reads. Session
/// lookups happen on every RTP delivery cycle, so read performance matters.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager { sessions: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Create a new server-role session for the given URI and register it.
    pub fn create_session(&self, uri: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(uri));
        let id = session.id();
        self.sessions.write().insert(id.clone(), session.clone());

        let total = self.sessions.read().len();
        tracing::debug!(session_id = %id, uri, total_sessions = total, "session created");

        session
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and return a session by ID (used by TEARDOWN).
    pub fn remove_session(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            let total = self.sessions.read().len();
            tracing::debug!(session_id = %id, total_sessions = total, "session removed");
        }
        removed
    }

    /// Remove multiple sessions at once (used during TCP disconnect cleanup).
    pub fn remove_sessions(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write();
        let mut removed = 0;
        for id in ids {
            if sessions.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "batch session cleanup");
        }
        removed
    }

    /// Returns all sessions currently in the [`SessionState::Playing`] state.
    pub fn get_playing_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_playing())
            .cloned()
            .collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
