//! TCP control-connection lifecycle: accept loop plus the per-connection
//! event loop that drives [`ControlParser`] and timer ticks (spec §4.1, §4.2).

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::collaborators::MediaSink;
use crate::mount::MountRegistry;
use crate::protocol::parser::{ControlEvent, ControlParser};
use crate::protocol::MethodHandler;
use crate::server::ServerConfig;
use crate::session::SessionManager;

/// How long a single `read` call blocks before the connection loop re-checks
/// its timers and the `running` flag.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// RR emission cadence while at least one channel is active (spec §4.7).
const RR_INTERVAL_ACTIVE: Duration = Duration::from_secs(3);
/// RR emission cadence while idle (spec §4.7).
const RR_INTERVAL_IDLE: Duration = Duration::from_secs(2);

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    session_manager: SessionManager,
    mounts: MountRegistry,
    sink: Arc<dyn MediaSink>,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let sm = session_manager.clone();
                let r = running.clone();
                let m = mounts.clone();
                let s = sink.clone();
                let c = config.clone();
                thread::spawn(move || {
                    Connection::handle(stream, sm, m, s, c, r);
                });
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own lifecycle.
///
/// Reads both RTSP text requests and, once SETUP has negotiated interleaved
/// transport, binary `$`-framed RTP/RTCP blocks off the same socket
/// (RFC 2326 §10.12), via [`ControlParser`].
struct Connection {
    stream: TcpStream,
    parser: ControlParser,
    handler: MethodHandler,
    peer_addr: SocketAddr,
    last_rr_at: Instant,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    pub fn handle(
        stream: TcpStream,
        session_manager: SessionManager,
        mounts: MountRegistry,
        sink: Arc<dyn MediaSink>,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        if stream.set_read_timeout(Some(READ_POLL_INTERVAL)).is_err() {
            return;
        }

        let mut handler = MethodHandler::new(session_manager.clone(), peer_addr, mounts.clone(), sink, config);
        if let Ok(writer_clone) = stream.try_clone() {
            handler.set_tcp_writer(writer_clone);
        }

        let mut conn = Connection {
            stream,
            parser: ControlParser::new(),
            handler,
            peer_addr,
            last_rr_at: Instant::now(),
        };

        let reason = conn.run(&running);
        conn.cleanup(&session_manager, &mounts);

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        let mut read_buf = [0u8; 4096];

        while running.load(Ordering::SeqCst) {
            match self.stream.read(&mut read_buf) {
                Ok(0) => return "connection closed by client",
                Ok(n) => self.parser.feed(&read_buf[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                Err(_) => return "read error",
            }

            loop {
                match self.parser.poll() {
                    ControlEvent::Request(request) => {
                        tracing::debug!(
                            peer = %self.peer_addr,
                            method = %request.method,
                            uri = %request.uri,
                            "request"
                        );

                        let response = self.handler.handle(&request);

                        tracing::debug!(peer = %self.peer_addr, status = response.status_code, "response");

                        if self.stream.write_all(response.serialize().as_bytes()).is_err() {
                            return "write error";
                        }
                    }
                    ControlEvent::Response(_) => {
                        // Server-role connections do not expect inbound responses
                        // on the accept-side socket; ignore.
                    }
                    ControlEvent::Interleaved { channel_id, data } => {
                        self.handler.route_interleaved(channel_id, &data);
                    }
                    ControlEvent::More => break,
                    ControlEvent::Desync(reason) => {
                        tracing::warn!(peer = %self.peer_addr, reason, "control channel desync");
                        return "desync";
                    }
                }
            }

            if self.maybe_emit_receiver_reports().is_err() {
                return "write error";
            }
        }

        "server shutting down"
    }

    fn maybe_emit_receiver_reports(&mut self) -> std::io::Result<()> {
        let reports = self.handler.due_receiver_reports();
        let interval = if reports.is_empty() { RR_INTERVAL_IDLE } else { RR_INTERVAL_ACTIVE };
        if self.last_rr_at.elapsed() < interval {
            return Ok(());
        }
        self.last_rr_at = Instant::now();

        for (channel_id, payload) in reports {
            let mut frame = Vec::with_capacity(4 + payload.len());
            frame.push(b'$');
            frame.push(channel_id);
            frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            frame.extend_from_slice(&payload);
            self.stream.write_all(&frame)?;
        }
        Ok(())
    }

    /// Clean up sessions owned by this connection and unsubscribe from mounts.
    fn cleanup(&self, session_manager: &SessionManager, mounts: &MountRegistry) {
        let orphaned = self.handler.session_ids().to_vec();
        if !orphaned.is_empty() {
            for id in &orphaned {
                mounts.unsubscribe_all(id);
            }
            let removed = session_manager.remove_sessions(&orphaned);
            tracing::info!(peer = %self.peer_addr, removed, "cleaned up sessions on disconnect");
        }
    }
}
