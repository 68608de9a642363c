// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection acceptor glue: the CONNECT gate, installing the resulting
//! [`Session`] as the connection's packet dispatcher, and will/offline
//! teardown on disconnect.
//!
//! Everything here runs on whichever worker runtime the connection was
//! handed to at accept time, and stays there for the connection's entire
//! lifetime (`server::spawn_worker`).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use codec::{parse_frame, ConnectAckPacket, ConnectPacket, ConnectReturnCode, DecodeError, PacketType};

use crate::offline_store::OfflineStore;
use crate::session::{Session, SessionInit, Transport, TransportHandle};
use crate::topic_index::TopicIndex;

/// How long a new connection has to send a valid CONNECT before it's closed.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const READ_CHUNK: usize = 4096;
/// Floor on the keepalive read timeout so a keep_alive of 1-2s can't busy-loop.
const MIN_KEEPALIVE_POLL: Duration = Duration::from_secs(1);

/// Drives buffered bytes from a live [`TcpStream`] half into the worker
/// runtime via spawned writes; `close` is idempotent and safe to call from
/// any thread (the topic index fans out from the publisher's loop, not the
/// subscriber's — see `session::Transport`).
struct TcpTransport {
    runtime: tokio::runtime::Handle,
    write_half: Arc<AsyncMutex<OwnedWriteHalf>>,
    closed: Arc<AtomicBool>,
}

impl Transport for TcpTransport {
    fn send(&self, bytes: Vec<u8>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let write_half = Arc::clone(&self.write_half);
        let closed = Arc::clone(&self.closed);
        self.runtime.spawn(async move {
            let mut guard = write_half.lock().await;
            if guard.write_all(&bytes).await.is_err() {
                closed.store(true, Ordering::Release);
            }
        });
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let write_half = Arc::clone(&self.write_half);
        self.runtime.spawn(async move {
            let _ = write_half.lock().await.shutdown().await;
        });
    }
}

enum ReadOutcome {
    Frame(PacketType, u8, Vec<u8>),
    /// Peer closed the connection or the framing was malformed; the caller
    /// must not attempt to read again.
    Closed,
    /// No complete frame arrived within the requested deadline.
    TimedOut,
}

/// Accumulate bytes from `read_half` into `buf` until one complete frame is
/// available, `buf` already contains one, or `timeout` elapses.
async fn read_one_frame(read_half: &mut OwnedReadHalf, buf: &mut Vec<u8>, timeout: Option<Duration>) -> ReadOutcome {
    loop {
        match parse_frame(buf) {
            Ok(Some(frame)) => {
                let packet_type = frame.packet_type;
                let flags = frame.flags;
                let body = frame.body.to_vec();
                let consumed = frame.consumed;
                buf.drain(0..consumed);
                return ReadOutcome::Frame(packet_type, flags, body);
            }
            Ok(None) => {}
            Err(_) => return ReadOutcome::Closed,
        }

        let mut chunk = [0u8; READ_CHUNK];
        let read = match timeout {
            Some(duration) => match tokio::time::timeout(duration, read_half.read(&mut chunk)).await {
                Ok(result) => result,
                Err(_) => return ReadOutcome::TimedOut,
            },
            None => read_half.read(&mut chunk).await,
        };
        match read {
            Ok(0) | Err(_) => return ReadOutcome::Closed,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn send_connack(transport: &TransportHandle, session_present: bool, code: ConnectReturnCode) {
    let mut buf = Vec::new();
    ConnectAckPacket::new(session_present, code).encode(&mut buf);
    transport.send(buf);
}

/// Maps a malformed-CONNECT decode error to the CONNACK refusal code the
/// broker must reply with before closing, or `None` when the framing is
/// malformed enough that no CONNACK is owed at all (§7 taxonomy).
fn refusal_code(err: DecodeError) -> Option<ConnectReturnCode> {
    match err {
        DecodeError::InvalidProtocolName | DecodeError::InvalidProtocolLevel => {
            Some(ConnectReturnCode::RefusedProtocolVersion)
        }
        DecodeError::EmptyClientId => Some(ConnectReturnCode::RefusedIdentifierRejected),
        _ => None,
    }
}

/// Run the CONNECT gate. On success returns the bound session (fresh or
/// recovered from the offline store) with CONNACK already sent and any
/// queued offline messages flushed.
async fn gate_connect(
    read_half: &mut OwnedReadHalf,
    buf: &mut Vec<u8>,
    transport: &TransportHandle,
    topic_index: &Arc<TopicIndex>,
    offline_store: &Arc<OfflineStore>,
) -> Option<Arc<Session>> {
    let (packet_type, _flags, body) = match read_one_frame(read_half, buf, Some(CONNECT_TIMEOUT)).await {
        ReadOutcome::Frame(t, f, b) => (t, f, b),
        ReadOutcome::Closed | ReadOutcome::TimedOut => {
            transport.close();
            return None;
        }
    };

    if packet_type != PacketType::Connect || body.len() < 5 {
        transport.close();
        return None;
    }

    let packet = match ConnectPacket::decode(&body) {
        Ok(packet) => packet,
        Err(err) => {
            if let Some(code) = refusal_code(err) {
                send_connack(transport, false, code);
            }
            transport.close();
            return None;
        }
    };

    let init = SessionInit::from_connect(&packet);
    let clean_session = init.clean_session;
    let keep_alive = init.keep_alive;
    let will = init.will.clone();

    let (session, session_present) = if !clean_session {
        if let Some(existing) = offline_store.pop(&init.client_id) {
            existing.rebind(keep_alive, will);
            (existing, true)
        } else {
            (Session::new(init, Arc::clone(topic_index)), false)
        }
    } else {
        (Session::new(init, Arc::clone(topic_index)), false)
    };

    session.set_transport(Some(Arc::clone(transport)));
    send_connack(transport, session_present, ConnectReturnCode::Accepted);
    session.flush_offline();
    Some(session)
}

/// Dispatch packets until the peer disconnects, a handler force-closes, or
/// the keepalive watchdog fires. Polling the socket with a read timeout of
/// roughly `keep_alive / 2` stands in for the spec's separate recurring
/// timer: this connection's own loop *is* the timer wheel it runs on.
async fn run_session_loop(session: &Arc<Session>, read_half: &mut OwnedReadHalf, buf: &mut Vec<u8>) {
    loop {
        let keep_alive = session.keep_alive();
        let poll = (keep_alive > 0)
            .then(|| Duration::from_secs(u64::from(keep_alive) / 2).max(MIN_KEEPALIVE_POLL));

        match read_one_frame(read_half, buf, poll).await {
            ReadOutcome::Frame(packet_type, flags, body) => match session.dispatch(packet_type, flags, &body) {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    log::warn!("{}: {err}, closing connection", session.client_id());
                    return;
                }
            },
            ReadOutcome::Closed => return,
            ReadOutcome::TimedOut => {
                if session.is_stale(now()) {
                    log::info!("{}: keepalive timeout", session.client_id());
                    return;
                }
            }
        }
    }
}

/// Publish the will (if any) and either park the session for reconnect or
/// unsubscribe everything, per the clean-session flag.
fn teardown(session: &Arc<Session>, topic_index: &Arc<TopicIndex>, offline_store: &Arc<OfflineStore>) {
    session.set_transport(None);

    if let Some(will) = session.take_will() {
        // `TopicIndex::publish` already stores the retained copy when
        // `will.retain` is set, matching a normal PUBLISH's semantics.
        topic_index.publish(will);
    }

    if session.clean_session() {
        session.unsubscribe_all();
    } else {
        offline_store.push(session.client_id().to_string(), Arc::clone(session));
    }
}

/// Drive one accepted TCP connection end to end: the CONNECT gate, the
/// established session's dispatch loop, then will/offline teardown.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    topic_index: Arc<TopicIndex>,
    offline_store: Arc<OfflineStore>,
) {
    if let Err(err) = stream.set_nodelay(true) {
        log::warn!("{peer}: failed to set TCP_NODELAY: {err}");
    }
    let (mut read_half, write_half) = stream.into_split();
    let transport: TransportHandle = Arc::new(TcpTransport {
        runtime: tokio::runtime::Handle::current(),
        write_half: Arc::new(AsyncMutex::new(write_half)),
        closed: Arc::new(AtomicBool::new(false)),
    });

    let mut buf = Vec::with_capacity(READ_CHUNK);
    let session = match gate_connect(&mut read_half, &mut buf, &transport, &topic_index, &offline_store).await {
        Some(session) => session,
        None => return,
    };

    run_session_loop(&session, &mut read_half, &mut buf).await;
    transport.close();
    teardown(&session, &topic_index, &offline_store);
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
