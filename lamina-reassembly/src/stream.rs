//! TCP stream reassembly
//!
//! [`StreamAssembler`] tracks per-connection state from a decoded packet
//! sequence and reconstructs each direction's contiguous application byte
//! stream. Sessions open on a SYN, buffer mid-stream segments, and
//! reassemble a direction synchronously when its FIN arrives: segments are
//! laid out by sequence number relative to the direction's initial
//! sequence number, later arrivals overwrite earlier bytes, and the
//! contiguous region is walked back through factory dispatch so each
//! upper-layer unit is delivered to the listener in order.
//!
//! The captured segment set must be complete end-to-end: a sequence gap is
//! a precondition violation and the bytes of a gap are unspecified.
//!
//! Not thread safe: one assembler owns its session map and expects a
//! single-threaded feed.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, trace, warn};

use lamina_core::Port;
use lamina_packet::{PacketFactories, Payload};

/// Connection identity: server and client endpoint pairs
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TcpSessionKey {
    /// Server (SYN receiver) address
    pub server_addr: IpAddr,
    /// Server port
    pub server_port: u16,
    /// Client (SYN sender) address
    pub client_addr: IpAddr,
    /// Client port
    pub client_port: u16,
}

/// Which way the bytes flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    /// From the SYN sender toward the server
    ClientToServer,
    /// From the server toward the SYN sender
    ServerToClient,
}

/// Connection lifecycle as observed from the capture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// At least one SYN seen, no FIN yet
    Open,
    /// One direction has sent its FIN
    HalfClosed,
    /// Both directions have sent their FIN
    Closed,
}

/// Receives reassembled upper-layer units
pub trait StreamListener {
    /// One decoded unit of a direction's byte stream, in stream order
    fn on_data(&mut self, key: &TcpSessionKey, direction: StreamDirection, data: &Payload);
}

impl<F> StreamListener for F
where
    F: FnMut(&TcpSessionKey, StreamDirection, &Payload),
{
    fn on_data(&mut self, key: &TcpSessionKey, direction: StreamDirection, data: &Payload) {
        self(key, direction, data)
    }
}

#[derive(Clone, Debug)]
struct Segment {
    sequence: u32,
    data: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
struct DirectionState {
    /// Initial sequence number + 1, captured from this direction's SYN
    offset: Option<u32>,
    /// Segments buffered since the last reassembly, in arrival order
    segments: Vec<Segment>,
    fin_seen: bool,
}

/// One tracked connection
#[derive(Clone, Debug)]
pub struct TcpSession {
    key: TcpSessionKey,
    client_to_server: DirectionState,
    server_to_client: DirectionState,
}

impl TcpSession {
    fn new(key: TcpSessionKey) -> Self {
        Self {
            key,
            client_to_server: DirectionState::default(),
            server_to_client: DirectionState::default(),
        }
    }

    fn direction(&self, direction: StreamDirection) -> &DirectionState {
        match direction {
            StreamDirection::ClientToServer => &self.client_to_server,
            StreamDirection::ServerToClient => &self.server_to_client,
        }
    }

    fn direction_mut(&mut self, direction: StreamDirection) -> &mut DirectionState {
        match direction {
            StreamDirection::ClientToServer => &mut self.client_to_server,
            StreamDirection::ServerToClient => &mut self.server_to_client,
        }
    }

    /// The connection identity
    pub fn key(&self) -> &TcpSessionKey {
        &self.key
    }

    /// Lifecycle state as observed so far
    pub fn state(&self) -> SessionState {
        match (
            self.client_to_server.fin_seen,
            self.server_to_client.fin_seen,
        ) {
            (true, true) => SessionState::Closed,
            (false, false) => SessionState::Open,
            _ => SessionState::HalfClosed,
        }
    }

    /// The reassembly offset (initial sequence number + 1) for a direction
    pub fn offset(&self, direction: StreamDirection) -> Option<u32> {
        self.direction(direction).offset
    }

    /// Segments buffered and not yet reassembled for a direction
    pub fn pending_segments(&self, direction: StreamDirection) -> usize {
        self.direction(direction).segments.len()
    }

    /// Whether a direction has sent its FIN
    pub fn fin_seen(&self, direction: StreamDirection) -> bool {
        self.direction(direction).fin_seen
    }
}

/// Per-connection TCP stream reassembler
///
/// Sessions are created on SYN and kept forever: a closed session stays in
/// the map and remains queryable, so a long-lived capture grows the map
/// without bound.
pub struct StreamAssembler<L: StreamListener> {
    factories: PacketFactories,
    sessions: HashMap<TcpSessionKey, TcpSession>,
    listener: L,
}

impl<L: StreamListener> StreamAssembler<L> {
    /// An assembler decoding reassembled streams through the compiled-in
    /// binding
    pub fn new(listener: L) -> Self {
        Self::with_factories(listener, PacketFactories::statically_bound())
    }

    /// An assembler decoding reassembled streams through `factories`
    pub fn with_factories(listener: L, factories: PacketFactories) -> Self {
        Self {
            factories,
            sessions: HashMap::new(),
            listener,
        }
    }

    /// Number of tracked sessions, closed ones included
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Look up a tracked session
    pub fn session(&self, key: &TcpSessionKey) -> Option<&TcpSession> {
        self.sessions.get(key)
    }

    /// Iterate over all tracked sessions
    pub fn sessions(&self) -> impl Iterator<Item = &TcpSession> {
        self.sessions.values()
    }

    /// The registered listener
    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Feed one decoded packet
    ///
    /// Returns `false`, with no state change, when the packet carries no
    /// IP-over-anything TCP segment or belongs to no tracked session.
    pub fn add(&mut self, packet: &Payload) -> bool {
        let (src_addr, dst_addr) = if let Some(ip) = packet.find_ipv4() {
            (
                IpAddr::V4(ip.header().src_addr),
                IpAddr::V4(ip.header().dst_addr),
            )
        } else if let Some(ip) = packet.find_ipv6() {
            (
                IpAddr::V6(ip.header().src_addr),
                IpAddr::V6(ip.header().dst_addr),
            )
        } else {
            trace!("no IP layer, rejecting");
            return false;
        };

        let tcp = match packet.find_tcp() {
            Some(tcp) => tcp,
            None => {
                trace!("no TCP layer, rejecting");
                return false;
            }
        };

        let src_port = tcp.header().src_port.value();
        let dst_port = tcp.header().dst_port.value();
        let sequence = tcp.header().sequence_number;
        let data = tcp.payload().to_bytes();

        let (key, direction) = if tcp.header().syn && !tcp.header().ack {
            // client SYN opens the session
            let key = TcpSessionKey {
                server_addr: dst_addr,
                server_port: dst_port,
                client_addr: src_addr,
                client_port: src_port,
            };
            self.sessions.entry(key.clone()).or_insert_with(|| {
                debug!(?key, "session opened by SYN");
                TcpSession::new(key.clone())
            });
            (key, StreamDirection::ClientToServer)
        } else if tcp.header().syn && tcp.header().ack {
            // server SYN/ACK; the session usually exists already
            let key = TcpSessionKey {
                server_addr: src_addr,
                server_port: src_port,
                client_addr: dst_addr,
                client_port: dst_port,
            };
            self.sessions.entry(key.clone()).or_insert_with(|| {
                debug!(?key, "session opened by SYN/ACK");
                TcpSession::new(key.clone())
            });
            (key, StreamDirection::ServerToClient)
        } else {
            // mid-stream segment: find the session it belongs to
            let as_client = TcpSessionKey {
                server_addr: dst_addr,
                server_port: dst_port,
                client_addr: src_addr,
                client_port: src_port,
            };
            if self.sessions.contains_key(&as_client) {
                (as_client, StreamDirection::ClientToServer)
            } else {
                let as_server = TcpSessionKey {
                    server_addr: src_addr,
                    server_port: src_port,
                    client_addr: dst_addr,
                    client_port: dst_port,
                };
                if self.sessions.contains_key(&as_server) {
                    (as_server, StreamDirection::ServerToClient)
                } else {
                    trace!("segment for untracked session, rejecting");
                    return false;
                }
            }
        };

        let session = match self.sessions.get_mut(&key) {
            Some(session) => session,
            None => return false,
        };

        if tcp.header().syn {
            session.direction_mut(direction).offset = Some(sequence.wrapping_add(1));
            // a SYN carries no stream data
            return true;
        }

        if tcp.header().fin {
            let state = session.direction_mut(direction);
            if !data.is_empty() {
                state.segments.push(Segment {
                    sequence,
                    data: data.clone(),
                });
            }
            state.fin_seen = true;

            let offset = state.offset.unwrap_or_else(|| {
                let fallback = state
                    .segments
                    .iter()
                    .map(|s| s.sequence)
                    .min()
                    .unwrap_or(sequence);
                warn!(?key, "no SYN captured for this direction, using lowest sequence");
                fallback
            });
            let segments = std::mem::take(&mut state.segments);

            let stream_len = sequence.wrapping_sub(offset) as usize + data.len();
            let mut stream = vec![0u8; stream_len];
            for segment in &segments {
                let at = segment.sequence.wrapping_sub(offset) as usize;
                let end = (at + segment.data.len()).min(stream_len);
                if at < end {
                    stream[at..end].copy_from_slice(&segment.data[..end - at]);
                }
            }

            debug!(
                ?key,
                ?direction,
                bytes = stream_len,
                segments = segments.len(),
                state = ?session.state(),
                "direction finished, reassembled"
            );

            self.deliver(&key, direction, &stream, src_port, dst_port);
            return true;
        }

        if !data.is_empty() {
            session.direction_mut(direction).segments.push(Segment {
                sequence,
                data,
            });
        }
        true
    }

    /// Walk a contiguous stream region through factory dispatch and hand
    /// each decoded unit to the listener; multiple units may sit
    /// back-to-back
    fn deliver(
        &mut self,
        key: &TcpSessionKey,
        direction: StreamDirection,
        stream: &[u8],
        src_port: u16,
        dst_port: u16,
    ) {
        let numbers = [Port::of(dst_port), Port::of(src_port)];
        let mut rest = stream;
        while !rest.is_empty() {
            let unit = self
                .factories
                .port()
                .new_packet(rest, &self.factories, &numbers);
            let consumed = unit.len();
            self.listener.on_data(key, direction, &unit);
            if consumed == 0 || consumed >= rest.len() {
                break;
            }
            rest = &rest[consumed..];
        }
    }
}
