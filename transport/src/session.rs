//! The Reliable UDP Channel: a bound, handshaking, then data-carrying
//! connection over one UDP socket. Composes [`crate::handshake::Handshake`],
//! the two [`crate::window`] halves, and a 1-second idle retransmit timer.

use std::net::{SocketAddrV4, UdpSocket};
use std::time::Duration;

use collections::bytes::Slice;
use collections::sparse::Ring;
use log::{info, warn};
use protocol::{Header, PacketKind, ProtocolId};
use runtime::Io;
use socket2::{Domain, Socket, Type as SockType};
use stakker::{timer_max, Fwd, MaxTimerKey, CX};
use x25519_dalek::PublicKey;

use crate::crypto::{self, SessionKey};
use crate::error::ChannelError;
use crate::handshake::{self, Handshake};
use crate::window::{self, Receiver, Sender};

/// Outstanding/buffered packets rarely approach this; it only bounds the
/// physical ring storage, not the logical window `w` (which may be smaller).
/// Callers constructing a [`Channel`] must keep `w <= RING_CAPACITY`, or
/// packet ids more than `RING_CAPACITY` apart alias to the same ring slot.
pub const RING_CAPACITY: usize = 64;

pub const RETRANSMIT_INTERVAL: Duration = Duration::from_secs(1);
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_secs(2);

pub const DEFAULT_WINDOW: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
	Handshaking,
	Connected,
	Closed,
}

/// Bind a UDP socket with `SO_REUSEADDR` set, so multiple channels in a
/// [`crate::race::RendezvousRace`] can share one local endpoint.
pub fn bind_reuseaddr(local: SocketAddrV4) -> std::io::Result<UdpSocket> {
	let socket = Socket::new(Domain::IPV4, SockType::DGRAM, None)?;
	socket.set_reuse_address(true)?;
	socket.set_nonblocking(true)?;
	socket.bind(&local.into())?;
	Ok(socket.into())
}

pub struct Channel {
	io: Io<UdpSocket>,
	remote: SocketAddrV4,
	protocol_id: ProtocolId,
	w: u32,
	state: ChannelState,
	handshake: Handshake,
	key: Option<SessionKey>,
	send_window: Sender,
	recv_window: Receiver,
	outbound: Ring<Vec<u8>, RING_CAPACITY>,
	inbound: Ring<Vec<u8>, RING_CAPACITY>,
	retransmit_timer: MaxTimerKey,
	handshake_timer: MaxTimerKey,
	/// Receives plaintext payloads as they become deliverable, in order.
	deliver: Fwd<Vec<u8>>,
	/// Notified once, with `true`, the moment the handshake completes.
	established: Fwd<bool>,
}

impl Channel {
	/// Bind to `local` (already primed for reuse by the caller, or a fresh
	/// ephemeral socket if binding directly) and start handshaking with `remote`.
	pub fn connect(
		cx: CX![],
		socket: UdpSocket,
		remote: SocketAddrV4,
		protocol_id: ProtocolId,
		w: u32,
		deliver: Fwd<Vec<u8>>,
		established: Fwd<bool>,
	) -> Option<Self> {
		debug_assert!(w as usize <= RING_CAPACITY, "window {w} exceeds ring capacity {RING_CAPACITY}, ids would alias");

		socket.connect(remote).ok().or_else(|| {
			warn!("Failed to connect channel socket to {remote}");
			None
		})?;

		let read_fwd = stakker::fwd_to!([cx], read() as (Slice));
		let io = Io::new(socket, read_fwd);

		let mut this = Self {
			io,
			remote,
			protocol_id,
			w,
			state: ChannelState::Handshaking,
			handshake: Handshake::new(protocol_id),
			key: None,
			send_window: Sender::new(w),
			recv_window: Receiver::new(w),
			outbound: Ring::default(),
			inbound: Ring::default(),
			retransmit_timer: MaxTimerKey::default(),
			handshake_timer: MaxTimerKey::default(),
			deliver,
			established,
		};

		this.send_handshake(handshake::Outgoing::Probe);
		this.arm_handshake_timer(cx);

		Some(this)
	}

	pub fn state(&self) -> ChannelState {
		self.state
	}

	pub fn remote(&self) -> SocketAddrV4 {
		self.remote
	}

	/// Encrypt and send `plaintext`. Fails with [`ChannelError::WouldBlock`]
	/// if the send window is full, or [`ChannelError::NotConnected`] before
	/// the handshake completes.
	///
	/// Manual/integration scenario (needs real sockets and wall-clock time,
	/// not a unit test): two channels over a lossy UDP path, `W=5`, sender
	/// writes `["a","b","c","d","e"]` with the first transmission of `"c"`
	/// dropped. The receiver must still deliver all five in order within 3x
	/// [`RETRANSMIT_INTERVAL`], and `"c"` must have been transmitted by
	/// [`retransmit_tick`](Self::retransmit_tick) at least twice.
	pub fn send(&mut self, cx: CX![], plaintext: &[u8]) -> Result<(), ChannelError> {
		if self.state != ChannelState::Connected {
			return Err(ChannelError::NotConnected);
		}

		if self.send_window.state() == window::State::Blocked {
			return Err(ChannelError::WouldBlock);
		}

		let key = self.key.expect("Connected implies a session key was derived");
		let ciphertext = crypto::seal(&key, plaintext);
		let id = self.send_window.allocate();

		self.outbound.insert(id as usize, ciphertext.clone());
		self.write_seq(id, &ciphertext);
		self.arm_retransmit(cx);

		Ok(())
	}

	pub fn close(&mut self, cx: CX![]) {
		self.state = ChannelState::Closed;
		cx.timer_max_del(self.retransmit_timer);
		cx.timer_max_del(self.handshake_timer);
	}

	fn read(&mut self, cx: CX![], buf: Slice) {
		if self.state == ChannelState::Closed {
			return;
		}

		// The bare Probe datagram is just the 4-byte ProtocolId, shorter than a full header.
		if buf.len() == 4 {
			let pid = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

			if pid == self.protocol_id && self.state == ChannelState::Handshaking {
				self.handle_handshake(cx, handshake::Incoming::Probe);
			}

			return;
		}

		let Some(header) = protocol::decode(&buf) else {
			return;
		};

		if header.protocol_id.get() != self.protocol_id {
			return;
		}

		let Some(kind) = header.kind() else {
			return;
		};

		let body = &buf[protocol::HEADER_LEN..];

		match self.state {
			ChannelState::Handshaking => self.read_handshake_body(cx, kind, body),
			ChannelState::Connected => self.read_data(cx, kind, header, body),
			ChannelState::Closed => {}
		}
	}

	fn read_handshake_body(&mut self, cx: CX![], kind: PacketKind, body: &[u8]) {
		let incoming = match kind {
			PacketKind::Enk => {
				let Some(key) = decode_enk_body(body) else {
					return warn!("Malformed Enk body");
				};

				handshake::Incoming::Enk(key)
			}
			PacketKind::EnkAck => handshake::Incoming::EnkAck,
			_ => return,
		};

		self.handle_handshake(cx, incoming);
	}

	fn handle_handshake(&mut self, cx: CX![], incoming: handshake::Incoming) {
		for out in self.handshake.on_packet(incoming) {
			self.send_handshake(out);
		}

		if self.handshake.is_established() {
			self.key = self.handshake.session_key().copied();
			self.state = ChannelState::Connected;
			cx.timer_max_del(self.handshake_timer);

			info!("Session established with {}", self.remote);
			self.established.fwd(true);
		}
	}

	fn read_data(&mut self, cx: CX![], kind: PacketKind, header: &Header, body: &[u8]) {
		match kind {
			PacketKind::Seq => {
				let id = header.packet_id.get();
				let base = self.recv_window.base();

				if id >= base && id < base + self.w {
					self.inbound.insert(id as usize, body.to_vec());
				}

				self.recv_window.deliver(id);

				let key = self.key.expect("Connected implies a session key was derived");

				for ready_id in self.recv_window.drain_ready().collect::<Vec<_>>() {
					if let Some(ciphertext) = self.inbound.remove(ready_id as usize) {
						match crypto::open(&key, &ciphertext) {
							Ok(plaintext) => self.deliver.fwd(plaintext),
							Err(_) => warn!("Failed to decrypt buffered packet {ready_id}"),
						}
					}
				}

				// Every Seq packet is acknowledged, seen before or not, so a
				// dropped Ack cannot wedge the sender indefinitely.
				let ack = Header::new(self.protocol_id, PacketKind::Ack, 0, id);
				let _ = self.io.write(|buf| {
					buf.push(&ack);
				});
			}
			PacketKind::Ack => {
				let acked = header.ack.get();
				let slid = self.send_window.acknowledge(acked);

				if slid > 0 {
					for released in self.send_window.drain_released().collect::<Vec<_>>() {
						self.outbound.remove(released as usize);
					}
				}

				if self.send_window.is_idle() {
					cx.timer_max_del(self.retransmit_timer);
				}
			}
			PacketKind::Probe | PacketKind::Enk | PacketKind::EnkAck => {}
		}
	}

	/// Re-sends every outstanding unacked `Seq` packet, then re-arms itself.
	/// Part of the lossy-delivery manual scenario documented on
	/// [`send`](Self::send): this is what makes a dropped `"c"` reappear on
	/// the wire without the sender ever re-calling `send`.
	fn retransmit_tick(&mut self, cx: CX![]) {
		if self.state != ChannelState::Connected || self.send_window.is_idle() {
			return;
		}

		for id in self.send_window.outstanding().collect::<Vec<_>>() {
			if let Some(ciphertext) = self.outbound.get(id as usize) {
				self.write_seq(id, &ciphertext.clone());
			}
		}

		self.arm_retransmit(cx);
	}

	fn handshake_tick(&mut self, cx: CX![]) {
		if self.state != ChannelState::Handshaking {
			return;
		}

		if let Some(out) = self.handshake.retransmit() {
			self.send_handshake(out);
		}

		self.arm_handshake_timer(cx);
	}

	fn arm_retransmit(&mut self, cx: CX![]) {
		let deadline = cx.now() + RETRANSMIT_INTERVAL;
		timer_max!(&mut self.retransmit_timer, deadline, [cx], retransmit_tick());
	}

	fn arm_handshake_timer(&mut self, cx: CX![]) {
		let deadline = cx.now() + HANDSHAKE_RETRY_INTERVAL;
		timer_max!(&mut self.handshake_timer, deadline, [cx], handshake_tick());
	}

	fn write_seq(&self, id: u32, ciphertext: &[u8]) {
		let header = Header::new(self.protocol_id, PacketKind::Seq, id, 0);

		if self
			.io
			.write(|buf| {
				buf.push(&header).push(ciphertext);
			})
			.is_err()
		{
			warn!("Transient I/O failure sending Seq packet {id} to {}", self.remote);
		}
	}

	fn send_handshake(&mut self, out: handshake::Outgoing) {
		use utils::endian::u32be;

		let result = match out {
			handshake::Outgoing::Probe => {
				let pid: u32be = self.protocol_id.into();
				self.io.write(|buf| {
					buf.push(&pid);
				})
			}
			handshake::Outgoing::Enk(key) => {
				let header = Header::new(self.protocol_id, PacketKind::Enk, 0, 0);
				let key_bytes = *key.as_bytes();
				let key_len: u32be = (key_bytes.len() as u32).into();

				self.io.write(|buf| {
					buf.push(&header).push(&key_len).push(&key_bytes[..]);
				})
			}
			handshake::Outgoing::EnkAck => {
				let header = Header::new(self.protocol_id, PacketKind::EnkAck, 0, 0);
				self.io.write(|buf| {
					buf.push(&header);
				})
			}
		};

		if result.is_err() {
			warn!("Transient I/O failure sending handshake packet to {}", self.remote);
		}
	}
}

fn decode_enk_body(body: &[u8]) -> Option<PublicKey> {
	if body.len() < 4 {
		return None;
	}

	let key_len = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
	let key_bytes = body.get(4..4 + key_len)?;
	let array: [u8; 32] = key_bytes.try_into().ok()?;

	Some(PublicKey::from(array))
}
