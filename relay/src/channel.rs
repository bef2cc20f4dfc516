//! The Relay Control Channel: a long-lived framed TCP connection to the
//! rendezvous server, with FIFO single-outstanding-request sequencing, a
//! background receive loop dispatching to registered notification handlers,
//! and automatic reconnection with backoff.

use std::collections::{HashMap, VecDeque};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use collections::bytes::Slice;
use log::{error, info, warn};
use rand::Rng;
use runtime::Io;
use stakker::{fwd_to, Fwd, MaxTimerKey, Ret, CX};

use crate::dict::{self, Dict};
use crate::ops::op;

pub const CLIENT_VERSION: &str = "1.0";

const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
	#[error("request timed out waiting for a response")]
	Timeout,
	#[error("relay reported an error: {0}")]
	Remote(String),
	#[error("relay protocol version mismatch: client {client}, server {server}")]
	VersionMismatch { client: String, server: String },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
	Connecting,
	Connected,
	Disconnected,
	/// A fatal version mismatch was reported; no further reconnect attempts are made.
	Fatal,
}

struct Outstanding {
	seq: u32,
	ret: Ret<Result<Dict, RelayError>>,
	armed: MaxTimerKey,
}

pub struct RelayChannel {
	host: String,
	port: u16,
	state: State,
	io: Option<Io<TcpStream>>,
	recv_buf: Vec<u8>,
	seq: u32,
	outstanding: Option<Outstanding>,
	queue: VecDeque<(Dict, Ret<Result<Dict, RelayError>>)>,
	handlers: HashMap<String, Fwd<Dict>>,
	backoff: Duration,
	ever_connected: bool,
	reconnect_timer: MaxTimerKey,
	on_disconnect: Fwd<()>,
	on_reconnected: Fwd<()>,
	on_fatal: Fwd<RelayError>,
}

impl RelayChannel {
	pub fn init(cx: CX![], host: String, port: u16, on_disconnect: Fwd<()>, on_reconnected: Fwd<()>, on_fatal: Fwd<RelayError>) -> Option<Self> {
		let mut this = Self {
			host,
			port,
			state: State::Disconnected,
			io: None,
			recv_buf: Vec::new(),
			seq: 0,
			outstanding: None,
			queue: VecDeque::new(),
			handlers: HashMap::new(),
			backoff: BACKOFF_INITIAL,
			ever_connected: false,
			reconnect_timer: MaxTimerKey::default(),
			on_disconnect,
			on_reconnected,
			on_fatal,
		};

		this.begin_connect(cx);
		Some(this)
	}

	/// Register a handler for asynchronous notifications with operation name `op`.
	pub fn on_notification(&mut self, op: impl Into<String>, handler: Fwd<Dict>) {
		self.handlers.insert(op.into(), handler);
	}

	/// Enqueue a request, delivering its response (or error) to `ret`. Only
	/// one request is outstanding on the wire at a time; others wait in FIFO order.
	pub fn send(&mut self, cx: CX![], operation: &str, body: Dict, ret: Ret<Result<Dict, RelayError>>) {
		let request = Dict::new().insert("t", "q").insert("q", operation).insert("bd", body);
		self.queue.push_back((request, ret));
		self.pump(cx);
	}

	fn pump(&mut self, cx: CX![]) {
		if self.state != State::Connected || self.outstanding.is_some() {
			return;
		}

		let Some((mut request, ret)) = self.queue.pop_front() else {
			return;
		};

		let seq = self.seq;
		request = request.insert("s", seq as i64);

		let Some(io) = &self.io else {
			return ret.ret(Err(RelayError::Timeout));
		};

		let encoded = dict::encode(&request);

		if io.write(|buf| buf.push(encoded.as_slice())).is_err() {
			warn!("Failed to write relay request, will be resent after reconnect");
			self.queue.push_front((request, ret));
			return;
		}

		let actor = cx.access_actor().clone();
		let armed = cx.after(RESPONSE_TIMEOUT, move |s| {
			actor.apply(s, move |this, cx| this.on_response_timeout(cx, seq));
		});

		self.outstanding = Some(Outstanding { seq, ret, armed });
	}

	fn on_response_timeout(&mut self, cx: CX![], seq: u32) {
		let Some(outstanding) = &self.outstanding else { return };

		if outstanding.seq != seq {
			return;
		}

		let Outstanding { ret, .. } = self.outstanding.take().expect("checked above");
		ret.ret(Err(RelayError::Timeout));

		// The receive path advances the counter on timeout to unblock subsequent
		// sends; a late response bearing the old `s` is discarded on arrival.
		self.seq += 1;
		self.pump(cx);
	}

	fn begin_connect(&mut self, cx: CX![]) {
		self.state = State::Connecting;

		let addr = format!("{}:{}", self.host, self.port);
		let resolved = addr.to_socket_addrs().ok().and_then(|mut it| it.next());

		let Some(addr) = resolved else {
			warn!("Failed to resolve relay host {}", self.host);
			return self.schedule_reconnect(cx);
		};

		let socket = match TcpStream::connect_timeout(&addr, CONNECT_ATTEMPT_TIMEOUT) {
			Ok(socket) => socket,
			Err(err) => {
				warn!("Failed to connect to relay {}: {err}", self.host);
				return self.schedule_reconnect(cx);
			}
		};

		if socket.set_nonblocking(true).is_err() {
			warn!("Failed to set relay socket non-blocking");
			return self.schedule_reconnect(cx);
		}

		let read_fwd = fwd_to!([cx], read() as (Slice));
		self.io = Some(Io::new(socket, read_fwd));
		self.backoff = BACKOFF_INITIAL;

		self.send_welcome();
	}

	fn send_welcome(&mut self) {
		let request = Dict::new().insert("t", "q").insert("q", op::WELCOME).insert("s", 0i64).insert("bd", crate::ops::welcome_request(CLIENT_VERSION));
		let encoded = dict::encode(&request);

		if let Some(io) = &self.io {
			let _ = io.write(|buf| buf.push(encoded.as_slice()));
		}
	}

	/// Arms a reconnect attempt after an exponential backoff (capped at
	/// [`BACKOFF_CAP`]) plus jitter.
	///
	/// Manual/integration scenario (needs a real TCP peer, not a unit test):
	/// with a live relay connection, the server closes the TCP connection
	/// mid-session. The client must observe `on_disconnect`
	/// ([`on_disconnected`](Self::on_disconnected)), retry here with backoff
	/// never exceeding `BACKOFF_CAP` (5s), and on the next successful
	/// `Welcome` fire `on_reconnected` with the sequence counter reset to 0
	/// (see [`handle_welcome`](Self::handle_welcome)).
	fn schedule_reconnect(&mut self, cx: CX![]) {
		self.state = State::Disconnected;
		self.io = None;

		let jitter = Duration::from_millis(rand::thread_rng().gen_range(100..=500));
		let delay = self.backoff + jitter;
		self.backoff = (self.backoff * 2).min(BACKOFF_CAP);

		let deadline = cx.now() + delay;
		stakker::timer_max!(&mut self.reconnect_timer, deadline, [cx], begin_connect());
	}

	fn read(&mut self, cx: CX![], buf: Slice) {
		if buf.is_empty() {
			info!("Relay connection closed by peer");
			self.on_disconnected(cx);
			return;
		}

		self.recv_buf.extend_from_slice(&buf);

		loop {
			let (message, consumed) = match dict::decode_one(&self.recv_buf) {
				Ok(parsed) => parsed,
				Err(_) => break,
			};

			self.recv_buf.drain(..consumed);
			self.handle_message(cx, message);
		}
	}

	fn on_disconnected(&mut self, cx: CX![]) {
		let was_connected = self.state == State::Connected;

		self.state = State::Disconnected;
		self.io = None;
		self.recv_buf.clear();

		if let Some(Outstanding { ret, armed, .. }) = self.outstanding.take() {
			cx.timer_max_del(armed);
			ret.ret(Err(RelayError::Timeout));
		}

		self.queue.clear();

		if was_connected {
			self.on_disconnect.fwd(());
		}

		self.schedule_reconnect(cx);
	}

	fn handle_message(&mut self, cx: CX![], message: Dict) {
		let Some(kind) = message.get("t").and_then(crate::dict::Value::as_str) else {
			return warn!("Malformed relay message: missing 't'");
		};

		let Some(operation) = message.get("q").and_then(crate::dict::Value::as_str) else {
			return warn!("Malformed relay message: missing 'q'");
		};

		let body = message.get("bd").and_then(crate::dict::Value::as_dict).cloned().unwrap_or_default();
		let seq = message.get("s").and_then(crate::dict::Value::as_int);

		if operation == op::WELCOME && self.state == State::Connecting {
			return self.handle_welcome(cx, kind, body);
		}

		match kind {
			"q" => {}
			"r" | "e" => self.handle_response(cx, kind, operation, body, seq),
			_ => warn!("Unknown relay message type {kind:?}"),
		}
	}

	fn handle_welcome(&mut self, cx: CX![], kind: &str, body: Dict) {
		if kind != "r" {
			error!("Relay rejected welcome handshake");
			return self.on_disconnected(cx);
		}

		let Some(server_version) = body.get("ver").and_then(crate::dict::Value::as_str) else {
			error!("Malformed welcome response from relay");
			return self.on_disconnected(cx);
		};

		if server_version != CLIENT_VERSION {
			let err = RelayError::VersionMismatch { client: CLIENT_VERSION.to_owned(), server: server_version.to_owned() };
			error!("{err}");

			self.state = State::Fatal;
			self.io = None;
			cx.timer_max_del(self.reconnect_timer);
			self.on_fatal.fwd(err);
			return;
		}

		self.state = State::Connected;
		self.seq = 0;

		if self.ever_connected {
			self.on_reconnected.fwd(());
		}

		self.ever_connected = true;
		self.pump(cx);
	}

	fn handle_response(&mut self, cx: CX![], kind: &str, operation: &str, body: Dict, seq: Option<i64>) {
		if let Some(handler) = self.handlers.get(operation) {
			handler.fwd(body.clone());
		}

		let Some(seq) = seq else {
			return;
		};

		let Some(outstanding) = &self.outstanding else {
			return;
		};

		if (seq as u32) < self.seq {
			return warn!("Discarding stale relay response for sequence {seq}, current sequence is {}", self.seq);
		}

		if outstanding.seq != seq as u32 {
			return;
		}

		let Outstanding { ret, armed, .. } = self.outstanding.take().expect("checked above");
		cx.timer_max_del(armed);

		if kind == "e" {
			let message = body.get("msg").and_then(crate::dict::Value::as_str).unwrap_or("relay error").to_owned();
			ret.ret(Err(RelayError::Remote(message)));
		} else {
			ret.ret(Ok(body));
		}

		self.seq += 1;
		self.pump(cx);
	}
}
