//! The Rendezvous Race: attempt a handshake against several candidate
//! endpoints in parallel over sockets sharing one local port, and settle on
//! whichever [`crate::session::Channel`] establishes first.

use std::net::SocketAddrV4;
use std::time::Duration;

use log::{info, warn};
use protocol::ProtocolId;
use stakker::{actor, fwd_to, ret_nop, ActorOwn, Fwd, Ret, CX};

use crate::error::RaceError;
use crate::session::{self, Channel};

/// Losing candidates are given this long to drain any in-flight packets
/// before their sockets are dropped.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// If no candidate has established a session by this deadline, the race
/// fails with [`RaceError::AllFailed`].
const RACE_TIMEOUT: Duration = Duration::from_secs(12);

pub struct RendezvousRace {
	protocol_id: ProtocolId,
	w: u32,
	local: SocketAddrV4,
	candidates: Vec<(SocketAddrV4, ActorOwn<Channel>)>,
	settled: bool,
	attempted: usize,
	outcome: Option<Ret<Result<ActorOwn<Channel>, RaceError>>>,
}

impl RendezvousRace {
	/// Start a handshake against every address in `remotes` from `local`
	/// (bound with `SO_REUSEADDR` so all candidates may share it), reporting
	/// the winner - or [`RaceError::AllFailed`] - to `outcome`.
	///
	/// Manual/integration scenario (needs real sockets, not a unit test):
	/// given 3 candidate endpoints where only the second ever accepts
	/// traffic, the race must settle on the channel for endpoint 2, and the
	/// sockets for endpoints 1 and 3 must be closed (see
	/// [`on_established`](Self::on_established)'s `CANCEL_GRACE` deferral)
	/// within 500 ms of endpoint 2's handshake completing.
	pub fn init(
		cx: CX![],
		local: SocketAddrV4,
		remotes: Vec<SocketAddrV4>,
		protocol_id: ProtocolId,
		w: u32,
		deliver: Fwd<Vec<u8>>,
		outcome: Ret<Result<ActorOwn<Channel>, RaceError>>,
	) -> Option<Self> {
		if remotes.is_empty() {
			outcome.ret(Err(RaceError::AllFailed { attempted: 0 }));
			return None;
		}

		let mut this = Self { protocol_id, w, local, candidates: Vec::new(), settled: false, attempted: remotes.len(), outcome: Some(outcome) };

		for remote in remotes {
			this.spawn_candidate(cx, remote, deliver.clone());
		}

		let actor = cx.access_actor().clone();
		cx.after(RACE_TIMEOUT, move |s| {
			actor.apply(s, |this, cx| this.on_timeout(cx));
		});

		Some(this)
	}

	/// Fires [`RACE_TIMEOUT`] after start if nobody has settled yet. Part of
	/// the race-cancellation manual scenario documented on
	/// [`init`](Self::init): the losing-candidate teardown path this takes
	/// is the all-failed counterpart to the normal winner-settles path.
	fn on_timeout(&mut self, cx: CX![]) {
		if self.settled {
			return;
		}

		self.settled = true;

		for (_, loser) in self.candidates.drain(..) {
			cx.defer(move |s| loser.apply(s, |ch, cx| ch.close(cx)));
		}

		if let Some(outcome) = self.outcome.take() {
			outcome.ret(Err(RaceError::AllFailed { attempted: self.attempted }));
		}
	}

	fn spawn_candidate(&mut self, cx: CX![], remote: SocketAddrV4, deliver: Fwd<Vec<u8>>) {
		let socket = match session::bind_reuseaddr(self.local) {
			Ok(socket) => socket,
			Err(err) => {
				warn!("Failed to bind race candidate socket for {remote}: {err}");
				return;
			}
		};

		let established = fwd_to!([cx], on_established(remote) as (bool));

		let channel = actor!(cx, Channel::connect(socket, remote, self.protocol_id, self.w, deliver, established), ret_nop!());

		self.candidates.push((remote, channel));
	}

	fn on_established(&mut self, cx: CX![], remote: SocketAddrV4, ok: bool) {
		if !ok || self.settled {
			return;
		}

		let Some(idx) = self.candidates.iter().position(|(addr, _)| *addr == remote) else {
			return;
		};

		let (_, winner) = self.candidates.remove(idx);
		self.settled = true;
		info!("Rendezvous race settled on {remote}");

		for (_, loser) in self.candidates.drain(..) {
			cx.after(CANCEL_GRACE, move |s| {
				loser.apply(s, |ch, cx| ch.close(cx));
			});
		}

		if let Some(outcome) = self.outcome.take() {
			outcome.ret(Ok(winner));
		}
	}
}
