//! Surfaced errors, per the error taxonomy: transient I/O and protocol
//! violations are handled internally (logged and dropped); only these are
//! returned to callers.

use std::net::SocketAddrV4;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
	#[error("send window is full, caller must back off")]
	WouldBlock,
	#[error("channel is not connected")]
	NotConnected,
	#[error("handshake with {remote} did not complete before cancellation")]
	HandshakeExhausted { remote: SocketAddrV4 },
}

#[derive(Debug, thiserror::Error)]
pub enum RaceError {
	#[error("all {attempted} candidate endpoints failed to complete a handshake")]
	AllFailed { attempted: usize },
}
