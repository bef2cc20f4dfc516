use sha2::{Digest, Sha256};

/// An application-specific tag carried in every UDP header, isolating concurrent
/// application protocols that happen to share a machine.
pub type ProtocolId = u32;

/// Derive a [`ProtocolId`] from an application name.
///
/// Takes the first four bytes of the name's SHA-256 digest, interpreted as a
/// big-endian `u32`, reduced modulo one million. Both peers must be configured
/// with the same application name for their datagrams to match.
pub fn protocol_id(app_name: &str) -> ProtocolId {
	let digest = Sha256::digest(app_name.as_bytes());
	let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
	n % 1_000_000
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn deterministic() {
		assert_eq!(protocol_id("chat"), protocol_id("chat"));
	}

	#[test]
	fn bounded() {
		assert!(protocol_id("chat") < 1_000_000);
		assert!(protocol_id("") < 1_000_000);
	}

	#[test]
	fn distinguishes_names() {
		assert_ne!(protocol_id("chat"), protocol_id("chat2"));
	}
}
