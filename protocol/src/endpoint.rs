use core::net::{Ipv4Addr, SocketAddrV4};

/// The number of bytes a [`SocketAddrV4`] occupies when compact-encoded.
pub const COMPACT_LEN: usize = 6;

/// Encode an endpoint as 4 bytes of IPv4 address followed by 2 bytes of port, both network order.
pub fn encode(ep: SocketAddrV4) -> [u8; COMPACT_LEN] {
	let mut out = [0u8; COMPACT_LEN];
	out[..4].copy_from_slice(&ep.ip().octets());
	out[4..].copy_from_slice(&ep.port().to_be_bytes());
	out
}

/// Decode a compact endpoint. Fails if `buf` is not exactly [`COMPACT_LEN`] bytes.
pub fn decode(buf: &[u8]) -> Option<SocketAddrV4> {
	let buf: &[u8; COMPACT_LEN] = buf.try_into().ok()?;

	let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
	let port = u16::from_be_bytes([buf[4], buf[5]]);

	Some(SocketAddrV4::new(ip, port))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip() {
		let ep = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 5), 51820);
		let bytes = encode(ep);
		assert_eq!(decode(&bytes), Some(ep));
	}

	#[test]
	fn rejects_wrong_length() {
		assert_eq!(decode(&[0u8; 5]), None);
		assert_eq!(decode(&[0u8; 7]), None);
	}
}
