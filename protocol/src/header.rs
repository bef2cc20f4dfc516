use core::mem::size_of;

use utils::bytes::Cast;
use utils::endian::u32be;

/// The kind of a packet, carried in [`Header::kind`].
///
/// `Seq` carries an encrypted application payload; `Enk` carries a raw
/// ephemeral public key; `EnkAck` confirms receipt of the peer's key; `Ack`
/// acknowledges a `Seq` packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PacketKind {
	Seq = 0,
	Enk = 1,
	EnkAck = 2,
	Ack = 3,
}

impl TryFrom<u32> for PacketKind {
	type Error = ();

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::Seq),
			1 => Ok(Self::Enk),
			2 => Ok(Self::EnkAck),
			3 => Ok(Self::Ack),
			_ => Err(()),
		}
	}
}

impl From<PacketKind> for u32 {
	fn from(value: PacketKind) -> Self {
		value as u32
	}
}

/// The 20-byte, big-endian-throughout header shared by every packet on the wire.
#[derive(Clone, Copy, Cast)]
#[repr(C)]
pub struct Header {
	pub protocol_id: u32be,
	pub kind: u32be,
	/// Reserved. Always zero on write; ignored on read.
	pub checksum: u32be,
	pub packet_id: u32be,
	pub ack: u32be,
}

pub const HEADER_LEN: usize = size_of::<Header>();

impl Header {
	pub fn new(protocol_id: u32, kind: PacketKind, packet_id: u32, ack: u32) -> Self {
		Self {
			protocol_id: protocol_id.into(),
			kind: u32::from(kind).into(),
			checksum: 0u32.into(),
			packet_id: packet_id.into(),
			ack: ack.into(),
		}
	}

	pub fn kind(&self) -> Option<PacketKind> {
		PacketKind::try_from(self.kind.get()).ok()
	}
}

/// Decode a [`Header`] from the front of `buf`. Rejects anything shorter than [`HEADER_LEN`].
pub fn decode(buf: &[u8]) -> Option<&Header> {
	if buf.len() < HEADER_LEN {
		return None;
	}

	Some(utils::bytes::cast(&buf[..HEADER_LEN]))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_round_trip() {
		let h = Header::new(0x0102_0304, PacketKind::Seq, 7, 7);
		let bytes = utils::bytes::as_slice::<u8, _>(&h);

		assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);

		let decoded = decode(bytes).expect("header decodes");
		assert_eq!(decoded.protocol_id.get(), 0x0102_0304);
		assert_eq!(decoded.kind(), Some(PacketKind::Seq));
		assert_eq!(decoded.packet_id.get(), 7);
		assert_eq!(decoded.ack.get(), 7);
	}

	#[test]
	fn rejects_short_buffers() {
		assert!(decode(&[0u8; HEADER_LEN - 1]).is_none());
	}

	#[test]
	fn kind_round_trips() {
		for kind in [PacketKind::Seq, PacketKind::Enk, PacketKind::EnkAck, PacketKind::Ack] {
			assert_eq!(PacketKind::try_from(u32::from(kind)), Ok(kind));
		}

		assert_eq!(PacketKind::try_from(4), Err(()));
	}
}
