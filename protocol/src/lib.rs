//! Wire-level definitions shared by the transport and relay crates: the fixed
//! packet header, the protocol identifier derivation, and the compact
//! endpoint encoding used both on the UDP wire and inside relay dictionaries.

pub mod endpoint;
pub mod header;
pub mod id;

pub use header::{decode, Header, PacketKind, HEADER_LEN};
pub use id::{protocol_id, ProtocolId};
