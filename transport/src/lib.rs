pub mod crypto;
pub mod error;
pub mod handshake;
pub mod race;
pub mod session;
pub mod window;

pub use error::{ChannelError, RaceError};
pub use race::RendezvousRace;
pub use session::{Channel, ChannelState, DEFAULT_WINDOW, RING_CAPACITY};
