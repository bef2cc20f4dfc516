pub mod channel;
pub mod dict;
pub mod ops;
pub mod persist;

pub use channel::{RelayChannel, RelayError, CLIENT_VERSION};
pub use dict::{Dict, Value};
