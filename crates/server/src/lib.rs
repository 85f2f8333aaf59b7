pub mod session;
pub mod signaling;

pub use session::{PeerHandle, ReceiverWelcome, RegisterError, SessionDirectory};
pub use signaling::{SharedDirectory, router};
