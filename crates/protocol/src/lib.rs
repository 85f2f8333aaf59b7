pub mod config;
pub mod ice;
pub mod messages;

pub use config::*;
pub use ice::*;
pub use messages::*;
