pub mod config;
pub mod delay;
pub mod directory;
pub mod error;
pub mod responder;
pub mod session;
pub mod templates;
pub mod typing;

pub use config::*;
pub use delay::*;
pub use directory::*;
pub use error::*;
pub use responder::*;
pub use session::*;
pub use templates::*;
pub use typing::*;
