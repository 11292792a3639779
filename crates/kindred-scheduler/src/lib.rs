pub mod config;
pub mod manager;

pub use config::*;
pub use manager::*;
