//! Shared types for the ffb matchmaker/gateway contract.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
