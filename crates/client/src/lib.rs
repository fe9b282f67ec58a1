//! FFB Client - matchmaker synchronization core
//!
//! Keeps a local table of cars consistent with the matchmaker through a live
//! event stream plus request/response actions, and derives a status line for
//! whatever renderer sits on top.

pub mod api_client;
pub mod config;
pub mod error;
pub mod events;
pub mod status;
pub mod store;
pub mod sync;
pub mod transport;
pub mod view;

pub use api_client::ApiClient;
pub use config::{ConfigError, EndpointConfig, ShellCapabilities};
pub use error::SyncError;
pub use events::{ConnectionState, ReconnectConfig};
pub use status::{Action, ActionOutcome, StatusLine, Tone};
pub use store::TableSnapshot;
pub use sync::{Released, SyncClient, SyncClientBuilder};
pub use transport::{HttpTransport, ResourceTransport, SessionToken};
pub use view::CarRow;
