//! Browser runtime for slotclaim: DevTools transport and connection, endpoint
//! discovery and local browser launch.

pub mod connection;
pub mod discovery;
pub mod error;
pub mod fake_transport;
pub mod launcher;
pub mod process;
pub mod transport;

pub use connection::Connection;
pub use discovery::{fetch_version, fetch_version_on_port, resolve_ws_endpoint};
pub use error::{Error, Result};
pub use launcher::{BrowserProcess, LaunchOptions, launch};
pub use transport::{Transport, TransportParts, TransportReceiver, WebSocketTransport};
