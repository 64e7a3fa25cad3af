//! Transport layer for host-attached shells.
//!
//! Provides:
//! - Endpoint manager (Unix socket rendezvous)
//! - Wire protocol (line-oriented text + exit sentinel)
//! - Reconnecting client connector
//! - Local terminal bridge (feature: terminal)

pub mod connector;
pub mod endpoint;
pub mod protocol;
pub mod terminal;

pub use connector::{ClientExit, ConnectionState, Connector, ConnectorError};
pub use endpoint::{DialFailure, Endpoint, EndpointError};
pub use protocol::{EXIT_SENTINEL, LineScanner};
pub use terminal::{BannerStyle, ClientTerminal, MemoryTerminal};
