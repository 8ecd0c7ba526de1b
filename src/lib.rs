// Emergency messaging over a point-to-point serial radio bridge
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod location;
pub mod models;
pub mod observer;
pub mod sos;
pub mod terminal;
pub mod transport;

// Re-export main types for convenience
pub use config::Config;
pub use connection::{Connection, ConnectionEvent, ConnectionState, Inbound};
pub use error::{ConnectionError, LocationError, ParseError, TerminalError, ValidationError};
pub use location::{FixedLocationPlatform, LocationPlatform, LocationProvider};
pub use models::*;
pub use terminal::{Terminal, TerminalEvent, TerminalHandle};
pub use transport::{TcpTransport, Transport};
