//! Messaging-network abstractions: the transport that opens sessions and the
//! port a live session exposes for outbound traffic.

pub mod port;
pub mod types;

pub use port::{SessionPort, Transport};
pub use types::{
    channels, ConnectionEvent, CredentialUpdate, ProtocolVersion, Session, SessionEvents,
    SessionSender, VersionInfo,
};
