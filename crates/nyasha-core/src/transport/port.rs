use async_trait::async_trait;

use crate::{
    credentials::Credentials,
    domain::{PeerId, PresenceState},
    transport::types::{ProtocolVersion, Session, VersionInfo},
    Result,
};

/// Outbound operations of one live session.
#[async_trait]
pub trait SessionPort: Send + Sync {
    async fn send_text(&self, to: &PeerId, text: &str) -> Result<()>;
    async fn send_presence(&self, to: &PeerId, state: PresenceState) -> Result<()>;
}

/// A messaging network the bot can hold a session with.
///
/// Every call to [`Transport::connect`] yields a fresh [`Session`]; sessions are
/// never reused after they close.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Ask the network for the newest protocol version it supports.
    async fn latest_version(&self) -> Result<VersionInfo>;

    /// Known-good version used when negotiation fails.
    fn fallback_version(&self) -> ProtocolVersion;

    async fn connect(
        &self,
        credentials: Option<Credentials>,
        version: ProtocolVersion,
    ) -> Result<Session>;
}
