use std::fmt;

/// Network-level address of a chat peer (sender of an inbound message, recipient of a reply).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typing indicator shown to a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceState {
    Composing,
    Paused,
}

/// How the network delivered a message.
///
/// Only `Append` messages are genuinely new and eligible for a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryClass {
    Append,
    /// Backlog or history sync.
    Replay,
    Edit,
}

/// One content sub-field of an inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundContent {
    Conversation(String),
    /// Text carrying extra context (quote, link preview, reply).
    ExtendedText(String),
    ImageCaption(String),
    VideoCaption(String),
    Unsupported,
}

impl InboundContent {
    /// Extraction priority; lower wins.
    fn rank(&self) -> Option<u8> {
        match self {
            InboundContent::Conversation(_) => Some(0),
            InboundContent::ExtendedText(_) => Some(1),
            InboundContent::ImageCaption(_) => Some(2),
            InboundContent::VideoCaption(_) => Some(3),
            InboundContent::Unsupported => None,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            InboundContent::Conversation(t)
            | InboundContent::ExtendedText(t)
            | InboundContent::ImageCaption(t)
            | InboundContent::VideoCaption(t) => Some(t.as_str()),
            InboundContent::Unsupported => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub sender: PeerId,
    pub is_from_self: bool,
    pub delivery: DeliveryClass,
    pub content: Vec<InboundContent>,
}

impl InboundMessage {
    /// Text of the highest-priority non-empty content field.
    ///
    /// Priority: conversation, extended text, image caption, video caption.
    /// Whitespace-only fields are kept here; the router decides what to drop.
    pub fn extract_text(&self) -> Option<&str> {
        self.content
            .iter()
            .filter_map(|c| Some((c.rank()?, c.text()?)))
            .filter(|(_, text)| !text.is_empty())
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, text)| text)
    }

    /// A new message from someone else.
    pub fn is_eligible(&self) -> bool {
        !self.is_from_self && self.delivery == DeliveryClass::Append
    }
}

/// A batch of messages delivered by one network event.
pub type InboundBatch = Vec<InboundMessage>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub recipient: PeerId,
    pub text: String,
}
