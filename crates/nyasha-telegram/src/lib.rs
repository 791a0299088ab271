//! Telegram adapter (teloxide).
//!
//! Implements the `nyasha-core` Transport over the Bot API with `getUpdates`
//! long polling. The update offset is the session's credential blob.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use teloxide::{
    prelude::*,
    types::{AllowedUpdate, ChatId, Update, UpdateKind, UserId},
    ApiError, RequestError,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nyasha_core::{
    config::Config,
    credentials::Credentials,
    domain::{
        DeliveryClass, InboundBatch, InboundContent, InboundMessage, PeerId, PresenceState,
    },
    errors::Error,
    transport::{
        channels, ConnectionEvent, ProtocolVersion, Session, SessionPort, SessionSender,
        Transport, VersionInfo,
    },
    Result,
};

/// Bot API revision targeted by teloxide 0.12.
pub const BOT_API_VERSION: ProtocolVersion = ProtocolVersion::new(6, 5, 0);

const OFFSET_KEY: &str = "update_offset";
const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    poll_timeout: Duration,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>, poll_timeout: Duration) -> Result<Self> {
        // The HTTP timeout has to outlive a full long poll.
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_timeout.saturating_add(Duration::from_secs(10)))
            .build()
            .map_err(|e| Error::Config(format!("telegram http client: {e}")))?;
        Ok(Self {
            bot: Bot::with_client(token.into(), client),
            poll_timeout,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.telegram_bot_token.clone(), cfg.telegram_poll_timeout)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn latest_version(&self) -> Result<VersionInfo> {
        // The Bot API has no version endpoint; the client's revision is authoritative.
        Ok(VersionInfo {
            version: BOT_API_VERSION,
            is_latest: true,
        })
    }

    fn fallback_version(&self) -> ProtocolVersion {
        BOT_API_VERSION
    }

    async fn connect(
        &self,
        credentials: Option<Credentials>,
        version: ProtocolVersion,
    ) -> Result<Session> {
        let offset = stored_offset(credentials.as_ref());
        debug!(%version, ?offset, "telegram connect");

        let (tx, events) = channels(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let poller = Poller {
            bot: self.bot.clone(),
            tx,
            cancel: cancel.clone(),
            poll_timeout: self.poll_timeout,
            offset,
        };
        tokio::spawn(poller.run());

        let port = Arc::new(TelegramPort::new(self.bot.clone()));
        Ok(Session::new(port, events).with_guard(cancel.drop_guard()))
    }
}

/// Outbound side of a Telegram session.
#[derive(Clone)]
pub struct TelegramPort {
    bot: Bot,
}

impl TelegramPort {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(peer: &PeerId) -> Result<ChatId> {
        peer.as_str()
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| Error::External(format!("not a telegram chat id: {peer}")))
    }

    fn map_err(e: RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

#[async_trait]
impl SessionPort for TelegramPort {
    async fn send_text(&self, to: &PeerId, text: &str) -> Result<()> {
        let chat = Self::tg_chat(to)?;
        self.with_retry(|| self.bot.send_message(chat, text.to_string()))
            .await?;
        Ok(())
    }

    async fn send_presence(&self, to: &PeerId, state: PresenceState) -> Result<()> {
        match state {
            PresenceState::Composing => {
                let chat = Self::tg_chat(to)?;
                self.with_retry(|| {
                    self.bot
                        .send_chat_action(chat, teloxide::types::ChatAction::Typing)
                })
                .await?;
            }
            // Telegram clears the typing indicator on its own.
            PresenceState::Paused => {}
        }
        Ok(())
    }
}

struct Poller {
    bot: Bot,
    tx: SessionSender,
    cancel: CancellationToken,
    poll_timeout: Duration,
    offset: Option<i32>,
}

impl Poller {
    async fn run(mut self) {
        let me = tokio::select! {
            _ = self.cancel.cancelled() => return,
            r = self.bot.get_me().send() => r,
        };
        let me = match me {
            Ok(me) => me,
            Err(e) => {
                self.close(&e).await;
                return;
            }
        };
        info!(username = %me.username(), "telegram bot authenticated");
        if self.tx.connection.send(ConnectionEvent::Open).await.is_err() {
            return;
        }

        // Without a stored offset, whatever is queued server-side is backlog.
        let mut replaying = self.offset.is_none();
        loop {
            // Backlog is fetched without waiting so fresh messages are not mistaken for it.
            let timeout = if replaying {
                0
            } else {
                poll_timeout_secs(self.poll_timeout)
            };
            let mut req = self
                .bot
                .get_updates()
                .timeout(timeout)
                .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::EditedMessage]);
            if let Some(offset) = self.offset {
                req = req.offset(offset);
            }

            let updates = tokio::select! {
                _ = self.cancel.cancelled() => return,
                r = req.send() => r,
            };
            let updates = match updates {
                Ok(u) => u,
                Err(e) => {
                    self.close(&e).await;
                    return;
                }
            };

            let batches = inbound_batches(&updates, me.id, replaying);
            replaying = still_replaying(replaying, updates.len());
            let Some(last) = updates.iter().map(|u| u.id).max() else {
                continue;
            };

            for batch in batches {
                if self.tx.inbound.send(batch).await.is_err() {
                    return;
                }
            }

            let next = last + 1;
            self.offset = Some(next);
            if let Err(e) = self.tx.persist(offset_credentials(next)).await {
                warn!(error = %e, "could not persist telegram update offset");
                return;
            }
        }
    }

    async fn close(&self, e: &RequestError) {
        let event = ConnectionEvent::Close {
            reason: format!("telegram error: {e}"),
            is_terminal: is_terminal(e),
        };
        let _ = self.tx.connection.send(event).await;
    }
}

/// The bot token was revoked or never valid.
///
/// teloxide reports the Bot API's "Unauthorized" reply as `NotFound`.
fn is_terminal(e: &RequestError) -> bool {
    matches!(e, RequestError::Api(ApiError::NotFound))
}

/// Backlog pages are drained with zero-timeout polls until one comes back empty.
fn still_replaying(replaying: bool, fetched: usize) -> bool {
    replaying && fetched > 0
}

fn poll_timeout_secs(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX)
}

/// Every update is an independent event, so each gets its own batch.
fn inbound_batches(updates: &[Update], me: UserId, replaying: bool) -> Vec<InboundBatch> {
    updates
        .iter()
        .filter_map(|u| to_inbound(u, me, replaying))
        .map(|m| vec![m])
        .collect()
}

fn stored_offset(credentials: Option<&Credentials>) -> Option<i32> {
    let value = credentials?.0.get(OFFSET_KEY)?;
    let offset = value.as_i64().and_then(|n| i32::try_from(n).ok());
    if offset.is_none() {
        warn!(%value, "ignoring malformed telegram update offset");
    }
    offset
}

fn offset_credentials(offset: i32) -> Credentials {
    Credentials(json!({ OFFSET_KEY: offset }))
}

fn to_inbound(update: &Update, me: UserId, replaying: bool) -> Option<InboundMessage> {
    let (msg, edited) = match &update.kind {
        UpdateKind::Message(m) => (m, false),
        UpdateKind::EditedMessage(m) => (m, true),
        _ => return None,
    };

    let delivery = if replaying {
        DeliveryClass::Replay
    } else if edited {
        DeliveryClass::Edit
    } else {
        DeliveryClass::Append
    };

    Some(InboundMessage {
        sender: PeerId::new(msg.chat.id.0.to_string()),
        is_from_self: msg.from().is_some_and(|u| u.id == me),
        delivery,
        content: vec![content_of(
            msg.text(),
            msg.caption(),
            msg.reply_to_message().is_some(),
            msg.photo().is_some(),
            msg.video().is_some(),
        )],
    })
}

fn content_of(
    text: Option<&str>,
    caption: Option<&str>,
    is_reply: bool,
    has_photo: bool,
    has_video: bool,
) -> InboundContent {
    let owned = |s: &str| s.to_string();
    match (text, caption) {
        (Some(t), _) if is_reply => InboundContent::ExtendedText(owned(t)),
        (Some(t), _) => InboundContent::Conversation(owned(t)),
        (None, Some(c)) if has_photo => InboundContent::ImageCaption(owned(c)),
        (None, Some(c)) if has_video => InboundContent::VideoCaption(owned(c)),
        _ => InboundContent::Unsupported,
    }
}
