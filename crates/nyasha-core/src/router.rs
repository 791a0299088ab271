//! Inbound message routing: filter, prompt, complete, type, reply.

use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    clock::{Clock, TypingDelay},
    completion::CompletionClient,
    domain::{InboundBatch, OutboundReply, PeerId, PresenceState},
    persona::{strip_persona_echo, Persona},
    session::SessionAttach,
    transport::SessionPort,
    Result,
};

/// What happened to one eligible message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Replied(OutboundReply),
    CompletionFailed,
    /// The model answered with nothing once the persona echo was removed.
    EmptyReply,
}

#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    persona: Persona,
    completion: Arc<dyn CompletionClient>,
    clock: Arc<dyn Clock>,
    typing_delay: TypingDelay,
}

impl MessageRouter {
    pub fn new(
        persona: Persona,
        completion: Arc<dyn CompletionClient>,
        clock: Arc<dyn Clock>,
        typing_delay: TypingDelay,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                persona,
                completion,
                clock,
                typing_delay,
            }),
        }
    }

    /// Run the reply pipeline for one already-filtered message.
    pub async fn handle(
        &self,
        port: &dyn SessionPort,
        sender: &PeerId,
        text: &str,
    ) -> Result<Outcome> {
        self.inner.handle(port, sender, text).await
    }
}

impl RouterInner {
    async fn handle(&self, port: &dyn SessionPort, sender: &PeerId, text: &str) -> Result<Outcome> {
        info!(%sender, "received: {text}");

        let prompt = self.persona.build(text);
        let raw = match self.completion.complete(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                if e.is_completion() {
                    warn!(%sender, error = %e, "completion failed; dropping message");
                } else {
                    error!(%sender, error = %e, "completion client error; dropping message");
                }
                // Don't leave a stuck "composing" indicator behind.
                if let Err(e) = port.send_presence(sender, PresenceState::Paused).await {
                    warn!(%sender, error = %e, "failed to clear presence");
                }
                return Ok(Outcome::CompletionFailed);
            }
        };

        let reply = strip_persona_echo(&raw);
        if reply.is_empty() {
            debug!(%sender, "model reply empty after clean-up");
            return Ok(Outcome::EmptyReply);
        }

        info!(%sender, "replying: {reply}");
        port.send_presence(sender, PresenceState::Composing).await?;
        self.clock.sleep(self.typing_delay.sample()).await;
        port.send_text(sender, &reply).await?;
        port.send_presence(sender, PresenceState::Paused).await?;

        Ok(Outcome::Replied(OutboundReply {
            recipient: sender.clone(),
            text: reply,
        }))
    }
}

impl SessionAttach for MessageRouter {
    fn attach(
        &self,
        port: Arc<dyn SessionPort>,
        mut inbound: mpsc::Receiver<InboundBatch>,
    ) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut queues = SenderQueues::default();
            while let Some(batch) = inbound.recv().await {
                let Some((sender, text)) = select_eligible(batch) else {
                    continue;
                };

                let inner = inner.clone();
                let port = port.clone();
                let key = sender.clone();
                queues.enqueue(key, async move {
                    if let Err(e) = inner.handle(port.as_ref(), &sender, &text).await {
                        error!(%sender, error = %e, "error handling message");
                    }
                });
            }
            debug!("inbound stream closed; waiting for in-flight replies");
            queues.drain().await;
        })
    }
}

/// Pick the message a batch should be answered for, with its text.
///
/// Only the first message of a batch is considered; it must be a new message from
/// a peer with non-blank text. Everything else is dropped without a trace.
pub fn select_eligible(batch: InboundBatch) -> Option<(PeerId, String)> {
    let msg = batch.into_iter().next()?;
    if !msg.is_eligible() {
        return None;
    }
    let text = msg.extract_text()?;
    if text.trim().is_empty() {
        return None;
    }
    let text = text.to_string();
    Some((msg.sender, text))
}

/// Serializes pipelines per sender while letting different senders overlap.
///
/// Each new job waits for the previous job of the same sender, so replies go out
/// in receipt order. Jobs run in their own task; a panic is logged and the chain
/// continues.
#[derive(Default)]
struct SenderQueues {
    tails: HashMap<PeerId, JoinHandle<()>>,
}

impl SenderQueues {
    fn enqueue<F>(&mut self, sender: PeerId, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tails.retain(|_, tail| !tail.is_finished());
        let prev = self.tails.remove(&sender);
        let who = sender.clone();

        let tail = tokio::spawn(async move {
            if let Some(prev) = prev {
                let _ = prev.await;
            }
            if let Err(e) = tokio::spawn(job).await {
                if e.is_panic() {
                    error!(sender = %who, "message pipeline panicked");
                }
            }
        });
        self.tails.insert(sender, tail);
    }

    async fn drain(&mut self) {
        for (_, tail) in self.tails.drain() {
            let _ = tail.await;
        }
    }
}
