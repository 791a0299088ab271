//! Test doubles shared by the router, session manager and orchestrator tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    clock::Clock,
    completion::CompletionClient,
    credentials::{CredentialStore, Credentials},
    domain::{DeliveryClass, InboundBatch, InboundContent, InboundMessage, PeerId, PresenceState},
    errors::Error,
    session::SessionAttach,
    transport::{
        channels, ProtocolVersion, Session, SessionPort, SessionSender, Transport, VersionInfo,
    },
    Result,
};

/// Clock that never waits and remembers every sleep.
#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortCall {
    Text(PeerId, String),
    Presence(PeerId, PresenceState),
}

#[derive(Default)]
pub struct RecordingPort {
    calls: Mutex<Vec<PortCall>>,
    failing_texts: AtomicUsize,
}

impl RecordingPort {
    pub fn calls(&self) -> Vec<PortCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PortCall::Text(_, t) => Some(t),
                PortCall::Presence(..) => None,
            })
            .collect()
    }

    /// Make the next `n` text sends fail.
    pub fn fail_next_texts(&self, n: usize) {
        self.failing_texts.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionPort for RecordingPort {
    async fn send_text(&self, to: &PeerId, text: &str) -> Result<()> {
        let failing = self
            .failing_texts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Connection("send failed".to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(PortCall::Text(to.clone(), text.to_string()));
        Ok(())
    }

    async fn send_presence(&self, to: &PeerId, state: PresenceState) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(PortCall::Presence(to.clone(), state));
        Ok(())
    }
}

pub enum Reply {
    Text(String),
    Delayed(Duration, String),
    Fail,
    /// Fails with something other than a completion error.
    Broken,
    Panic,
}

type ReplyFn = dyn Fn(&str) -> Reply + Send + Sync;

/// Completion whose answer is computed from the prompt.
pub struct ScriptedCompletion {
    reply: Box<ReplyFn>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(reply: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Reply::Text(text.clone()))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match (self.reply)(prompt) {
            Reply::Text(t) => Ok(t),
            Reply::Delayed(d, t) => {
                tokio::time::sleep(d).await;
                Ok(t)
            }
            Reply::Fail => Err(Error::Completion("model unavailable".to_string())),
            Reply::Broken => Err(Error::External("client torn down".to_string())),
            Reply::Panic => panic!("completion blew up"),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    initial: Option<Credentials>,
    saves: Mutex<Vec<Credentials>>,
}

impl MemoryStore {
    pub fn with(creds: Credentials) -> Self {
        Self {
            initial: Some(creds),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub fn saves(&self) -> Vec<Credentials> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<Option<Credentials>> {
        Ok(self.saves().last().cloned().or_else(|| self.initial.clone()))
    }

    async fn save(&self, creds: &Credentials) -> Result<()> {
        self.saves.lock().unwrap().push(creds.clone());
        Ok(())
    }
}

pub const LATEST: ProtocolVersion = ProtocolVersion::new(2, 3000, 7);
pub const FALLBACK: ProtocolVersion = ProtocolVersion::new(2, 2400, 0);

/// Transport handing out pre-built sessions in order.
pub struct FakeTransport {
    sessions: Mutex<VecDeque<Result<Session>>>,
    connects: Mutex<Vec<(Option<Credentials>, ProtocolVersion)>>,
    negotiation_fails: bool,
}

impl FakeTransport {
    pub fn new(sessions: Vec<Result<Session>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            connects: Mutex::new(Vec::new()),
            negotiation_fails: false,
        }
    }

    pub fn failing_negotiation(mut self) -> Self {
        self.negotiation_fails = true;
        self
    }

    pub fn connects(&self) -> Vec<(Option<Credentials>, ProtocolVersion)> {
        self.connects.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    async fn latest_version(&self) -> Result<VersionInfo> {
        if self.negotiation_fails {
            return Err(Error::Connection("version endpoint unreachable".to_string()));
        }
        Ok(VersionInfo {
            version: LATEST,
            is_latest: true,
        })
    }

    fn fallback_version(&self) -> ProtocolVersion {
        FALLBACK
    }

    async fn connect(
        &self,
        credentials: Option<Credentials>,
        version: ProtocolVersion,
    ) -> Result<Session> {
        self.connects.lock().unwrap().push((credentials, version));
        self.sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Connection("no more scripted sessions".to_string())))
    }
}

/// Build a session over `port`, returning the sender half for the test to drive.
pub fn scripted_session(port: Arc<RecordingPort>) -> (Session, SessionSender) {
    let (tx, events) = channels(16);
    (Session::new(port, events), tx)
}

/// Attach point that only counts attachments and drains the inbound stream.
#[derive(Default)]
pub struct CountingAttach {
    attached: AtomicUsize,
}

impl CountingAttach {
    pub fn count(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }
}

impl SessionAttach for CountingAttach {
    fn attach(
        &self,
        _port: Arc<dyn SessionPort>,
        mut inbound: mpsc::Receiver<InboundBatch>,
    ) -> JoinHandle<()> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move { while inbound.recv().await.is_some() {} })
    }
}

pub fn text_from(sender: &str, text: &str) -> InboundMessage {
    InboundMessage {
        sender: PeerId::new(sender),
        is_from_self: false,
        delivery: DeliveryClass::Append,
        content: vec![InboundContent::Conversation(text.to_string())],
    }
}

/// Poll `cond` until it holds or a second passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
