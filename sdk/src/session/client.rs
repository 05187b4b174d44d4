//! Reconnecting client session.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use switchboard_core::{Command, Message, MessageKind, Response, TransportKind};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::error::SessionError;
use super::handlers::{HandlerId, HandlerRegistry, HandlerResult};
use super::pending::PendingCommands;
use super::state::SessionState;
use crate::transport::{Connector, EventStreamConnector, FrameSink, Inbound, WebSocketConnector};

/// An open link and the tasks serving it.
struct Link {
    generation: u64,
    connection_id: String,
    sink: Arc<dyn FrameSink>,
    receiver: JoinHandle<()>,
    pinger: Option<JoinHandle<()>>,
}

impl Link {
    async fn teardown(self) {
        if let Some(pinger) = self.pinger {
            pinger.abort();
        }
        self.sink.close().await;
        self.receiver.abort();
    }
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    handlers: HandlerRegistry,
    pending: PendingCommands,
    state: watch::Sender<SessionState>,
    link: Mutex<Option<Link>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    subscriptions: RwLock<BTreeSet<String>>,
    last_event_id: RwLock<Option<String>>,
    closing: AtomicBool,
    attempts: AtomicU32,
    generation: AtomicU64,
}

/// A client session over either transport.
///
/// Cloning is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("url", &self.inner.config.url)
            .field("transport", &self.inner.config.transport)
            .field("state", &*self.inner.state.borrow())
            .field("handlers", &self.inner.handlers)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Creates a session using the connector for the configured transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let connector: Arc<dyn Connector> = match config.transport {
            TransportKind::Socket => Arc::new(WebSocketConnector),
            TransportKind::Stream => Arc::new(EventStreamConnector::new()),
        };
        Self::with_connector(config, connector)
    }

    /// Creates a session with the given URL and default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_url(url: impl Into<String>) -> Result<Self, SessionError> {
        Self::new(SessionConfig::new(url))
    }

    /// Creates a session with a custom connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or does not match
    /// the connector's transport.
    pub fn with_connector(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        if connector.kind() != config.transport {
            return Err(SessionError::InvalidConfig(format!(
                "{} connector for a {} session",
                connector.kind(),
                config.transport
            )));
        }

        let (state, _) = watch::channel(SessionState::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                connector,
                handlers: HandlerRegistry::new(),
                pending: PendingCommands::default(),
                state,
                link: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                subscriptions: RwLock::new(BTreeSet::new()),
                last_event_id: RwLock::new(None),
                closing: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Returns a receiver observing every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Returns true if connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().is_connected()
    }

    /// Returns the server-assigned id of the current link.
    pub async fn connection_id(&self) -> Option<String> {
        self.inner
            .link
            .lock()
            .await
            .as_ref()
            .map(|link| link.connection_id.clone())
    }

    /// Returns the number of commands awaiting a response.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns the id of the last channel message received.
    pub async fn last_event_id(&self) -> Option<String> {
        self.inner.last_event_id.read().await.clone()
    }

    /// Registers a handler for one message kind.
    pub fn on<F>(&self, kind: MessageKind, handler: F) -> HandlerId
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.handlers.on(kind, handler)
    }

    /// Registers a state listener.
    pub fn on_state<F>(&self, listener: F) -> HandlerId
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        self.inner.handlers.on_state(listener)
    }

    /// Removes a handler or state listener.
    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove(id)
    }

    /// Opens the transport.
    ///
    /// If opening fails and auto-reconnect is enabled, the reconnect policy
    /// keeps trying in the background; the error is returned either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            return Ok(());
        }
        let inner = &self.inner;
        inner.closing.store(false, Ordering::SeqCst);
        inner.attempts.store(0, Ordering::SeqCst);
        if let Some(task) = inner.reconnect_task.lock().await.take() {
            task.abort();
        }

        match Inner::establish(inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(url = %inner.config.url, error = %e, "Connect failed");
                if inner.config.auto_reconnect {
                    *inner.reconnect_task.lock().await = Some(spawn_reconnect(Arc::clone(inner)));
                } else {
                    inner.set_state(SessionState::Disconnected);
                }
                Err(e)
            }
        }
    }

    /// Closes the session. No reconnect follows.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.closing.store(true, Ordering::SeqCst);

        if let Some(task) = inner.reconnect_task.lock().await.take() {
            task.abort();
        }
        let link = inner.link.lock().await.take();
        if let Some(link) = link {
            info!(connection_id = %link.connection_id, "Session disconnecting");
            link.teardown().await;
        }

        inner.pending.reject_all();
        inner.set_state(SessionState::Disconnected);
    }

    /// Sends a command and waits for its response.
    ///
    /// `timeout` defaults to the configured command timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionClosed`] immediately when not
    /// connected, [`SessionError::CommandTimeout`] when no response arrives
    /// in time, and [`SessionError::Command`] when the server reports a
    /// failure.
    pub async fn send_command(
        &self,
        action: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Response, SessionError> {
        let sink = self.current_sink().await.ok_or(SessionError::ConnectionClosed)?;
        let timeout = timeout.unwrap_or(self.inner.config.command_timeout);

        let request_id = Uuid::new_v4().to_string();
        let command = Command::new(action, data).with_request_id(&request_id);
        let frame = serde_json::to_string(&command)?;

        let mut entry = self.inner.pending.register(&request_id);
        sink.send(frame).await?;

        match tokio::time::timeout(timeout, &mut entry.receiver).await {
            Err(_) => Err(SessionError::CommandTimeout {
                action: action.to_string(),
                timeout,
            }),
            Ok(Err(_)) => Err(SessionError::ConnectionClosed),
            Ok(Ok(result)) => {
                let response = result?;
                if response.success {
                    Ok(response)
                } else {
                    Err(SessionError::Command(
                        response
                            .error
                            .unwrap_or_else(|| "command failed".to_string()),
                    ))
                }
            }
        }
    }

    /// Sends `ping` and waits for the `pong`.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn ping(&self) -> Result<Response, SessionError> {
        self.send_command("ping", json!({}), None).await
    }

    /// Joins a channel. It is rejoined automatically after a reconnect.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn subscribe(&self, channel: &str) -> Result<Response, SessionError> {
        let response = self
            .send_command("subscribe", json!({ "channel": channel }), None)
            .await?;
        self.inner
            .subscriptions
            .write()
            .await
            .insert(channel.to_string());
        Ok(response)
    }

    /// Leaves a channel.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn unsubscribe(&self, channel: &str) -> Result<Response, SessionError> {
        let response = self
            .send_command("unsubscribe", json!({ "channel": channel }), None)
            .await?;
        self.inner.subscriptions.write().await.remove(channel);
        Ok(response)
    }

    /// Publishes text to a channel.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn send_to_channel(
        &self,
        channel: &str,
        content: Value,
    ) -> Result<Response, SessionError> {
        self.send_command(
            "send_to_channel",
            json!({ "channel": channel, "content": content }),
            None,
        )
        .await
    }

    async fn current_sink(&self) -> Option<Arc<dyn FrameSink>> {
        if !self.is_connected() {
            return None;
        }
        self.inner
            .link
            .lock()
            .await
            .as_ref()
            .map(|link| Arc::clone(&link.sink))
    }
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        debug!(%state, "Session state");
        self.state.send_replace(state.clone());
        self.handlers.notify(&state);
    }

    async fn handshake_channels(&self) -> Vec<String> {
        let mut channels = self.config.channels.clone();
        for channel in self.subscriptions.read().await.iter() {
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }
        channels
    }

    async fn establish(inner: &Arc<Self>) -> Result<(), SessionError> {
        inner.set_state(SessionState::Connecting);

        let channels = inner.handshake_channels().await;
        let last_event_id = inner.last_event_id.read().await.clone();
        let url = inner
            .config
            .handshake_url(&channels, last_event_id.as_deref())?;

        let pair = inner.connector.connect(&url).await?;

        // Hold the slot until the link is stored so a link that drops
        // immediately is still seen by the receive loop.
        let mut slot = inner.link.lock().await;
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let receiver = spawn_receive_loop(Arc::clone(inner), pair.inbound, generation);
        let pinger = (inner.connector.kind() == TransportKind::Socket
            && !inner.config.ping_interval.is_zero())
        .then(|| spawn_ping_loop(Arc::clone(&pair.sink), inner.config.ping_interval));

        info!(connection_id = %pair.connection_id, transport = %inner.connector.kind(), "Session connected");
        *slot = Some(Link {
            generation,
            connection_id: pair.connection_id,
            sink: pair.sink,
            receiver,
            pinger,
        });
        inner.attempts.store(0, Ordering::SeqCst);
        inner.set_state(SessionState::Connected);
        Ok(())
    }

    async fn handle_frame(&self, frame: &str) {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        if Response::is_response_frame(&value) {
            match serde_json::from_value::<Response>(value) {
                Ok(response) => {
                    let request_id = response.request_id.clone();
                    if !self.pending.resolve(response) {
                        debug!(%request_id, "Response without a pending command");
                    }
                }
                Err(e) => warn!(error = %e, "Dropping malformed response"),
            }
            return;
        }

        let message: Message = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
                return;
            }
        };
        if message.channel().is_some() {
            *self.last_event_id.write().await = Some(message.id().to_string());
        }
        self.handlers.dispatch(&message);
    }

    async fn link_lost(inner: Arc<Self>, generation: u64) {
        let link = {
            let mut slot = inner.link.lock().await;
            if slot.as_ref().map(|link| link.generation) != Some(generation) {
                return;
            }
            slot.take()
        };
        if let Some(link) = link {
            warn!(connection_id = %link.connection_id, "Link lost");
            if let Some(pinger) = link.pinger {
                pinger.abort();
            }
        }

        inner.pending.reject_all();

        if inner.closing.load(Ordering::SeqCst) {
            inner.set_state(SessionState::Disconnected);
        } else if inner.config.auto_reconnect {
            let task = spawn_reconnect(Arc::clone(&inner));
            *inner.reconnect_task.lock().await = Some(task);
        } else {
            inner.set_state(SessionState::Disconnected);
        }
    }

    async fn reconnect(inner: Arc<Self>) {
        let max = inner.config.max_reconnect_attempts;
        loop {
            let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > max {
                inner.give_up(max);
                return;
            }

            let delay = inner.config.reconnect_delay_for(attempt);
            inner.set_state(SessionState::Reconnecting { attempt, delay });
            tokio::time::sleep(delay).await;
            if inner.closing.load(Ordering::SeqCst) {
                return;
            }

            match Self::establish(&inner).await {
                Ok(()) => return,
                Err(e) => warn!(attempt, max, error = %e, "Reconnect attempt failed"),
            }
        }
    }

    fn give_up(&self, attempts: u32) {
        warn!(attempts, "Giving up reconnecting");
        self.set_state(SessionState::Error(SessionError::ReconnectExhausted {
            attempts,
        }));
        let notice = Message::system(
            "disconnected",
            Some(json!({
                "reason": "reconnect attempts exhausted",
                "attempts": attempts,
            })),
        );
        self.handlers.dispatch(&notice);
    }
}

fn spawn_receive_loop(inner: Arc<Inner>, mut inbound: Inbound, generation: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(text) => inner.handle_frame(&text).await,
                Err(e) => {
                    warn!(error = %e, "Transport error");
                    break;
                }
            }
        }
        Inner::link_lost(inner, generation).await;
    })
}

fn spawn_reconnect(inner: Arc<Inner>) -> JoinHandle<()> {
    tokio::spawn(Inner::reconnect(inner))
}

fn spawn_ping_loop(sink: Arc<dyn FrameSink>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Ok(frame) = serde_json::to_string(&Command::new("ping", json!({}))) else {
            return;
        };
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sink.send(frame.clone()).await {
                debug!(error = %e, "Ping failed");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use switchboard_core::Payload;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;
    use crate::transport::TransportPair;

    type FrameTx = mpsc::UnboundedSender<Result<String, SessionError>>;

    /// Answers commands in memory: `silent` gets no response, `fail` a
    /// failure, anything else `{"pong": true}`.
    struct LoopbackSink {
        inbound: FrameTx,
        sent: Arc<StdMutex<Vec<Command>>>,
    }

    #[async_trait]
    impl FrameSink for LoopbackSink {
        async fn send(&self, frame: String) -> Result<(), SessionError> {
            let command: Command = serde_json::from_str(&frame)?;
            self.sent.lock().expect("lock").push(command.clone());
            let Some(request_id) = command.request_id else {
                return Ok(());
            };
            let response = match command.action.as_str() {
                "silent" => return Ok(()),
                "fail" => Response::failure(request_id, "nope"),
                _ => Response::ok(request_id, json!({"pong": true})),
            };
            self.inbound
                .send(Ok(serde_json::to_string(&response)?))
                .map_err(|_| SessionError::ConnectionClosed)
        }

        async fn close(&self) {}
    }

    #[derive(Debug, Default)]
    struct LoopbackConnector {
        connects: AtomicU32,
        urls: StdMutex<Vec<String>>,
        links: StdMutex<Vec<FrameTx>>,
        sent: Arc<StdMutex<Vec<Command>>>,
    }

    impl LoopbackConnector {
        fn inject(&self, message: &Message) {
            let frame = message.to_json().expect("encode");
            if let Some(tx) = self.links.lock().expect("lock").last() {
                tx.send(Ok(frame)).expect("link open");
            }
        }

        fn sever(&self) {
            if let Some(tx) = self.links.lock().expect("lock").last() {
                let _ = tx.send(Err(SessionError::Transport("severed".to_string())));
            }
        }
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        fn kind(&self) -> TransportKind {
            TransportKind::Socket
        }

        async fn connect(&self, url: &str) -> Result<TransportPair, SessionError> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
            self.urls.lock().expect("lock").push(url.to_string());

            let (tx, rx) = mpsc::unbounded_channel();
            let connection_id = format!("conn-{}", n);
            let welcome = Message::system("connected", Some(json!({ "connection_id": connection_id })));
            tx.send(Ok(welcome.to_json()?)).map_err(|_| SessionError::ConnectionClosed)?;
            self.links.lock().expect("lock").push(tx.clone());

            Ok(TransportPair {
                connection_id,
                sink: Arc::new(LoopbackSink {
                    inbound: tx,
                    sent: Arc::clone(&self.sent),
                }),
                inbound: UnboundedReceiverStream::new(rx).boxed(),
            })
        }
    }

    #[derive(Debug, Default)]
    struct RefusingConnector {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Connector for RefusingConnector {
        fn kind(&self) -> TransportKind {
            TransportKind::Socket
        }

        async fn connect(&self, _url: &str) -> Result<TransportPair, SessionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SessionError::Connection("refused".to_string()))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new("ws://localhost:8080/ws").with_ping_interval(Duration::ZERO)
    }

    async fn connected(config: SessionConfig) -> (ClientSession, Arc<LoopbackConnector>) {
        let connector = Arc::new(LoopbackConnector::default());
        let session = ClientSession::with_connector(config, connector.clone()).expect("session");
        session.connect().await.expect("connect");
        (session, connector)
    }

    async fn wait_for(session: &ClientSession, check: impl Fn(&SessionState) -> bool) {
        let mut states = session.state_changes();
        states.wait_for(|s| check(s)).await.expect("state sender alive");
    }

    #[tokio::test]
    async fn test_send_command_when_disconnected_fails_fast() {
        let connector = Arc::new(LoopbackConnector::default());
        let session = ClientSession::with_connector(config(), connector).expect("session");

        let result = tokio::time::timeout(Duration::from_millis(50), session.ping())
            .await
            .expect("returned before the command timeout");
        assert_eq!(result, Err(SessionError::ConnectionClosed));
        assert_eq!(session.pending_commands(), 0);
    }

    #[tokio::test]
    async fn test_connect_and_ping() {
        let (session, connector) = connected(config()).await;
        assert!(session.is_connected());
        assert_eq!(session.connection_id().await.as_deref(), Some("conn-1"));

        let response = session.ping().await.expect("ping");
        assert!(response.success);
        assert_eq!(response.data, Some(json!({"pong": true})));
        assert_eq!(session.pending_commands(), 0);

        let sent = connector.sent.lock().expect("lock");
        assert_eq!(sent[0].action, "ping");
        assert!(sent[0].request_id.is_some());
    }

    #[tokio::test]
    async fn test_welcome_reaches_system_handlers() {
        let connector = Arc::new(LoopbackConnector::default());
        let session = ClientSession::with_connector(config(), connector).expect("session");
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.on(MessageKind::System, move |message| {
            if let Payload::System { event, .. } = message.payload() {
                tx.send(event.clone())?;
            }
            Ok(())
        });

        session.connect().await.expect("connect");
        assert_eq!(rx.recv().await.as_deref(), Some("connected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout_clears_pending() {
        let (session, _connector) = connected(config()).await;

        let result = session
            .send_command("silent", json!({}), Some(Duration::from_millis(100)))
            .await;
        assert_eq!(
            result,
            Err(SessionError::CommandTimeout {
                action: "silent".to_string(),
                timeout: Duration::from_millis(100),
            })
        );
        assert_eq!(session.pending_commands(), 0);
    }

    #[tokio::test]
    async fn test_failed_response_is_an_error() {
        let (session, _connector) = connected(config()).await;
        let result = session.send_command("fail", json!({}), None).await;
        assert_eq!(result, Err(SessionError::Command("nope".to_string())));
    }

    #[tokio::test]
    async fn test_handlers_receive_messages_and_survive_failures() {
        let (session, connector) = connected(config()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        session.on(MessageKind::Text, |_| Err("broken handler".into()));
        session.on(MessageKind::Text, |_| panic!("handler bug"));
        let keep = tx.clone();
        session.on(MessageKind::Text, move |message| {
            keep.send(message.as_text().unwrap_or_default().to_string())?;
            Ok(())
        });
        let removed = session.on(MessageKind::Text, move |_| {
            tx.send("removed".to_string())?;
            Ok(())
        });
        assert!(session.off(removed));

        connector.inject(&Message::text("one").with_channel("news"));
        connector.inject(&Message::text("two"));
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
        assert!(session.is_connected());
        assert!(session.last_event_id().await.is_some());
    }

    #[tokio::test]
    async fn test_link_loss_rejects_pending_commands() {
        let (session, connector) =
            connected(config().with_auto_reconnect(false)).await;

        let waiting = session.clone();
        let command = tokio::spawn(async move {
            waiting
                .send_command("silent", json!({}), Some(Duration::from_secs(60)))
                .await
        });
        while session.pending_commands() == 0 {
            tokio::task::yield_now().await;
        }

        connector.sever();
        let result = command.await.expect("task");
        assert_eq!(result, Err(SessionError::ConnectionClosed));
        wait_for(&session, |s| *s == SessionState::Disconnected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_and_rejoins_channels() {
        let (session, connector) = connected(config()).await;
        session.subscribe("news").await.expect("subscribe");
        connector.inject(&Message::text("m1").with_channel("news"));
        while session.last_event_id().await.is_none() {
            tokio::task::yield_now().await;
        }

        connector.sever();
        wait_for(&session, |s| matches!(s, SessionState::Reconnecting { .. })).await;
        wait_for(&session, SessionState::is_connected).await;

        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(session.connection_id().await.as_deref(), Some("conn-2"));
        let urls = connector.urls.lock().expect("lock");
        assert!(urls[1].contains("channels=news"));
        assert!(urls[1].contains("last_event_id="));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let connector = Arc::new(RefusingConnector::default());
        let config = config()
            .with_reconnect_delay(Duration::from_secs(1))
            .with_max_reconnect_attempts(3);
        let session = ClientSession::with_connector(config, connector.clone()).expect("session");

        let delays = Arc::new(StdMutex::new(Vec::new()));
        let seen = Arc::clone(&delays);
        session.on_state(move |state| {
            if let SessionState::Reconnecting { delay, .. } = state {
                seen.lock().expect("lock").push(*delay);
            }
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.on(MessageKind::System, move |message| {
            tx.send(message.clone())?;
            Ok(())
        });

        let started = Instant::now();
        assert!(session.connect().await.is_err());
        wait_for(&session, |s| matches!(s, SessionState::Error(_))).await;

        assert_eq!(
            session.state(),
            SessionState::Error(SessionError::ReconnectExhausted { attempts: 3 })
        );
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(
            *delays.lock().expect("lock"),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
        assert!(started.elapsed() >= Duration::from_secs(6));

        let notice = rx.recv().await.expect("disconnected notice");
        match notice.payload() {
            Payload::System { event, .. } => assert_eq!(event, "disconnected"),
            other => panic!("expected system message, got {:?}", other),
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_disconnect_is_terminal() {
        let (session, connector) = connected(config()).await;
        session.disconnect().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.ping().await, Err(SessionError::ConnectionClosed));
        tokio::task::yield_now().await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connector_must_match_transport() {
        let connector = Arc::new(LoopbackConnector::default());
        let config = SessionConfig::new("http://localhost:8080/events");
        assert!(matches!(
            ClientSession::with_connector(config, connector),
            Err(SessionError::InvalidConfig(_))
        ));
    }
}
