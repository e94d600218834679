//! Resilient connection with a decoupled dispatch loop.
//!
//! [`EventChannel::run`] spawns two tasks:
//!
//! - the **receive loop** owns the socket: it connects, reassembles
//!   fragmented text frames, pushes complete payloads onto an unbounded
//!   queue, pings the peer and reconnects after a fixed delay on any
//!   transport failure;
//! - the **dispatch loop** drains the queue in arrival order, reads the
//!   message envelope and invokes the handler registered for its type.
//!
//! A slow handler therefore delays only the dispatch loop; the socket keeps
//! being read.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::envelope::Envelope;
use super::handler::{HandlerRegistry, HandlerTable, MessageHandler};
use super::sender::{CommandSender, SharedSink};
use super::state::{ConnectionState, StateCell};
use super::transport::{Frame, FrameSource, Transport};
use crate::error::SupervisorError;
use crate::payload::PayloadReader;

/// Default supervisor endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://supervisor/core/websocket";

/// Longest prefix of a failing payload written to the log.
const MAX_LOGGED_PAYLOAD: usize = 512;

/// Upper bound on the graceful close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-level settings.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Endpoint to connect to.
    pub uri: String,
    /// Fixed delay between a failure and the next connection attempt.
    pub reconnect_delay: Duration,
    /// Interval between keep-alive pings.
    pub keep_alive_interval: Duration,
    /// Silence tolerated beyond `keep_alive_interval`; a connection that
    /// received nothing for `interval + timeout` is considered dead.
    pub keep_alive_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            uri: DEFAULT_ENDPOINT.to_string(),
            reconnect_delay: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(20),
        }
    }
}

enum ReceiveEnd {
    Cancelled,
    QueueClosed,
    Failed(SupervisorError),
}

/// Long-lived channel to the supervisor.
pub struct EventChannel {
    transport: Arc<dyn Transport>,
    options: ChannelOptions,
    sender: CommandSender,
    state: StateCell,
    registry: StdMutex<HandlerRegistry>,
}

impl EventChannel {
    /// Creates an idle channel with its own [`CommandSender`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, options: ChannelOptions) -> Self {
        Self::with_sender(transport, options, CommandSender::new())
    }

    /// Creates an idle channel that drives an existing sender handle.
    #[must_use]
    pub fn with_sender(
        transport: Arc<dyn Transport>,
        options: ChannelOptions,
        sender: CommandSender,
    ) -> Self {
        Self {
            transport,
            options,
            sender,
            state: StateCell::new(),
            registry: StdMutex::new(HandlerRegistry::new()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HandlerRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the handler for `message_type`. Only allowed before the
    /// first call to [`EventChannel::run`].
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::RegistryFrozen`] after the channel has
    /// started, or [`SupervisorError::DuplicateHandler`].
    pub fn on(
        &self,
        message_type: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), SupervisorError> {
        self.registry().register(message_type, handler)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Handle that always sends over the current connection.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Connection settings.
    #[must_use]
    pub const fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Runs both loops until `cancel` fires, then resets to
    /// [`ConnectionState::Idle`].
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::AlreadyRunning`] (without side effects)
    /// when the channel is not idle, or [`SupervisorError::Internal`] if a
    /// loop task panicked.
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), SupervisorError> {
        self.state
            .transition(ConnectionState::Idle, ConnectionState::Starting)
            .map_err(SupervisorError::AlreadyRunning)?;
        let handlers = self.registry().freeze();
        tracing::info!(uri = %self.options.uri, handlers = handlers.len(), "event channel starting");

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let dispatch = tokio::spawn(Arc::clone(self).dispatch_loop(
            cancel.clone(),
            queue_rx,
            handlers,
            ready_tx,
        ));
        let receive = tokio::spawn(Arc::clone(self).receive_loop(cancel, queue_tx, ready_rx));
        let (dispatch, receive) = tokio::join!(dispatch, receive);

        self.sender.reset();
        self.state.store(ConnectionState::Idle);
        tracing::info!("event channel stopped");

        dispatch.map_err(|err| SupervisorError::Internal(format!("dispatch loop: {err}")))?;
        receive.map_err(|err| SupervisorError::Internal(format!("receive loop: {err}")))?;
        Ok(())
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        cancel: CancellationToken,
        mut queue: mpsc::UnboundedReceiver<String>,
        handlers: Arc<HandlerTable>,
        ready: oneshot::Sender<()>,
    ) {
        self.state.store(ConnectionState::DispatchReady);
        let _ = ready.send(());
        tracing::debug!("dispatch loop ready");

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                text = queue.recv() => text,
            };
            let Some(text) = next else {
                break;
            };
            self.dispatch(&handlers, &text).await;
        }
        tracing::debug!("dispatch loop stopped");
    }

    async fn dispatch(&self, handlers: &HandlerTable, text: &str) {
        let outcome = AssertUnwindSafe(dispatch_one(handlers, text, &self.sender))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(error = %err, payload = truncate(text), "failed to handle message");
            }
            Err(_) => {
                tracing::error!(payload = truncate(text), "message handler panicked");
            }
        }
    }

    async fn receive_loop(
        self: Arc<Self>,
        cancel: CancellationToken,
        queue: mpsc::UnboundedSender<String>,
        ready: oneshot::Receiver<()>,
    ) {
        let _ = ready.await;

        while !cancel.is_cancelled() {
            self.state.store(ConnectionState::ConnectingOrRetrying);
            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.transport.connect(&self.options.uri) => result,
            };

            match connected {
                Ok((sink, source)) => {
                    let sink: SharedSink = Arc::new(Mutex::new(sink));
                    self.sender.install(Arc::clone(&sink));
                    self.state.store(ConnectionState::Connected);
                    tracing::info!(uri = %self.options.uri, "connected");

                    let end = self.receive_messages(&cancel, source, &sink, &queue).await;
                    self.sender.reset();
                    match end {
                        ReceiveEnd::Cancelled => {
                            self.state.store(ConnectionState::Cancelled);
                            close_gracefully(&sink).await;
                            break;
                        }
                        ReceiveEnd::QueueClosed => {
                            tracing::warn!("dispatch loop is gone, closing connection");
                            close_gracefully(&sink).await;
                            break;
                        }
                        ReceiveEnd::Failed(err) => {
                            tracing::warn!(error = %err, "connection lost");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, uri = %self.options.uri, "connection failed");
                }
            }

            self.state.store(ConnectionState::RetryBackoff);
            tracing::info!(
                delay_secs = self.options.reconnect_delay.as_secs(),
                "reconnecting after delay"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.options.reconnect_delay) => {}
            }
        }

        self.state.store(ConnectionState::Cancelled);
        tracing::info!("receive loop stopped");
    }

    async fn receive_messages(
        &self,
        cancel: &CancellationToken,
        mut source: Box<dyn FrameSource>,
        sink: &SharedSink,
        queue: &mpsc::UnboundedSender<String>,
    ) -> ReceiveEnd {
        let interval = self.options.keep_alive_interval;
        let silence_limit = interval + self.options.keep_alive_timeout;
        let mut ping = tokio::time::interval_at(Instant::now() + interval, interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(silence_limit);
        tokio::pin!(deadline);
        let mut message = String::new();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return ReceiveEnd::Cancelled,
                frame = source.receive() => {
                    if frame.is_ok() {
                        deadline.as_mut().reset(Instant::now() + silence_limit);
                    }
                    match frame {
                        Ok(Frame::Text { payload, fin }) => {
                            message.push_str(&payload);
                            if fin && queue.send(std::mem::take(&mut message)).is_err() {
                                return ReceiveEnd::QueueClosed;
                            }
                        }
                        Ok(Frame::KeepAlive) => {}
                        Ok(Frame::Close(reason)) => {
                            return ReceiveEnd::Failed(SupervisorError::ConnectionClosed(reason));
                        }
                        Err(err) => return ReceiveEnd::Failed(err),
                    }
                }
                () = &mut deadline => return ReceiveEnd::Failed(SupervisorError::KeepAliveTimeout),
                _ = ping.tick() => {
                    if let Err(err) = sink.lock().await.ping().await {
                        return ReceiveEnd::Failed(err);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("options", &self.options)
            .field("state", &self.state.load())
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

async fn dispatch_one(
    handlers: &HandlerTable,
    text: &str,
    sender: &CommandSender,
) -> Result<(), SupervisorError> {
    let mut reader = PayloadReader::parse(text)?;
    let envelope = Envelope::read(&mut reader)?;
    if envelope.message_type.is_empty() {
        tracing::warn!(payload = truncate(text), "message without type ignored");
        return Ok(());
    }
    let Some(handler) = handlers.get(&envelope.message_type) else {
        tracing::info!(message_type = %envelope.message_type, "no handler for message type");
        return Ok(());
    };
    tracing::trace!(message_type = %envelope.message_type, id = ?envelope.id, "dispatching");
    handler.handle(envelope.id, &mut reader, sender).await
}

async fn close_gracefully(sink: &SharedSink) {
    let closing = async { sink.lock().await.close("shutting down").await };
    match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
        Ok(Ok(())) => tracing::debug!("connection closed"),
        Ok(Err(err)) => tracing::debug!(error = %err, "graceful close failed"),
        Err(_) => tracing::debug!("graceful close timed out"),
    }
}

/// Cuts `text` to at most [`MAX_LOGGED_PAYLOAD`] bytes on a char boundary.
fn truncate(text: &str) -> &str {
    if text.len() <= MAX_LOGGED_PAYLOAD {
        return text;
    }
    let mut end = MAX_LOGGED_PAYLOAD;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.get(..end).unwrap_or(text)
}
