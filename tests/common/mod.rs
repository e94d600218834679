//! Scripted transport and log capture shared by the integration tests.

#![allow(dead_code, clippy::panic)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use supervisor_link::channel::{ChannelOptions, Connection, Frame, FrameSink, FrameSource, Transport};
use supervisor_link::error::SupervisorError;

/// What the client did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    /// A connection attempt; `accepted` is false for scripted failures.
    Connect { at: Instant, accepted: bool },
    /// Text sent by the client.
    Sent(String),
    /// Keep-alive ping sent by the client.
    Ping,
    /// Close frame sent by the client.
    Closed(String),
}

enum Attempt {
    Fail,
    Accept(mpsc::UnboundedReceiver<Frame>),
}

/// Transport whose connection attempts follow a script.
pub struct ScriptedTransport {
    attempts: Mutex<VecDeque<Attempt>>,
    activity: mpsc::UnboundedSender<Activity>,
}

impl ScriptedTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Activity>) {
        let (activity, rx) = mpsc::unbounded_channel();
        let transport = Self {
            attempts: Mutex::new(VecDeque::new()),
            activity,
        };
        (Arc::new(transport), rx)
    }

    /// Queues a failing connection attempt.
    pub fn fail(&self) {
        self.push(Attempt::Fail);
    }

    /// Queues a successful attempt and returns the server side of it.
    /// Dropping the returned sender ends the connection.
    pub fn accept(&self) -> mpsc::UnboundedSender<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Attempt::Accept(rx));
        tx
    }

    fn push(&self, attempt: Attempt) {
        let Ok(mut attempts) = self.attempts.lock() else {
            panic!("poisoned");
        };
        attempts.push_back(attempt);
    }
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _uri: &str) -> Result<Connection, SupervisorError> {
        let next = match self.attempts.lock() {
            Ok(mut attempts) => attempts.pop_front(),
            Err(_) => None,
        };
        let accepted = matches!(next, Some(Attempt::Accept(_)));
        let _ = self.activity.send(Activity::Connect {
            at: Instant::now(),
            accepted,
        });
        match next {
            Some(Attempt::Accept(frames)) => Ok((
                Box::new(ScriptedSink {
                    activity: self.activity.clone(),
                }),
                Box::new(ScriptedSource { frames }),
            )),
            _ => Err(SupervisorError::Transport("connection refused".to_string())),
        }
    }
}

struct ScriptedSink {
    activity: mpsc::UnboundedSender<Activity>,
}

#[async_trait]
impl FrameSink for ScriptedSink {
    async fn send_text(&mut self, text: String) -> Result<(), SupervisorError> {
        let _ = self.activity.send(Activity::Sent(text));
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), SupervisorError> {
        let _ = self.activity.send(Activity::Ping);
        Ok(())
    }

    async fn close(&mut self, reason: &str) -> Result<(), SupervisorError> {
        let _ = self.activity.send(Activity::Closed(reason.to_string()));
        Ok(())
    }
}

struct ScriptedSource {
    frames: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn receive(&mut self) -> Result<Frame, SupervisorError> {
        self.frames
            .recv()
            .await
            .ok_or(SupervisorError::ConnectionClosed(None))
    }
}

/// Channel options with the production timings.
pub fn options() -> ChannelOptions {
    ChannelOptions {
        uri: "ws://test/websocket".to_string(),
        ..ChannelOptions::default()
    }
}

/// Complete text message frame.
pub fn text(payload: &str) -> Frame {
    Frame::Text {
        payload: payload.to_string(),
        fin: true,
    }
}

/// Next recorded activity, failing the test if none arrives in time.
pub async fn next_activity(rx: &mut mpsc::UnboundedReceiver<Activity>) -> Activity {
    match tokio::time::timeout(Duration::from_secs(600), rx.recv()).await {
        Ok(Some(activity)) => activity,
        Ok(None) => panic!("activity channel closed"),
        Err(_) => panic!("no activity"),
    }
}

/// Next text sent by the client, parsed as JSON; pings are skipped.
pub async fn next_sent(rx: &mut mpsc::UnboundedReceiver<Activity>) -> serde_json::Value {
    loop {
        match next_activity(rx).await {
            Activity::Sent(text) => {
                let Ok(value) = serde_json::from_str(&text) else {
                    panic!("client sent invalid JSON: {text}");
                };
                return value;
            }
            Activity::Ping => {}
            other => panic!("expected a sent message, got {other:?}"),
        }
    }
}

/// Sleeps in small steps until `done` holds.
pub async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Counts log events by level and message.
#[derive(Debug, Clone, Default)]
pub struct LogCounter {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCounter {
    pub fn count(&self, level: Level, message: &str) -> usize {
        let Ok(events) = self.events.lock() else {
            panic!("poisoned");
        };
        events
            .iter()
            .filter(|(l, m)| *l == level && m == message)
            .count()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        if let Ok(mut events) = self.events.lock() {
            events.push((*event.metadata().level(), visitor.0));
        }
    }
}

/// Installs a [`LogCounter`] for the current thread.
pub fn capture_logs() -> (LogCounter, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::layer::SubscriberExt;

    let counter = LogCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (counter, guard)
}

/// Handler that counts invocations and records message types.
#[derive(Debug, Default)]
pub struct CountingHandler {
    pub calls: AtomicUsize,
}

impl CountingHandler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl supervisor_link::channel::MessageHandler for CountingHandler {
    async fn handle(
        &self,
        _id: Option<u64>,
        _reader: &mut supervisor_link::payload::PayloadReader,
        _sender: &supervisor_link::channel::CommandSender,
    ) -> Result<(), SupervisorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
