//! Protocol orchestration on top of the event channel.
//!
//! [`SupervisorCore`] registers one handler per inbound message type and
//! drives the session:
//!
//! ```text
//! auth_required ──► auth
//! auth_ok       ──► get_states ──result──► router ──► subscribe_trigger
//! event         ──► router (trigger.to_state)
//! auth_invalid  ──► cancel the run
//! ```
//!
//! Every reconnection replays this sequence, so entity state is
//! bootstrapped again after an outage.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::messages::{AUTH, GET_STATES, InboundMessage, SUBSCRIBE_TRIGGER};
use super::path::FieldPath;
use super::pending::{PendingRequests, ResultHandler};
use crate::channel::{
    ChannelOptions, CommandSender, ConnectionState, EventChannel, MessageHandler, Transport,
};
use crate::config::SupervisorConfig;
use crate::devices::DevicesUpdaters;
use crate::error::SupervisorError;
use crate::payload::{NodeKind, PayloadReader, PayloadWriter};

const NO_MESSAGE: &str = "No message";

const TRIGGER_STATE: FieldPath<'static> =
    FieldPath::new(&["event", "variables", "trigger", "to_state"]);
const ERROR_MESSAGE: FieldPath<'static> = FieldPath::new(&["error", "message"]);
const AUTH_MESSAGE: FieldPath<'static> = FieldPath::new(&["message"]);

/// Authentication, command correlation and state routing.
pub struct SupervisorCore {
    access_token: String,
    devices: Arc<DevicesUpdaters>,
    options: ChannelOptions,
    request_timeout: Duration,
    pending: PendingRequests,
    sender: CommandSender,
    run_token: ArcSwapOption<CancellationToken>,
    running: AtomicBool,
    channel: ArcSwapOption<EventChannel>,
}

impl SupervisorCore {
    /// Creates the core from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::MissingAccessToken`] or
    /// [`SupervisorError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: &SupervisorConfig,
        devices: Arc<DevicesUpdaters>,
    ) -> Result<Self, SupervisorError> {
        config.validate()?;
        Ok(Self {
            access_token: config.access_token.clone(),
            devices,
            options: config.channel_options(),
            request_timeout: config.request_timeout(),
            pending: PendingRequests::new(),
            sender: CommandSender::new(),
            run_token: ArcSwapOption::empty(),
            running: AtomicBool::new(false),
            channel: ArcSwapOption::empty(),
        })
    }

    /// Entity registry used for state routing.
    #[must_use]
    pub fn devices(&self) -> &DevicesUpdaters {
        &self.devices
    }

    /// Send handle bound to the live connection.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Number of commands awaiting a result.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if command `id` still awaits its result.
    #[must_use]
    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains(id)
    }

    /// Connection state of the active run, [`ConnectionState::Idle`]
    /// when not running.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match &*self.channel.load() {
            Some(channel) => channel.state(),
            None => ConnectionState::Idle,
        }
    }

    /// Connects through `transport` and processes messages until `cancel`
    /// fires or authentication is rejected. Cancelling the parent token
    /// stops the run; an auth failure cancels only the run's child token.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::AlreadyRunning`] if another run of this
    /// core is active, or channel errors.
    pub async fn run(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        cancel: &CancellationToken,
    ) -> Result<(), SupervisorError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let state = match self.state() {
                ConnectionState::Idle => ConnectionState::Starting,
                state => state,
            };
            return Err(SupervisorError::AlreadyRunning(state));
        }
        let _guard = RunGuard { core: self };

        let token = cancel.child_token();
        let channel = Arc::new(EventChannel::with_sender(
            transport,
            self.options.clone(),
            self.sender.clone(),
        ));
        for message in InboundMessage::ALL {
            let handler = CoreHandler {
                core: Arc::clone(self),
                message,
            };
            channel.on(message.as_str(), Arc::new(handler))?;
        }

        self.channel.store(Some(Arc::clone(&channel)));
        self.run_token.store(Some(Arc::new(token.clone())));
        channel.run(token).await
    }

    /// Allocates a command id, registers `handler` for its result and
    /// returns a writer pre-filled with `id` and `type`.
    pub fn new_command(
        &self,
        command_type: &str,
        handler: Box<dyn ResultHandler>,
    ) -> (u64, PayloadWriter) {
        let id = self.pending.register(handler);
        let mut writer = PayloadWriter::new();
        writer.data("id", id).data("type", command_type);
        (id, writer)
    }

    /// Builds and sends a command; `fill` adds the type-specific fields.
    /// The result handler is unregistered if the send fails.
    ///
    /// # Errors
    ///
    /// Returns the transport error of a failed send.
    pub async fn send_command<F>(
        &self,
        sender: &CommandSender,
        command_type: &str,
        handler: Box<dyn ResultHandler>,
        fill: F,
    ) -> Result<u64, SupervisorError>
    where
        F: FnOnce(&mut PayloadWriter) + Send,
    {
        let (id, mut writer) = self.new_command(command_type, handler);
        fill(&mut writer);
        if let Err(err) = sender.send(writer.finish()).await {
            self.pending.remove(id);
            return Err(err);
        }
        tracing::debug!(id, command_type, "command sent");
        Ok(id)
    }

    /// Sends an arbitrary command and waits for its `result` payload.
    ///
    /// `id` and `type` entries in `fields` are ignored. Must not be awaited
    /// from inside a message handler: results are delivered by the same
    /// dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::NotConnected`] while disconnected,
    /// [`SupervisorError::CommandFailed`] if the server rejects the command
    /// or the run ends first, and [`SupervisorError::RequestTimeout`].
    pub async fn request(
        &self,
        command_type: &str,
        fields: Map<String, Value>,
    ) -> Result<Value, SupervisorError> {
        if !self.sender.is_connected() {
            return Err(SupervisorError::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        let id = self
            .send_command(&self.sender, command_type, Box::new(ValueResult(tx)), |writer| {
                for (name, value) in fields {
                    if name != "id" && name != "type" {
                        writer.data(&name, value);
                    }
                }
            })
            .await?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(SupervisorError::CommandFailed {
                id,
                message: "no successful result".to_string(),
            }),
            Err(_) => {
                self.pending.remove(id);
                Err(SupervisorError::RequestTimeout { id })
            }
        }
    }

    async fn on_auth_required(&self, sender: &CommandSender) -> Result<(), SupervisorError> {
        let stale = self.pending.len();
        if stale > 0 {
            self.pending.clear();
            tracing::debug!(stale, "pending commands of a previous connection dropped");
        }
        tracing::debug!("authentication requested");
        let mut writer = PayloadWriter::new();
        writer
            .data("type", AUTH)
            .data("access_token", self.access_token.as_str());
        sender.send(writer.finish()).await
    }

    async fn on_auth_ok(&self, sender: &CommandSender) -> Result<(), SupervisorError> {
        if self.devices.is_empty() {
            tracing::info!("authenticated; no entities tracked");
            return Ok(());
        }
        tracing::info!(entities = self.devices.entity_ids().len(), "authenticated");
        self.send_command(sender, GET_STATES, Box::new(StatesResult), |_| {})
            .await
            .map(|_| ())
    }

    fn on_auth_invalid(&self, reader: &mut PayloadReader) {
        let message = read_message(reader, &AUTH_MESSAGE);
        tracing::error!(reason = %message, "authentication rejected; stopping");
        if let Some(token) = self.run_token.load_full() {
            token.cancel();
        }
    }

    async fn on_result(
        &self,
        id: Option<u64>,
        reader: &mut PayloadReader,
        sender: &CommandSender,
    ) -> Result<(), SupervisorError> {
        let Some(id) = id else {
            return Err(SupervisorError::format("result without id", reader.position()));
        };
        let handler = self.pending.take(id);

        reader.expect_field("success")?;
        if !reader.value::<bool>()? {
            let message = read_message(reader, &ERROR_MESSAGE);
            tracing::error!(id, reason = %message, "command failed");
            return Ok(());
        }

        reader.expect_field("result")?;
        match handler {
            Some(handler) => handler.on_result(self, reader, sender).await,
            None => {
                tracing::warn!(id, "result handler not exists");
                Ok(())
            }
        }
    }

    fn on_event(&self, reader: &mut PayloadReader) -> bool {
        if !TRIGGER_STATE.seek(reader) || reader.kind() != NodeKind::StartProperty {
            tracing::debug!("event without trigger target state");
            return false;
        }
        let mut session = self.devices.session();
        let mapped = session.map_entity(reader);
        session.update();
        mapped
    }

    /// Routes every entity state of a `get_states` result and commits the
    /// session. Untracked entities are expected in a full dump and are
    /// only logged at debug level.
    fn apply_states(&self, reader: &mut PayloadReader) -> Result<usize, SupervisorError> {
        if reader.kind() != NodeKind::StartProperty || !reader.is_array() {
            return Err(SupervisorError::format(
                "expected an array of entity states",
                reader.position(),
            ));
        }
        let depth = reader.depth();
        let mut session = self
            .devices
            .session_with_warnings(|message| tracing::debug!("{message}"));
        let mut mapped = 0;
        while reader.read() && !reader.is_end_of(depth) {
            if reader.kind() == NodeKind::StartProperty && session.map_entity(reader) {
                mapped += 1;
            }
        }
        let committed = session.update();
        tracing::info!(mapped, committed, "entity states applied");
        Ok(mapped)
    }

    async fn subscribe_trigger(&self, sender: &CommandSender) -> Result<(), SupervisorError> {
        let entity_ids = self.devices.entity_ids();
        let id = self
            .send_command(sender, SUBSCRIBE_TRIGGER, Box::new(IgnoreResult), |writer| {
                writer
                    .start("trigger")
                    .data("platform", "state")
                    .array("entity_id", entity_ids.iter().map(String::as_str))
                    .end();
            })
            .await?;
        tracing::info!(id, entities = entity_ids.len(), "subscribed to state triggers");
        Ok(())
    }
}

impl std::fmt::Debug for SupervisorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorCore")
            .field("access_token", &"<redacted>")
            .field("devices", &self.devices)
            .field("options", &self.options)
            .field("pending", &self.pending)
            .field("sender", &self.sender)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Reads the string at `path` among the following siblings, or the
/// default message.
fn read_message(reader: &mut PayloadReader, path: &FieldPath<'_>) -> String {
    if path.seek(reader)
        && let Ok(message) = reader.str_value()
    {
        return message.to_string();
    }
    NO_MESSAGE.to_string()
}

/// Releases the run slot and per-run state when a run ends or is dropped.
struct RunGuard<'a> {
    core: &'a SupervisorCore,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.core.channel.store(None);
        self.core.run_token.store(None);
        self.core.pending.clear();
        self.core.running.store(false, Ordering::Release);
    }
}

/// Adapter registered with the channel for one message type.
struct CoreHandler {
    core: Arc<SupervisorCore>,
    message: InboundMessage,
}

#[async_trait]
impl MessageHandler for CoreHandler {
    async fn handle(
        &self,
        id: Option<u64>,
        reader: &mut PayloadReader,
        sender: &CommandSender,
    ) -> Result<(), SupervisorError> {
        match self.message {
            InboundMessage::AuthRequired => self.core.on_auth_required(sender).await,
            InboundMessage::AuthOk => self.core.on_auth_ok(sender).await,
            InboundMessage::AuthInvalid => {
                self.core.on_auth_invalid(reader);
                Ok(())
            }
            InboundMessage::Result => self.core.on_result(id, reader, sender).await,
            InboundMessage::Event => {
                self.core.on_event(reader);
                Ok(())
            }
        }
    }
}

/// `get_states`: route states, then subscribe to future changes.
struct StatesResult;

#[async_trait]
impl ResultHandler for StatesResult {
    async fn on_result(
        self: Box<Self>,
        core: &SupervisorCore,
        reader: &mut PayloadReader,
        sender: &CommandSender,
    ) -> Result<(), SupervisorError> {
        core.apply_states(reader)?;
        core.subscribe_trigger(sender).await
    }
}

struct IgnoreResult;

#[async_trait]
impl ResultHandler for IgnoreResult {
    async fn on_result(
        self: Box<Self>,
        _core: &SupervisorCore,
        _reader: &mut PayloadReader,
        _sender: &CommandSender,
    ) -> Result<(), SupervisorError> {
        Ok(())
    }
}

/// Delivers the raw result to a waiting [`SupervisorCore::request`].
struct ValueResult(oneshot::Sender<Value>);

#[async_trait]
impl ResultHandler for ValueResult {
    async fn on_result(
        self: Box<Self>,
        _core: &SupervisorCore,
        reader: &mut PayloadReader,
        _sender: &CommandSender,
    ) -> Result<(), SupervisorError> {
        let value = reader.to_value()?;
        let _ = self.0.send(value);
        Ok(())
    }
}
